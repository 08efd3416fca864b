// Audio synchronization engine
//
// Single authority for pushing cockpit knob/mute state into mixer sessions
// and for deciding which sessions are bound. Driven by two stimuli:
// variable-change callbacks from the simulator link, and periodic
// `reconcile()` calls from the service loop. All binding state lives behind
// one mutex so a callback and a reconcile pass never tear an update.

use colored::Colorize;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::binding::{BindingSnapshot, HardwareModeGate, SessionBinding};
use super::session::{discover_session, MixerSession, SessionBackend};
use super::simulator::{SimulatorLink, SubscriptionId, VariableCallback};
use super::types::{ChannelId, ChannelStateEvent, ControlValue, Result};
use crate::config::{ChannelSettings, SharedSettings};
use crate::sync_debug;

const NEUTRAL_VOLUME: f32 = 1.0;
/// Sessions report volume through float APIs that may not round-trip exactly
const VOLUME_EPSILON: f32 = 1e-4;

#[derive(Default)]
struct EngineState {
    bindings: HashMap<ChannelId, SessionBinding>,
    gate: HardwareModeGate,
    track_fpa_variable: String,
    heading_vs_variable: String,
    gate_subscriptions: Vec<(String, SubscriptionId)>,
    /// Channel settings as of the last reconcile pass
    applied: Option<BTreeMap<ChannelId, ChannelSettings>>,
}

pub struct SyncEngine {
    link: Arc<dyn SimulatorLink>,
    backend: Arc<dyn SessionBackend>,
    settings: SharedSettings,
    state: Mutex<EngineState>,
    /// Serializes whole reconcile passes
    reconcile_lock: Mutex<()>,
    subscribers: Mutex<Vec<Sender<ChannelStateEvent>>>,
    self_ref: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(
        link: Arc<dyn SimulatorLink>,
        backend: Arc<dyn SessionBackend>,
        settings: SharedSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            link,
            backend,
            settings,
            state: Mutex::new(EngineState::default()),
            reconcile_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settings_snapshot(&self) -> crate::config::BridgeSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn callback(&self) -> VariableCallback {
        let weak = self.self_ref.clone();
        Arc::new(move |name: &str, _old: ControlValue, new: ControlValue| {
            if let Some(engine) = weak.upgrade() {
                engine.on_variable_changed(name, new);
            }
        })
    }

    /// Subscribe to the gate variables and every enabled channel, then seed
    /// the gate from the current mode variable values.
    pub fn initialize(&self) {
        if self.lock_state().applied.is_some() {
            warn!("SyncEngine already initialized");
            return;
        }
        let settings = self.settings_snapshot();
        let track = settings.gate.track_fpa_variable.clone();
        let heading = settings.gate.heading_vs_variable.clone();

        let gate_subscriptions = vec![
            (track.clone(), self.link.subscribe(&track, self.callback())),
            (heading.clone(), self.link.subscribe(&heading, self.callback())),
        ];

        {
            let mut state = self.lock_state();
            state.track_fpa_variable = track.clone();
            state.heading_vs_variable = heading.clone();
            state.gate_subscriptions = gate_subscriptions;
            state.applied = Some(settings.channels.clone());
        }

        for (&channel, ch) in settings.channels.iter().filter(|(_, ch)| ch.enabled) {
            self.add_channel(&ch.process_names, channel, &ch.knob_variable, &ch.mute_variable);
        }

        let gate = HardwareModeGate {
            track_fpa_mode: self.link.read_variable(&track).map_or(false, |v| v.as_bool()),
            heading_vs_mode: self.link.read_variable(&heading).map_or(false, |v| v.as_bool()),
        };
        self.lock_state().gate = gate;

        info!(
            "{}: {} channel(s), gate {}",
            "SYNC_INIT".on_blue().cyan(),
            self.lock_state().bindings.len(),
            if gate.is_open() { "open" } else { "closed" }
        );
    }

    /// Create (or replace) the binding for `channel` and subscribe its variables
    pub fn add_channel(
        &self,
        process_names: &str,
        channel: ChannelId,
        knob_variable: &str,
        mute_variable: &str,
    ) {
        self.remove_channel(channel);

        // Insert before subscribing so a change delivered during subscribe finds the binding
        let binding = SessionBinding::new(channel, process_names, knob_variable, mute_variable);
        info!(
            "{} {} -> {:?}",
            "CHANNEL_ADDED".green(),
            channel,
            binding.candidate_process_names
        );
        self.lock_state().bindings.insert(channel, binding);

        let subscriptions = vec![
            (
                knob_variable.to_string(),
                self.link.subscribe(knob_variable, self.callback()),
            ),
            (
                mute_variable.to_string(),
                self.link.subscribe(mute_variable, self.callback()),
            ),
        ];

        // Seed from current cockpit state so a new binding does not wait for the next change
        let seed_volume = self
            .link
            .read_variable(knob_variable)
            .map(|v| v.as_f32())
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0));
        let seed_mute = self.link.read_variable(mute_variable).map(|v| v.as_bool());

        let orphaned = {
            let mut state = self.lock_state();
            match state.bindings.get_mut(&channel) {
                Some(binding)
                    if binding.knob_variable == knob_variable
                        && binding.mute_variable == mute_variable =>
                {
                    // Values delivered after subscribing are newer than the seed
                    binding.pending_volume = binding.pending_volume.or(seed_volume);
                    binding.pending_mute = binding.pending_mute.or(seed_mute);
                    binding.subscriptions.extend(subscriptions);
                    Vec::new()
                }
                _ => subscriptions,
            }
        };
        for (name, id) in orphaned {
            self.link.unsubscribe(&name, id);
        }
    }

    /// Release the channel's session (restoring it to neutral) and drop the binding
    pub fn remove_channel(&self, channel: ChannelId) {
        let removed = self.lock_state().bindings.remove(&channel);
        if let Some(mut binding) = removed {
            self.unbind_with_reset(&mut binding);
            for (name, id) in binding.subscriptions.drain(..) {
                self.link.unsubscribe(&name, id);
            }
            info!("{} {}", "CHANNEL_REMOVED".yellow(), channel);
        }
    }

    /// New receiver for `(channel, muted, volume)` state changes
    pub fn subscribe_state(&self) -> Receiver<ChannelStateEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, channel: ChannelId, is_muted: bool, volume: f32) {
        let event = ChannelStateEvent::new(channel, is_muted, volume);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Configured period between reconcile passes
    pub fn reconcile_interval(&self) -> Duration {
        let ms = self
            .settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .reconcile_interval_ms;
        Duration::from_millis(ms)
    }

    pub fn gate_open(&self) -> bool {
        self.lock_state().gate.is_open()
    }

    pub fn bound_channels(&self) -> Vec<ChannelId> {
        let state = self.lock_state();
        let mut channels: Vec<_> = state
            .bindings
            .values()
            .filter(|b| b.is_bound())
            .map(|b| b.channel)
            .collect();
        channels.sort();
        channels
    }

    pub fn binding_snapshot(&self, channel: ChannelId) -> Option<BindingSnapshot> {
        self.lock_state().bindings.get(&channel).map(|b| b.snapshot())
    }

    /// Entry point for every subscribed variable change
    pub fn on_variable_changed(&self, name: &str, value: ControlValue) {
        let mut state = self.lock_state();

        if name == state.track_fpa_variable || name == state.heading_vs_variable {
            drop(state);
            self.on_mode_changed(name, value.as_bool());
            return;
        }

        let gate_open = state.gate.is_open();
        let target = state.bindings.values().find_map(|b| {
            if b.knob_variable == name {
                Some((b.channel, true))
            } else if b.mute_variable == name {
                Some((b.channel, false))
            } else {
                None
            }
        });

        let Some((channel, is_knob)) = target else {
            debug!("Ignoring change of unsubscribed variable {}", name);
            return;
        };

        let latch_mute = self.latch_mute(channel);
        let Some(binding) = state.bindings.get_mut(&channel) else {
            return;
        };

        if is_knob {
            let raw = value.as_f32();
            if !raw.is_finite() {
                warn!("Ignoring non-finite volume {} for {}", raw, channel);
                return;
            }
            binding.pending_volume = Some(raw.clamp(0.0, 1.0));
        } else {
            binding.pending_mute = Some(value.as_bool());
        }

        if !gate_open || !binding.is_bound() {
            sync_debug!("{} change held for {} (gate open: {})", name, channel, gate_open);
            return;
        }

        let result = if is_knob {
            self.apply_volume(binding)
        } else {
            self.apply_mute(binding, latch_mute)
        };
        if let Err(e) = result {
            error!("{} {}: {}", "WRITE_FAILED".red(), channel, e);
        }
    }

    fn latch_mute(&self, channel: ChannelId) -> bool {
        if channel != ChannelId::Radio1 {
            return true;
        }
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .channel(channel)
            .latch_mute
    }

    fn on_mode_changed(&self, name: &str, active: bool) {
        let opened = {
            let mut state = self.lock_state();
            let was_open = state.gate.is_open();
            if name == state.track_fpa_variable {
                state.gate.track_fpa_mode = active;
            }
            if name == state.heading_vs_variable {
                state.gate.heading_vs_mode = active;
            }
            let now_open = state.gate.is_open();

            if was_open && !now_open {
                info!("{}: both modes off, resetting sessions", "GATE_CLOSED".yellow());
                self.reset_bindings(&mut state);
                false
            } else if !was_open && now_open {
                info!("{}", "GATE_OPENED".green());
                self.resync_bound(&mut state);
                true
            } else {
                false
            }
        };

        if opened {
            let settings = self.settings_snapshot();
            self.discover_unbound(&settings.engine_indicator);
        }
    }

    /// Push the pending knob value if it differs from what was last written
    fn apply_volume(&self, binding: &mut SessionBinding) -> Result<()> {
        let (Some(candidate), Some(session)) = (binding.pending_volume, binding.session.as_ref())
        else {
            return Ok(());
        };
        if binding.cached_volume == Some(candidate) {
            return Ok(());
        }

        session.set_volume(candidate)?;
        binding.cached_volume = Some(candidate);

        let muted = session
            .is_muted()
            .unwrap_or(binding.cached_mute.unwrap_or(false));
        sync_debug!("{} volume -> {:.3}", binding.channel, candidate);
        self.emit(binding.channel, muted, candidate);
        Ok(())
    }

    /// Push the pending mute flag, honoring the Radio1 latch policy
    fn apply_mute(&self, binding: &mut SessionBinding, latch_mute: bool) -> Result<()> {
        let Some(session) = binding.session.as_ref() else {
            return Ok(());
        };

        if binding.channel == ChannelId::Radio1 && !latch_mute {
            // App-level mute is not respected without latch; cockpit value ignored
            if session.is_muted()? {
                session.set_muted(false)?;
                binding.cached_mute = None;
                let volume = session.volume().unwrap_or(NEUTRAL_VOLUME);
                info!("{} {} app mute overridden", "UNLATCHED".yellow(), binding.channel);
                self.emit(binding.channel, false, volume);
            }
            return Ok(());
        }

        let Some(candidate) = binding.pending_mute else {
            return Ok(());
        };
        if binding.cached_mute == Some(candidate) {
            return Ok(());
        }

        session.set_muted(candidate)?;
        binding.cached_mute = Some(candidate);

        let volume = session
            .volume()
            .unwrap_or(binding.cached_volume.unwrap_or(NEUTRAL_VOLUME));
        sync_debug!("{} mute -> {}", binding.channel, candidate);
        self.emit(binding.channel, candidate, volume);
        Ok(())
    }

    fn resync_bound(&self, state: &mut EngineState) {
        let latch = self.latch_mute(ChannelId::Radio1);
        for binding in state.bindings.values_mut().filter(|b| b.is_bound()) {
            let latch_mute = binding.channel != ChannelId::Radio1 || latch;
            if let Err(e) = self.apply_volume(binding) {
                error!("{} {}: {}", "RESYNC_FAILED".red(), binding.channel, e);
            }
            if let Err(e) = self.apply_mute(binding, latch_mute) {
                error!("{} {}: {}", "RESYNC_FAILED".red(), binding.channel, e);
            }
        }
    }

    /// Force every bound session back to its neutral volume, unmuted
    pub fn reset_all(&self) {
        let mut state = self.lock_state();
        self.reset_bindings(&mut state);
    }

    fn reset_bindings(&self, state: &mut EngineState) {
        for binding in state.bindings.values_mut() {
            let Some(session) = binding.session.as_ref() else {
                continue;
            };
            match restore_neutral(session.as_ref()) {
                Ok(true) => self.emit(binding.channel, false, session.neutral_volume()),
                Ok(false) => {}
                Err(e) => error!("{} {}: {}", "RESET_FAILED".red(), binding.channel, e),
            }
            binding.cached_volume = None;
            binding.cached_mute = None;
        }
    }

    fn unbind_with_reset(&self, binding: &mut SessionBinding) {
        let owner = binding.bound_process.clone().unwrap_or_default();
        let Some(session) = binding.release() else {
            return;
        };
        match restore_neutral(session.as_ref()) {
            Ok(true) => self.emit(binding.channel, false, session.neutral_volume()),
            Ok(false) => {}
            Err(e) => debug!("Could not restore {} before release: {}", owner, e),
        }
        info!("{} {} ({})", "SESSION_RELEASED".yellow(), binding.channel, owner);
    }

    /// Periodic pass: config changes, then liveness, then the Intercom
    /// engine check, then discovery.
    pub fn reconcile(&self) {
        let _pass = self.reconcile_lock.lock().unwrap_or_else(|e| e.into_inner());
        let settings = self.settings_snapshot();

        if self.lock_state().applied.is_none() {
            warn!("reconcile() called before initialize(), skipping");
            return;
        }

        self.apply_config_changes(&settings.channels);
        self.release_dead_sessions();
        self.check_engine_liveness(&settings.engine_indicator);
        self.discover_unbound(&settings.engine_indicator);
    }

    fn apply_config_changes(&self, channels: &BTreeMap<ChannelId, ChannelSettings>) {
        let previous = self.lock_state().applied.clone().unwrap_or_default();

        for channel in ChannelId::ALL {
            let before = previous.get(&channel);
            let after = channels.get(&channel);
            if before == after {
                continue;
            }
            let was_enabled = before.map_or(false, |c| c.enabled);

            match after.filter(|ch| ch.enabled) {
                Some(ch) if !was_enabled => {
                    info!("{} {} enabled", "CONFIG_CHANGED".cyan(), channel);
                    self.add_channel(&ch.process_names, channel, &ch.knob_variable, &ch.mute_variable);
                }
                Some(ch) => {
                    let retarget = before.map_or(true, |old| {
                        old.process_names != ch.process_names
                            || old.knob_variable != ch.knob_variable
                            || old.mute_variable != ch.mute_variable
                    });
                    if retarget {
                        info!("{} {} retargeted", "CONFIG_CHANGED".cyan(), channel);
                        self.add_channel(&ch.process_names, channel, &ch.knob_variable, &ch.mute_variable);
                    }
                }
                None if was_enabled => {
                    info!("{} {} disabled", "CONFIG_CHANGED".cyan(), channel);
                    self.remove_channel(channel);
                }
                None => {}
            }
        }

        self.lock_state().applied = Some(channels.clone());
    }

    fn release_dead_sessions(&self) {
        // (channel, owner, tracks_process, available)
        let snapshot: Vec<(ChannelId, String, bool, bool)> = {
            let state = self.lock_state();
            state
                .bindings
                .values()
                .filter_map(|b| {
                    let session = b.session.as_ref()?;
                    Some((
                        b.channel,
                        b.bound_process.clone().unwrap_or_default(),
                        session.tracks_process(),
                        session.is_available(),
                    ))
                })
                .collect()
        };

        let dead: Vec<(ChannelId, String)> = snapshot
            .into_iter()
            .filter(|(_, owner, tracks, available)| {
                !available || (*tracks && !self.link.is_process_running(owner))
            })
            .map(|(channel, owner, _, _)| (channel, owner))
            .collect();

        let mut state = self.lock_state();
        for (channel, owner) in dead {
            if let Some(binding) = state.bindings.get_mut(&channel) {
                if binding.bound_process.as_deref() == Some(owner.as_str()) {
                    info!("{} {} owner {} exited", "SESSION_LOST".red(), channel, owner);
                    self.unbind_with_reset(binding);
                }
            }
        }
    }

    fn engine_started(&self, indicator: &str) -> bool {
        self.link.read_shared_flag(indicator) != 0
    }

    fn check_engine_liveness(&self, indicator: &str) {
        let intercom_bound = self
            .lock_state()
            .bindings
            .get(&ChannelId::Intercom)
            .map_or(false, |b| b.is_bound());
        if !intercom_bound || self.engine_started(indicator) {
            return;
        }

        let mut state = self.lock_state();
        if let Some(binding) = state.bindings.get_mut(&ChannelId::Intercom) {
            info!("{} releasing intercom", "ENGINE_STOPPED".red());
            self.unbind_with_reset(binding);
        }
    }

    fn discover_unbound(&self, indicator: &str) {
        let pending: Vec<(ChannelId, Vec<String>)> = {
            let state = self.lock_state();
            state
                .bindings
                .values()
                .filter(|b| !b.is_bound() && !b.candidate_process_names.is_empty())
                .map(|b| (b.channel, b.candidate_process_names.clone()))
                .collect()
        };

        for (channel, candidates) in pending {
            if channel == ChannelId::Intercom && !self.engine_started(indicator) {
                continue;
            }
            if let Err(e) = self.discover_channel(channel, &candidates) {
                error!("{} {}: {}", "DISCOVERY_FAILED".red(), channel, e);
            }
        }
    }

    fn discover_channel(&self, channel: ChannelId, candidates: &[String]) -> Result<()> {
        let Some(session) = discover_session(self.backend.as_ref(), candidates)? else {
            sync_debug!("No session yet for {} ({:?})", channel, candidates);
            return Ok(());
        };
        let owner = session.process_name()?;

        let latch_mute = self.latch_mute(channel);
        let mut state = self.lock_state();
        let gate_open = state.gate.is_open();
        let Some(binding) = state.bindings.get_mut(&channel) else {
            return Ok(());
        };
        // Configuration may have changed while enumerating
        if binding.is_bound() || binding.candidate_process_names != candidates {
            return Ok(());
        }

        info!(
            "{} {} -> {} via {}",
            "SESSION_BOUND".green(),
            channel,
            owner,
            self.backend.name()
        );
        binding.bind(session, owner);

        if gate_open {
            self.apply_volume(binding)?;
            self.apply_mute(binding, latch_mute)?;
        }
        Ok(())
    }

    /// Unsubscribe everything and release every session in neutral state
    pub fn shutdown(&self) {
        let (bindings, gate_subscriptions) = {
            let mut state = self.lock_state();
            state.applied = None;
            let bindings: Vec<_> = state.bindings.drain().map(|(_, b)| b).collect();
            (bindings, std::mem::take(&mut state.gate_subscriptions))
        };

        for mut binding in bindings {
            self.unbind_with_reset(&mut binding);
            for (name, id) in binding.subscriptions.drain(..) {
                self.link.unsubscribe(&name, id);
            }
        }
        for (name, id) in gate_subscriptions {
            self.link.unsubscribe(&name, id);
        }
        info!("{}", "SYNC_SHUTDOWN".yellow());
    }
}

/// Set the session's neutral volume, unmuted, if it is not already there.
/// Returns whether anything was written.
fn restore_neutral(session: &dyn MixerSession) -> Result<bool> {
    let neutral = session.neutral_volume();
    let needs_reset = match (session.volume(), session.is_muted()) {
        (Ok(volume), Ok(muted)) => (volume - neutral).abs() > VOLUME_EPSILON || muted,
        _ => true,
    };
    if !needs_reset {
        return Ok(false);
    }
    // Unmute even when the volume write is rejected
    let volume = session.set_volume(neutral);
    let mute = session.set_muted(false);
    volume.and(mute)?;
    Ok(true)
}
