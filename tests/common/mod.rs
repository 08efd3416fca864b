// Shared fakes for the integration tests: an in-memory simulator link and a
// session backend whose sessions share state with the test.

#![allow(dead_code)]

use cockpit_audio_lib::audio::*;
use cockpit_audio_lib::config::{self, BridgeSettings, SharedSettings};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TRACK_FPA: &str = "autopilot/trk_fpa_mode";
pub const HEADING_VS: &str = "autopilot/hdg_vs_mode";
pub const ENGINE_FLAG: &str = "ENGINE_STARTED_INDICATOR";

#[derive(Default)]
pub struct FakeSimulator {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<String, Vec<(SubscriptionId, VariableCallback)>>>,
    values: Mutex<HashMap<String, ControlValue>>,
    running: Mutex<HashSet<String>>,
    flags: Mutex<HashMap<String, i32>>,
    on_subscribe: Mutex<HashMap<String, ControlValue>>,
}

impl FakeSimulator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store the value and notify subscribers, like the data-access layer would
    pub fn fire(&self, name: &str, value: impl Into<ControlValue>) {
        let value = value.into();
        let old = self
            .values
            .lock()
            .unwrap()
            .insert(name.to_string(), value)
            .unwrap_or(ControlValue::Float(0.0));
        self.notify(name, old, value);
    }

    /// Deliver `value` to subscribers from inside the next `subscribe(name)`.
    /// `read_variable` keeps returning the stored value, as a polled snapshot
    /// that lags the notification would.
    pub fn change_during_subscribe(&self, name: &str, value: impl Into<ControlValue>) {
        self.on_subscribe
            .lock()
            .unwrap()
            .insert(name.to_string(), value.into());
    }

    fn notify(&self, name: &str, old: ControlValue, value: ControlValue) {
        let callbacks: Vec<VariableCallback> = self
            .callbacks
            .lock()
            .unwrap()
            .get(name)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(name, old, value);
        }
    }

    /// Set a value without notifying anyone
    pub fn preset(&self, name: &str, value: impl Into<ControlValue>) {
        self.values.lock().unwrap().insert(name.to_string(), value.into());
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.callbacks.lock().unwrap().get(name).map_or(0, Vec::len)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.callbacks.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        let mut set = self.running.lock().unwrap();
        if running {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn set_flag(&self, name: &str, value: i32) {
        self.flags.lock().unwrap().insert(name.to_string(), value);
    }
}

impl SimulatorLink for FakeSimulator {
    fn subscribe(&self, name: &str, callback: VariableCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push((id, callback));
        let change = self.on_subscribe.lock().unwrap().remove(name);
        if let Some(value) = change {
            let old = self.read_variable(name).unwrap_or(ControlValue::Float(0.0));
            self.notify(name, old, value);
        }
        id
    }

    fn unsubscribe(&self, name: &str, id: SubscriptionId) {
        if let Some(subs) = self.callbacks.lock().unwrap().get_mut(name) {
            subs.retain(|(sub, _)| *sub != id);
        }
    }

    fn read_variable(&self, name: &str) -> Option<ControlValue> {
        self.values.lock().unwrap().get(name).copied()
    }

    fn is_process_running(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains(name)
    }

    fn read_shared_flag(&self, name: &str) -> i32 {
        self.flags.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub volume: f32,
    pub muted: bool,
    pub volume_writes: usize,
    pub mute_writes: usize,
    pub fail_writes: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            volume_writes: 0,
            mute_writes: 0,
            fail_writes: false,
        }
    }
}

/// Test-side view of a fake session
#[derive(Clone)]
pub struct SessionHandle {
    pub owner: String,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    pub fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    pub fn volume_writes(&self) -> usize {
        self.state.lock().unwrap().volume_writes
    }

    pub fn mute_writes(&self) -> usize {
        self.state.lock().unwrap().mute_writes
    }

    /// Change the session from outside the engine, like the user would in the app
    pub fn set_externally(&self, volume: f32, muted: bool) {
        let mut state = self.state.lock().unwrap();
        state.volume = volume;
        state.muted = muted;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

struct FakeSession {
    owner: String,
    state: Arc<Mutex<SessionState>>,
}

impl MixerSession for FakeSession {
    fn process_name(&self) -> Result<String> {
        Ok(self.owner.clone())
    }

    fn volume(&self) -> Result<f32> {
        Ok(self.state.lock().unwrap().volume)
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(AudioSyncError::Backend("volume write rejected".into()));
        }
        state.volume = volume;
        state.volume_writes += 1;
        Ok(())
    }

    fn is_muted(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().muted)
    }

    fn set_muted(&self, muted: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(AudioSyncError::Backend("mute write rejected".into()));
        }
        state.muted = muted;
        state.mute_writes += 1;
        Ok(())
    }
}

struct FakeEndpoint {
    sessions: Vec<SessionHandle>,
}

impl AudioEndpoint for FakeEndpoint {
    fn name(&self) -> String {
        "fake speakers".into()
    }

    fn sessions(&self) -> Result<Vec<Box<dyn MixerSession>>> {
        Ok(self
            .sessions
            .iter()
            .map(|h| {
                Box::new(FakeSession {
                    owner: h.owner.clone(),
                    state: h.state.clone(),
                }) as Box<dyn MixerSession>
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeBackend {
    sessions: Mutex<Vec<SessionHandle>>,
    enumerations: AtomicUsize,
    fail_enumeration: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_session(&self, owner: &str) -> SessionHandle {
        let handle = SessionHandle {
            owner: owner.to_string(),
            state: Arc::new(Mutex::new(SessionState::default())),
        };
        self.sessions.lock().unwrap().push(handle.clone());
        handle
    }

    pub fn remove_session(&self, owner: &str) {
        self.sessions.lock().unwrap().retain(|h| h.owner != owner);
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }
}

impl SessionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn endpoints(&self) -> Result<Vec<Box<dyn AudioEndpoint>>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(AudioSyncError::Backend("device enumerator unavailable".into()));
        }
        Ok(vec![Box::new(FakeEndpoint {
            sessions: self.sessions.lock().unwrap().clone(),
        })])
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub sim: Arc<FakeSimulator>,
    pub backend: Arc<FakeBackend>,
    pub settings: SharedSettings,
}

impl Harness {
    /// Engine over fakes with the given channels enabled, not yet initialized
    pub fn new(channels: &[(ChannelId, &str)]) -> Self {
        let mut settings = BridgeSettings::default();
        for &(channel, names) in channels {
            let ch = settings.channel_mut(channel);
            ch.enabled = true;
            ch.process_names = names.to_string();
        }
        let settings = config::shared(settings);
        let sim = FakeSimulator::new();
        let backend = FakeBackend::new();
        let engine = SyncEngine::new(sim.clone(), backend.clone(), settings.clone());
        Self {
            engine,
            sim,
            backend,
            settings,
        }
    }

    /// Initialized engine with the gate open
    pub fn open(channels: &[(ChannelId, &str)]) -> Self {
        let harness = Self::new(channels);
        harness.sim.preset(TRACK_FPA, true);
        harness.engine.initialize();
        harness
    }

    pub fn knob(&self, channel: ChannelId) -> String {
        self.settings.read().unwrap().channel(channel).knob_variable
    }

    pub fn mute(&self, channel: ChannelId) -> String {
        self.settings.read().unwrap().channel(channel).mute_variable
    }

    pub fn edit(&self, f: impl FnOnce(&mut BridgeSettings)) {
        f(&mut self.settings.write().unwrap());
    }

    /// Add a running application with an active session
    pub fn launch(&self, owner: &str) -> SessionHandle {
        self.sim.set_running(owner, true);
        self.backend.add_session(owner)
    }
}
