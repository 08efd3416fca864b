// Per-channel session binding and the hardware-mode gate

use super::session::MixerSession;
use super::simulator::SubscriptionId;
use super::types::ChannelId;
use crate::config::parse_process_names;

/// Mutable record tying one cockpit channel to (at most) one mixer session
pub struct SessionBinding {
    pub channel: ChannelId,
    pub candidate_process_names: Vec<String>,
    pub knob_variable: String,
    pub mute_variable: String,
    pub(crate) session: Option<Box<dyn MixerSession>>,
    /// Owner name the session matched on
    pub bound_process: Option<String>,
    /// `None` until the first write-through after binding
    pub cached_volume: Option<f32>,
    /// `None` while the session's mute state is unknown
    pub cached_mute: Option<bool>,
    /// Last control values seen, applied again when the binding (re)binds
    pub(crate) pending_volume: Option<f32>,
    pub(crate) pending_mute: Option<bool>,
    pub(crate) subscriptions: Vec<(String, SubscriptionId)>,
}

impl SessionBinding {
    pub fn new(
        channel: ChannelId,
        process_names: &str,
        knob_variable: &str,
        mute_variable: &str,
    ) -> Self {
        Self {
            channel,
            candidate_process_names: parse_process_names(process_names),
            knob_variable: knob_variable.to_string(),
            mute_variable: mute_variable.to_string(),
            session: None,
            bound_process: None,
            cached_volume: None,
            cached_mute: None,
            pending_volume: None,
            pending_mute: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn bind(&mut self, session: Box<dyn MixerSession>, owner: String) {
        self.session = Some(session);
        self.bound_process = Some(owner);
        self.cached_volume = None;
        self.cached_mute = None;
    }

    /// Drop the session handle. Callers restore neutral state first.
    pub(crate) fn release(&mut self) -> Option<Box<dyn MixerSession>> {
        self.cached_volume = None;
        self.cached_mute = None;
        self.bound_process = None;
        self.session.take()
    }

    pub fn snapshot(&self) -> BindingSnapshot {
        BindingSnapshot {
            channel: self.channel,
            candidate_process_names: self.candidate_process_names.clone(),
            bound: self.is_bound(),
            bound_process: self.bound_process.clone(),
            cached_volume: self.cached_volume,
            cached_mute: self.cached_mute,
        }
    }
}

/// Read-only view of a binding for hosts and tests
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSnapshot {
    pub channel: ChannelId,
    pub candidate_process_names: Vec<String>,
    pub bound: bool,
    pub bound_process: Option<String>,
    pub cached_volume: Option<f32>,
    pub cached_mute: Option<bool>,
}

/// Sync writes are only allowed while either mode indicator is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareModeGate {
    pub track_fpa_mode: bool,
    pub heading_vs_mode: bool,
}

impl HardwareModeGate {
    pub fn is_open(&self) -> bool {
        self.track_fpa_mode || self.heading_vs_mode
    }
}
