// Audio module - cockpit control to mixer session synchronization
//
// - types: channel identities, control values, events and errors
// - simulator: simulator data-access boundary and process probe
// - session: mixer session / endpoint / backend traits and discovery
// - binding: per-channel binding record and the hardware-mode gate
// - engine: the synchronization engine
// - service: periodic reconcile loop
// - remote: third-party remote mixer backend
// - wasapi: Windows per-process session mixer

pub mod binding;
pub mod engine;
pub mod remote;
pub mod service;
pub mod session;
pub mod simulator;
pub mod types;

#[cfg(windows)]
pub mod wasapi;

pub use binding::{BindingSnapshot, HardwareModeGate, SessionBinding};
pub use engine::SyncEngine;
pub use remote::{
    get_remote_mixer, DiagnosticsReport, RemoteMixerBackend, RemoteMixerError,
    RemoteMixerSessions,
};
pub use service::SyncService;
pub use session::{discover_session, AudioEndpoint, MixerSession, SessionBackend};
pub use simulator::{
    normalize_process_name, SimulatorLink, SubscriptionId, SystemProcessProbe, VariableCallback,
};
pub use types::{AudioSyncError, ChannelId, ChannelStateEvent, ControlValue, Result};

#[cfg(windows)]
pub use wasapi::WasapiSessionBackend;
