// Remote mixer module - third-party mixer reached through its native remote library
//
// - library: owned dlopen/LoadLibrary handle
// - api: typed entry point table behind the RemoteMixerApi trait
// - backend: process-wide backend with lazy init and degraded fallbacks
// - sessions: strips/buses exposed as mixer sessions for the sync engine
// - diagnostics: best-effort self test

pub mod api;
pub mod backend;
pub mod diagnostics;
pub mod library;
pub mod sessions;

pub use api::{NativeApiLoader, NativeRemoteApi, RemoteApiLoader, RemoteMixerApi};
pub use backend::{
    gain_to_volume, get_remote_mixer, volume_to_gain, BackendState, LevelType, MixerTarget,
    ProductKind, RemoteMixerBackend, TargetKind, MAX_GAIN_DB, MIN_GAIN_DB,
};
pub use diagnostics::{run_diagnostics, DiagnosticCheck, DiagnosticsReport};
pub use library::NativeLibrary;
pub use sessions::{RemoteMixerSessions, RemoteStripSession};

/// Errors raised while loading or talking to the remote mixer library
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteMixerError {
    #[error("Remote mixer library not found: {path}")]
    LibraryNotFound { path: String },

    #[error("Remote mixer library is missing entry point {name}")]
    MissingEntryPoint { name: String },

    #[error("Remote mixer login failed (code {code})")]
    LoginFailed { code: i32 },

    #[error("Remote mixer backend is not ready")]
    NotReady,

    #[error("Remote mixer call {call} failed (code {code})")]
    CallFailed { call: String, code: i32 },
}

pub type Result<T> = std::result::Result<T, RemoteMixerError>;
