pub mod audio;
pub mod config;
pub mod log;

use colored::Colorize;
use std::sync::Arc;
use tracing::info;

pub use audio::{
    AudioSyncError, ChannelId, ChannelStateEvent, ControlValue, MixerSession, SessionBackend,
    SimulatorLink, SyncEngine, SyncService,
};
pub use config::{BridgeSettings, ChannelSettings, MixerBackendKind, SharedSettings};

/// Session backend for the configured mixer
pub fn create_session_backend(settings: &BridgeSettings) -> audio::Result<Arc<dyn SessionBackend>> {
    match settings.backend {
        MixerBackendKind::RemoteMixer => {
            let backend = audio::get_remote_mixer();
            backend.set_library_path(settings.remote_library_path.clone());
            info!("{}: remote mixer", "BACKEND_SELECTED".cyan());
            Ok(Arc::new(audio::RemoteMixerSessions::new(backend)))
        }
        MixerBackendKind::SystemMixer => system_mixer(),
    }
}

#[cfg(windows)]
fn system_mixer() -> audio::Result<Arc<dyn SessionBackend>> {
    info!("{}: system session mixer", "BACKEND_SELECTED".cyan());
    Ok(Arc::new(audio::WasapiSessionBackend::new()))
}

#[cfg(not(windows))]
fn system_mixer() -> audio::Result<Arc<dyn SessionBackend>> {
    Err(AudioSyncError::UnsupportedPlatform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_system_mixer_unsupported_off_windows() {
        let settings = BridgeSettings::default();
        assert!(matches!(
            create_session_backend(&settings),
            Err(AudioSyncError::UnsupportedPlatform)
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_remote_backend_selection() {
        let mut settings = BridgeSettings::default();
        settings.backend = MixerBackendKind::RemoteMixer;
        let backend = create_session_backend(&settings).unwrap();
        assert_eq!(backend.name(), "remote-mixer");
    }
}
