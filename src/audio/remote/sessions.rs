// Remote mixer strips and buses as engine sessions
//
// With the remote mixer selected, a channel's candidate names are target
// ids such as `Strip[3]` or `Bus[0]`. The single "endpoint" lists every
// target of the installed product.

use std::sync::Arc;

use super::backend::{gain_to_volume, volume_to_gain, RemoteMixerBackend};
use super::RemoteMixerError;
use crate::audio::session::{AudioEndpoint, MixerSession, SessionBackend};
use crate::audio::types::Result;

pub struct RemoteMixerSessions {
    backend: Arc<RemoteMixerBackend>,
}

impl RemoteMixerSessions {
    pub fn new(backend: Arc<RemoteMixerBackend>) -> Self {
        Self { backend }
    }
}

impl SessionBackend for RemoteMixerSessions {
    fn name(&self) -> &'static str {
        "remote-mixer"
    }

    fn endpoints(&self) -> Result<Vec<Box<dyn AudioEndpoint>>> {
        if !self.backend.initialize() {
            return Err(RemoteMixerError::NotReady.into());
        }
        Ok(vec![Box::new(RemoteMixerEndpoint {
            backend: self.backend.clone(),
        })])
    }
}

struct RemoteMixerEndpoint {
    backend: Arc<RemoteMixerBackend>,
}

impl AudioEndpoint for RemoteMixerEndpoint {
    fn name(&self) -> String {
        format!("{:?}", self.backend.current_product_kind())
    }

    fn sessions(&self) -> Result<Vec<Box<dyn MixerSession>>> {
        Ok(self
            .backend
            .available_targets()
            .into_iter()
            .map(|target| {
                Box::new(RemoteStripSession::new(self.backend.clone(), target.id))
                    as Box<dyn MixerSession>
            })
            .collect())
    }
}

/// One strip or bus; volume is its gain mapped onto [0, 1]
pub struct RemoteStripSession {
    backend: Arc<RemoteMixerBackend>,
    target: String,
}

impl RemoteStripSession {
    pub fn new(backend: Arc<RemoteMixerBackend>, target: String) -> Self {
        Self { backend, target }
    }

    fn param(&self, field: &str) -> String {
        format!("{}.{}", self.target, field)
    }
}

impl MixerSession for RemoteStripSession {
    fn process_name(&self) -> Result<String> {
        Ok(self.target.clone())
    }

    fn volume(&self) -> Result<f32> {
        let gain = self.backend.try_get_float_parameter(&self.param("Gain"))?;
        Ok(gain_to_volume(gain))
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        let gain = volume_to_gain(volume.clamp(0.0, 1.0));
        Ok(self
            .backend
            .try_set_float_parameter(&self.param("Gain"), gain)?)
    }

    fn is_muted(&self) -> Result<bool> {
        Ok(self.backend.try_get_float_parameter(&self.param("Mute"))? != 0.0)
    }

    fn set_muted(&self, muted: bool) -> Result<()> {
        let value = if muted { 1.0 } else { 0.0 };
        Ok(self
            .backend
            .try_set_float_parameter(&self.param("Mute"), value)?)
    }

    fn neutral_volume(&self) -> f32 {
        // Unity gain rather than the +12 dB top of the range
        gain_to_volume(0.0)
    }

    fn tracks_process(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        self.backend.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::remote::api::{MockRemoteMixerApi, RemoteApiLoader, RemoteMixerApi};
    use crate::audio::engine::SyncEngine;
    use crate::audio::session::discover_session;
    use crate::audio::simulator::{SimulatorLink, SubscriptionId, VariableCallback};
    use crate::audio::types::{ChannelId, ControlValue};
    use crate::config::{self, BridgeSettings};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    struct PotatoLoader;

    impl RemoteApiLoader for PotatoLoader {
        fn load(
            &self,
            _override_path: Option<&Path>,
        ) -> std::result::Result<Box<dyn RemoteMixerApi>, RemoteMixerError> {
            let mut api = MockRemoteMixerApi::new();
            api.expect_login().return_const(0);
            api.expect_logout().return_const(0);
            api.expect_product_type().returning(|| Ok(3));
            api.expect_get_string().returning(|_| Ok(String::new()));
            api.expect_get_float().returning(|_| Ok(0.0));
            api.expect_set_float().return_const(0);
            Ok(Box::new(api))
        }

        fn probe(&self, _override_path: Option<&Path>) -> std::result::Result<String, RemoteMixerError> {
            Ok("potato".into())
        }
    }

    struct MissingLoader;

    impl RemoteApiLoader for MissingLoader {
        fn load(
            &self,
            _override_path: Option<&Path>,
        ) -> std::result::Result<Box<dyn RemoteMixerApi>, RemoteMixerError> {
            Err(RemoteMixerError::LibraryNotFound { path: "x".into() })
        }

        fn probe(&self, _override_path: Option<&Path>) -> std::result::Result<String, RemoteMixerError> {
            Err(RemoteMixerError::LibraryNotFound { path: "x".into() })
        }
    }

    #[test]
    fn test_discovers_configured_bus() {
        let backend = Arc::new(RemoteMixerBackend::with_loader(Box::new(PotatoLoader)));
        let sessions = RemoteMixerSessions::new(backend);

        let found = discover_session(&sessions, &["Bus[7]".to_string()]).unwrap();
        let session = found.expect("Potato has eight buses");
        assert_eq!(session.process_name().unwrap(), "Bus[7]");
        assert!(!session.tracks_process());
        assert!(session.is_available());
        // 0 dB reads back as unity
        assert!((session.volume().unwrap() - session.neutral_volume()).abs() < 1e-6);

        assert!(discover_session(&sessions, &["Bus[8]".to_string()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unavailable_backend_fails_enumeration() {
        let backend = Arc::new(RemoteMixerBackend::with_loader(Box::new(MissingLoader)));
        let sessions = RemoteMixerSessions::new(backend);
        assert!(discover_session(&sessions, &["Strip[0]".to_string()]).is_err());
    }

    /// Potato whose float parameters are remembered between calls
    struct RecordingLoader {
        params: Arc<Mutex<HashMap<String, f32>>>,
    }

    impl RemoteApiLoader for RecordingLoader {
        fn load(
            &self,
            _override_path: Option<&Path>,
        ) -> std::result::Result<Box<dyn RemoteMixerApi>, RemoteMixerError> {
            let mut api = MockRemoteMixerApi::new();
            api.expect_login().return_const(0);
            api.expect_logout().return_const(0);
            api.expect_product_type().returning(|| Ok(3));
            api.expect_get_string().returning(|_| Ok(String::new()));
            let params = self.params.clone();
            api.expect_get_float()
                .returning(move |name| Ok(params.lock().unwrap().get(name).copied().unwrap_or(0.0)));
            let params = self.params.clone();
            api.expect_set_float().returning(move |name, value| {
                params.lock().unwrap().insert(name.to_string(), value);
                0
            });
            Ok(Box::new(api))
        }

        fn probe(&self, _override_path: Option<&Path>) -> std::result::Result<String, RemoteMixerError> {
            Ok("potato".into())
        }
    }

    /// Cockpit with fixed values; no notifications are sent
    #[derive(Default)]
    struct StaticCockpit {
        values: HashMap<String, ControlValue>,
        next_id: Mutex<u64>,
    }

    impl SimulatorLink for StaticCockpit {
        fn subscribe(&self, _name: &str, _callback: VariableCallback) -> SubscriptionId {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            SubscriptionId(*next)
        }

        fn unsubscribe(&self, _name: &str, _id: SubscriptionId) {}

        fn read_variable(&self, name: &str) -> Option<ControlValue> {
            self.values.get(name).copied()
        }

        fn is_process_running(&self, _name: &str) -> bool {
            false
        }

        fn read_shared_flag(&self, _name: &str) -> i32 {
            0
        }
    }

    #[test]
    fn test_released_strip_returns_to_unity_gain() {
        let params = Arc::new(Mutex::new(HashMap::new()));
        let backend = Arc::new(RemoteMixerBackend::with_loader(Box::new(RecordingLoader {
            params: params.clone(),
        })));

        let mut settings = BridgeSettings::default();
        let radio = settings.channel_mut(ChannelId::Radio2);
        radio.enabled = true;
        radio.process_names = "Strip[0]".into();
        let (knob, mute) = (radio.knob_variable.clone(), radio.mute_variable.clone());

        let mut cockpit = StaticCockpit::default();
        cockpit.values.insert(settings.gate.track_fpa_variable.clone(), ControlValue::Bool(true));
        cockpit.values.insert(knob, ControlValue::Float(0.25));
        cockpit.values.insert(mute, ControlValue::Bool(true));

        let engine = SyncEngine::new(
            Arc::new(cockpit),
            Arc::new(RemoteMixerSessions::new(backend)),
            config::shared(settings),
        );
        engine.initialize();
        engine.reconcile();
        assert_eq!(engine.bound_channels(), vec![ChannelId::Radio2]);
        {
            let params = params.lock().unwrap();
            assert!((params["Strip[0].Gain"] - -42.0).abs() < 1e-3);
            assert_eq!(params["Strip[0].Mute"], 1.0);
        }

        engine.remove_channel(ChannelId::Radio2);
        let params = params.lock().unwrap();
        assert!(params["Strip[0].Gain"].abs() < 1e-4, "0 dB, not the +12 dB top");
        assert_eq!(params["Strip[0].Mute"], 0.0);
    }
}
