// Mixer session abstraction and session discovery
//
// A backend exposes render endpoints, each endpoint exposes the sessions
// currently playing through it. The OS session mixer and the remote mixer
// both implement these traits so the engine never branches on backend.

use tracing::debug;

use super::types::Result;

/// One process's (or one strip's) volume/mute controls
pub trait MixerSession: Send {
    /// Name of the owning process (or strip/bus id for the remote mixer)
    fn process_name(&self) -> Result<String>;

    fn volume(&self) -> Result<f32>;

    fn set_volume(&self, volume: f32) -> Result<()>;

    fn is_muted(&self) -> Result<bool>;

    fn set_muted(&self, muted: bool) -> Result<()>;

    /// Volume a released session is restored to
    fn neutral_volume(&self) -> f32 {
        1.0
    }

    /// Whether liveness should be judged by looking the owner up as a process.
    /// Sessions not owned by a process answer through `is_available` instead.
    fn tracks_process(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// An active audio render endpoint
pub trait AudioEndpoint {
    fn name(&self) -> String;

    /// Currently active sessions on this endpoint
    fn sessions(&self) -> Result<Vec<Box<dyn MixerSession>>>;
}

pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Currently active render endpoints
    fn endpoints(&self) -> Result<Vec<Box<dyn AudioEndpoint>>>;
}

/// Find the first session whose owning process matches a candidate.
///
/// Candidates are tried in order for every session; the first match ends
/// both loops. Sessions whose owner cannot be resolved are skipped.
pub fn discover_session(
    backend: &dyn SessionBackend,
    candidates: &[String],
) -> Result<Option<Box<dyn MixerSession>>> {
    if candidates.is_empty() {
        return Ok(None);
    }

    for endpoint in backend.endpoints()? {
        let sessions = match endpoint.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                debug!("Skipping endpoint {}: {}", endpoint.name(), e);
                continue;
            }
        };

        for session in sessions {
            let owner = match session.process_name() {
                Ok(owner) => owner,
                Err(e) => {
                    debug!("Skipping session on {}: {}", endpoint.name(), e);
                    continue;
                }
            };

            if candidates.iter().any(|candidate| *candidate == owner) {
                debug!("Matched session '{}' on {}", owner, endpoint.name());
                return Ok(Some(session));
            }
        }
    }

    Ok(None)
}
