// Windows per-process session mixer (WASAPI)
//
// Enumerates active render endpoints, then the active audio sessions on each,
// and resolves every session's owning process through sysinfo. Volume and
// mute go through the session's ISimpleAudioVolume.

use std::sync::{Arc, Once};
use tracing::debug;
use windows::core::ComInterface;
use windows::Win32::Foundation::BOOL;
use windows::Win32::Media::Audio::{
    eRender, AudioSessionStateActive, IAudioSessionControl, IAudioSessionControl2,
    IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator, ISimpleAudioVolume,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED};

use super::session::{AudioEndpoint, MixerSession, SessionBackend};
use super::simulator::SystemProcessProbe;
use super::types::{AudioSyncError, Result};

fn com_error(context: &str, e: windows::core::Error) -> AudioSyncError {
    AudioSyncError::Backend(format!("{}: {}", context, e))
}

/// Join the multithreaded apartment on the calling thread
fn ensure_com() {
    thread_local! {
        static COM_INIT: Once = Once::new();
    }
    COM_INIT.with(|once| {
        once.call_once(|| {
            // Already-initialized threads report S_FALSE or a mode mismatch; both are usable
            let _ = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        })
    });
}

pub struct WasapiSessionBackend {
    probe: Arc<SystemProcessProbe>,
}

impl WasapiSessionBackend {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(SystemProcessProbe::new()),
        }
    }
}

impl Default for WasapiSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for WasapiSessionBackend {
    fn name(&self) -> &'static str {
        "wasapi"
    }

    fn endpoints(&self) -> Result<Vec<Box<dyn AudioEndpoint>>> {
        ensure_com();
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
                .map_err(|e| com_error("device enumerator", e))?;
        let collection = unsafe { enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
            .map_err(|e| com_error("EnumAudioEndpoints", e))?;
        let count = unsafe { collection.GetCount() }.map_err(|e| com_error("GetCount", e))?;

        let mut endpoints: Vec<Box<dyn AudioEndpoint>> = Vec::with_capacity(count as usize);
        for index in 0..count {
            match unsafe { collection.Item(index) } {
                Ok(device) => endpoints.push(Box::new(WasapiEndpoint {
                    device,
                    index,
                    probe: self.probe.clone(),
                })),
                Err(e) => debug!("Skipping render endpoint {}: {}", index, e),
            }
        }
        Ok(endpoints)
    }
}

struct WasapiEndpoint {
    device: IMMDevice,
    index: u32,
    probe: Arc<SystemProcessProbe>,
}

impl AudioEndpoint for WasapiEndpoint {
    fn name(&self) -> String {
        format!("render endpoint {}", self.index)
    }

    fn sessions(&self) -> Result<Vec<Box<dyn MixerSession>>> {
        let manager: IAudioSessionManager2 = unsafe { self.device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| com_error("IAudioSessionManager2", e))?;
        let sessions = unsafe { manager.GetSessionEnumerator() }
            .map_err(|e| com_error("GetSessionEnumerator", e))?;
        let count = unsafe { sessions.GetCount() }.map_err(|e| com_error("GetCount", e))?;

        let mut active: Vec<Box<dyn MixerSession>> = Vec::new();
        for index in 0..count {
            let control = match unsafe { sessions.GetSession(index) } {
                Ok(control) => control,
                Err(e) => {
                    debug!("Skipping session {} on {}: {}", index, self.name(), e);
                    continue;
                }
            };
            match WasapiSession::from_control(control, self.probe.clone()) {
                Ok(Some(session)) => active.push(Box::new(session)),
                Ok(None) => {}
                Err(e) => debug!("Skipping session {} on {}: {}", index, self.name(), e),
            }
        }
        Ok(active)
    }
}

pub struct WasapiSession {
    control: IAudioSessionControl2,
    volume: ISimpleAudioVolume,
    probe: Arc<SystemProcessProbe>,
}

// Session interfaces are created in the MTA and are free-threaded
unsafe impl Send for WasapiSession {}

impl WasapiSession {
    /// `None` for sessions that are not currently active
    fn from_control(
        control: IAudioSessionControl,
        probe: Arc<SystemProcessProbe>,
    ) -> Result<Option<Self>> {
        let state = unsafe { control.GetState() }.map_err(|e| com_error("GetState", e))?;
        if state != AudioSessionStateActive {
            return Ok(None);
        }
        let volume: ISimpleAudioVolume = control
            .cast()
            .map_err(|e| com_error("ISimpleAudioVolume", e))?;
        let control: IAudioSessionControl2 = control
            .cast()
            .map_err(|e| com_error("IAudioSessionControl2", e))?;
        Ok(Some(Self {
            control,
            volume,
            probe,
        }))
    }
}

impl MixerSession for WasapiSession {
    fn process_name(&self) -> Result<String> {
        let pid = unsafe { self.control.GetProcessId() }
            .map_err(|e| com_error("GetProcessId", e))?;
        self.probe
            .process_name(pid)
            .ok_or_else(|| AudioSyncError::SessionLost {
                process: format!("pid {}", pid),
            })
    }

    fn volume(&self) -> Result<f32> {
        unsafe { self.volume.GetMasterVolume() }.map_err(|e| com_error("GetMasterVolume", e))
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        unsafe { self.volume.SetMasterVolume(volume.clamp(0.0, 1.0), std::ptr::null()) }
            .map_err(|e| com_error("SetMasterVolume", e))
    }

    fn is_muted(&self) -> Result<bool> {
        unsafe { self.volume.GetMute() }
            .map(|muted| muted.as_bool())
            .map_err(|e| com_error("GetMute", e))
    }

    fn set_muted(&self, muted: bool) -> Result<()> {
        unsafe { self.volume.SetMute(BOOL::from(muted), std::ptr::null()) }
            .map_err(|e| com_error("SetMute", e))
    }
}
