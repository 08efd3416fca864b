// Process-wide remote mixer backend
//
// Lifecycle: Uninitialized -> Loaded -> LoggedIn -> Shutdown. All native
// calls go through one mutex, which also serializes initialization, so the
// library is loaded and logged into at most once. Accessors initialize
// lazily and fall back to fixed values when the backend is unavailable.

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use super::api::{NativeApiLoader, RemoteApiLoader, RemoteMixerApi};
use super::{RemoteMixerError, Result};

pub const MIN_GAIN_DB: f32 = -60.0;
pub const MAX_GAIN_DB: f32 = 12.0;
const GAIN_SPAN_DB: f32 = MAX_GAIN_DB - MIN_GAIN_DB;

/// Map a strip gain in dB onto the normalized [0, 1] volume scale
pub fn gain_to_volume(gain_db: f32) -> f32 {
    (gain_db - MIN_GAIN_DB) / GAIN_SPAN_DB
}

/// Map a normalized volume onto the strip gain range in dB
pub fn volume_to_gain(volume: f32) -> f32 {
    volume * GAIN_SPAN_DB + MIN_GAIN_DB
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendState {
    Uninitialized,
    Loaded,
    LoggedIn,
    Shutdown,
}

/// Installed remote mixer edition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProductKind {
    NotInstalled,
    Voicemeeter,
    Banana,
    Potato,
}

impl ProductKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ProductKind::Voicemeeter,
            2 => ProductKind::Banana,
            3 => ProductKind::Potato,
            _ => ProductKind::NotInstalled,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ProductKind::NotInstalled => 0,
            ProductKind::Voicemeeter => 1,
            ProductKind::Banana => 2,
            ProductKind::Potato => 3,
        }
    }

    pub fn hardware_inputs(&self) -> usize {
        match self {
            ProductKind::NotInstalled => 0,
            ProductKind::Voicemeeter => 2,
            ProductKind::Banana => 3,
            ProductKind::Potato => 5,
        }
    }

    pub fn virtual_inputs(&self) -> usize {
        match self {
            ProductKind::NotInstalled => 0,
            ProductKind::Voicemeeter => 1,
            ProductKind::Banana => 2,
            ProductKind::Potato => 3,
        }
    }

    pub fn output_buses(&self) -> usize {
        match self {
            ProductKind::NotInstalled => 0,
            ProductKind::Voicemeeter => 2,
            ProductKind::Banana => 5,
            ProductKind::Potato => 8,
        }
    }

    /// Hardware (A) buses; the remainder are virtual (B) buses
    pub fn physical_buses(&self) -> usize {
        match self {
            ProductKind::NotInstalled => 0,
            ProductKind::Voicemeeter => 1,
            ProductKind::Banana => 3,
            ProductKind::Potato => 5,
        }
    }
}

/// Level tap points understood by the level call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelType {
    PreFaderInput = 0,
    PostFaderInput = 1,
    PostMuteInput = 2,
    Output = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetKind {
    HardwareInput,
    VirtualInput,
    OutputBus,
}

/// A strip or bus with a human label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixerTarget {
    pub id: String,
    pub label: String,
    pub kind: TargetKind,
}

pub fn strip_id(index: usize) -> String {
    format!("Strip[{}]", index)
}

pub fn bus_id(index: usize) -> String {
    format!("Bus[{}]", index)
}

struct Inner {
    state: BackendState,
    api: Option<Box<dyn RemoteMixerApi>>,
    failure_logged: bool,
}

pub struct RemoteMixerBackend {
    inner: Mutex<Inner>,
    library_path: RwLock<Option<PathBuf>>,
    loader: Box<dyn RemoteApiLoader>,
}

/// Process-wide backend over the native library
pub fn get_remote_mixer() -> Arc<RemoteMixerBackend> {
    static REMOTE_MIXER: LazyLock<Arc<RemoteMixerBackend>> =
        LazyLock::new(|| Arc::new(RemoteMixerBackend::native()));
    REMOTE_MIXER.clone()
}

impl RemoteMixerBackend {
    pub fn native() -> Self {
        Self::with_loader(Box::new(NativeApiLoader))
    }

    pub fn with_loader(loader: Box<dyn RemoteApiLoader>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BackendState::Uninitialized,
                api: None,
                failure_logged: false,
            }),
            library_path: RwLock::new(None),
            loader,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Override path tried before the default library names
    pub fn set_library_path(&self, path: Option<PathBuf>) {
        *self.library_path.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_path
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> BackendState {
        self.lock_inner().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BackendState::LoggedIn
    }

    /// Load the library and log in. No-op once logged in.
    pub fn initialize(&self) -> bool {
        let mut inner = self.lock_inner();
        self.initialize_locked(&mut inner)
    }

    fn initialize_locked(&self, inner: &mut Inner) -> bool {
        if inner.state == BackendState::LoggedIn {
            return true;
        }

        match self.load_and_login(inner) {
            Ok(code) => {
                info!(
                    "{}: logged in (code {})",
                    "REMOTE_MIXER_READY".green(),
                    code
                );
                inner.failure_logged = false;
                true
            }
            Err(e) => {
                if inner.failure_logged {
                    debug!("Remote mixer still unavailable: {}", e);
                } else {
                    error!("{}: {}", "REMOTE_MIXER_UNAVAILABLE".red(), e);
                    inner.failure_logged = true;
                }
                false
            }
        }
    }

    fn load_and_login(&self, inner: &mut Inner) -> Result<i32> {
        let path = self.library_path();
        let api = self.loader.load(path.as_deref())?;
        inner.state = BackendState::Loaded;

        let code = api.login();
        if code < 0 {
            // Dropping the api unloads the library
            drop(api);
            inner.state = BackendState::Uninitialized;
            return Err(RemoteMixerError::LoginFailed { code });
        }

        inner.api = Some(api);
        inner.state = BackendState::LoggedIn;
        Ok(code)
    }

    /// Log out and unload the library
    pub fn shutdown(&self) {
        let mut inner = self.lock_inner();
        if let Some(api) = inner.api.take() {
            let code = api.logout();
            if code < 0 {
                warn!("Remote mixer logout returned {}", code);
            }
            info!("{}", "REMOTE_MIXER_SHUTDOWN".yellow());
        }
        inner.state = BackendState::Shutdown;
    }

    /// Run `f` against the live api, initializing lazily
    fn with_api<T>(&self, f: impl FnOnce(&dyn RemoteMixerApi) -> Result<T>) -> Result<T> {
        let mut inner = self.lock_inner();
        if !self.initialize_locked(&mut inner) {
            return Err(RemoteMixerError::NotReady);
        }
        match inner.api.as_deref() {
            Some(api) => f(api),
            None => Err(RemoteMixerError::NotReady),
        }
    }

    fn call_failed(call: &str, code: i32) -> RemoteMixerError {
        RemoteMixerError::CallFailed {
            call: call.to_string(),
            code,
        }
    }

    fn check(call: &str, code: i32) -> Result<()> {
        if code < 0 {
            Err(Self::call_failed(call, code))
        } else {
            Ok(())
        }
    }

    pub fn run_product(&self, kind: ProductKind) -> bool {
        if kind == ProductKind::NotInstalled {
            return false;
        }
        self.with_api(|api| Self::check("run", api.run_product(kind.code())))
            .map_err(|e| warn!("Could not start {:?}: {}", kind, e))
            .is_ok()
    }

    pub fn current_product_kind(&self) -> ProductKind {
        self.with_api(|api| {
            api.product_type()
                .map_err(|code| Self::call_failed("type", code))
        })
        .map(ProductKind::from_code)
        .unwrap_or(ProductKind::NotInstalled)
    }

    /// Dotted version string (`3.1.0.2`) of the running product
    pub fn product_version(&self) -> Option<String> {
        let packed = self
            .with_api(|api| {
                api.product_version()
                    .map_err(|code| Self::call_failed("version", code))
            })
            .ok()?;
        Some(format!(
            "{}.{}.{}.{}",
            (packed >> 24) & 0xff,
            (packed >> 16) & 0xff,
            (packed >> 8) & 0xff,
            packed & 0xff
        ))
    }

    pub fn hardware_input_count(&self) -> usize {
        self.current_product_kind().hardware_inputs()
    }

    pub fn virtual_input_count(&self) -> usize {
        self.current_product_kind().virtual_inputs()
    }

    pub fn output_bus_count(&self) -> usize {
        self.current_product_kind().output_buses()
    }

    pub fn try_get_float_parameter(&self, name: &str) -> Result<f32> {
        self.with_api(|api| api.get_float(name).map_err(|code| Self::call_failed(name, code)))
    }

    pub fn try_set_float_parameter(&self, name: &str, value: f32) -> Result<()> {
        self.with_api(|api| Self::check(name, api.set_float(name, value)))
    }

    /// Float parameter, or 0.0 when unavailable
    pub fn get_float_parameter(&self, name: &str) -> f32 {
        self.try_get_float_parameter(name).unwrap_or_else(|e| {
            debug!("get {} failed: {}", name, e);
            0.0
        })
    }

    pub fn set_float_parameter(&self, name: &str, value: f32) -> bool {
        self.try_set_float_parameter(name, value)
            .map_err(|e| debug!("set {} failed: {}", name, e))
            .is_ok()
    }

    /// String parameter, or empty when unavailable
    pub fn get_string_parameter(&self, name: &str) -> String {
        self.with_api(|api| api.get_string(name).map_err(|code| Self::call_failed(name, code)))
            .unwrap_or_default()
    }

    pub fn set_string_parameter(&self, name: &str, value: &str) -> bool {
        self.with_api(|api| Self::check(name, api.set_string(name, value)))
            .is_ok()
    }

    /// Apply a batch script such as `Strip[0].Mute=1;Bus[1].Gain=-6`
    pub fn set_parameters(&self, script: &str) -> bool {
        self.with_api(|api| Self::check("script", api.set_parameters(script)))
            .is_ok()
    }

    /// Gain in dB of `strip` (e.g. `"Strip[0]"`), or -60 dB when unavailable
    pub fn get_strip_gain(&self, strip: &str) -> f32 {
        self.try_get_float_parameter(&format!("{}.Gain", strip))
            .unwrap_or(MIN_GAIN_DB)
    }

    pub fn set_strip_gain(&self, strip: &str, gain_db: f32) -> bool {
        self.set_float_parameter(
            &format!("{}.Gain", strip),
            gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB),
        )
    }

    /// Mute flag of `strip`, or false when unavailable
    pub fn get_strip_mute(&self, strip: &str) -> bool {
        self.try_get_float_parameter(&format!("{}.Mute", strip))
            .map(|v| v != 0.0)
            .unwrap_or(false)
    }

    pub fn set_strip_mute(&self, strip: &str, muted: bool) -> bool {
        self.set_float_parameter(&format!("{}.Mute", strip), if muted { 1.0 } else { 0.0 })
    }

    pub fn get_bus_gain(&self, bus: &str) -> f32 {
        self.get_strip_gain(bus)
    }

    pub fn set_bus_gain(&self, bus: &str, gain_db: f32) -> bool {
        self.set_strip_gain(bus, gain_db)
    }

    pub fn get_bus_mute(&self, bus: &str) -> bool {
        self.get_strip_mute(bus)
    }

    pub fn set_bus_mute(&self, bus: &str, muted: bool) -> bool {
        self.set_strip_mute(bus, muted)
    }

    pub fn try_parameters_dirty(&self) -> Result<bool> {
        self.with_api(|api| {
            let code = api.parameters_dirty();
            Self::check("dirty", code)?;
            Ok(code > 0)
        })
    }

    /// Whether parameters changed since the last poll; false when unavailable
    pub fn parameters_dirty(&self) -> bool {
        self.try_parameters_dirty().unwrap_or(false)
    }

    /// Meter level for a channel, or 0.0 when unavailable
    pub fn level_for(&self, level_type: LevelType, channel: i32) -> f32 {
        self.with_api(|api| {
            api.level(level_type as i32, channel)
                .map_err(|code| Self::call_failed("level", code))
        })
        .unwrap_or(0.0)
    }

    /// Every strip and bus of the installed product with its label
    pub fn available_targets(&self) -> Vec<MixerTarget> {
        let kind = self.current_product_kind();
        let mut targets = Vec::new();

        for i in 0..kind.hardware_inputs() + kind.virtual_inputs() {
            let hardware = i < kind.hardware_inputs();
            let fallback = if hardware {
                format!("Hardware Input {}", i + 1)
            } else {
                format!("Virtual Input {}", i - kind.hardware_inputs() + 1)
            };
            let id = strip_id(i);
            targets.push(MixerTarget {
                label: self.label_or(&id, fallback),
                id,
                kind: if hardware {
                    TargetKind::HardwareInput
                } else {
                    TargetKind::VirtualInput
                },
            });
        }

        for i in 0..kind.output_buses() {
            let fallback = if i < kind.physical_buses() {
                format!("A{}", i + 1)
            } else {
                format!("B{}", i - kind.physical_buses() + 1)
            };
            let id = bus_id(i);
            targets.push(MixerTarget {
                label: self.label_or(&id, fallback),
                id,
                kind: TargetKind::OutputBus,
            });
        }

        targets
    }

    fn label_or(&self, id: &str, fallback: String) -> String {
        let label = self.get_string_parameter(&format!("{}.Label", id));
        if label.trim().is_empty() {
            fallback
        } else {
            label
        }
    }

    /// Library probe without touching the live session
    pub fn probe_library(&self) -> Result<String> {
        self.loader.probe(self.library_path().as_deref())
    }

    pub fn run_diagnostics(&self) -> bool {
        let report = super::diagnostics::run_diagnostics(self);
        report.passed()
    }
}

impl Drop for RemoteMixerBackend {
    fn drop(&mut self) {
        if self.is_ready() {
            self.shutdown();
        }
    }
}
