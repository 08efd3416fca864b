// Typed entry point table for the remote mixer's native API
//
// Every exported function the backend uses is resolved once at load time.
// A missing export fails the whole load; the partially loaded library is
// dropped (and unloaded) on that early return.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;

use super::library::NativeLibrary;
use super::{RemoteMixerError, Result};

/// Returned for names that cannot be passed to C (interior NUL)
pub const INVALID_NAME: i32 = -100;

const STRING_PARAM_LEN: usize = 512;

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_LIBRARY_NAMES: &[&str] = &[
    "VoicemeeterRemote64.dll",
    "C:\\Program Files (x86)\\VB\\Voicemeeter\\VoicemeeterRemote64.dll",
];

#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_LIBRARY_NAMES: &[&str] = &[
    "VoicemeeterRemote.dll",
    "C:\\Program Files\\VB\\Voicemeeter\\VoicemeeterRemote.dll",
];

/// Exports any genuine remote library carries
pub const KNOWN_ENTRY_POINTS: &[&str] = &[
    "VBVMR_Login",
    "VBVMR_Logout",
    "VBVMR_GetVoicemeeterType",
];

/// One method per native entry point. Status codes are passed through raw:
/// zero or positive is success, negative is an API error.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteMixerApi: Send {
    fn login(&self) -> i32;

    fn logout(&self) -> i32;

    fn run_product(&self, product_code: i32) -> i32;

    fn product_type(&self) -> std::result::Result<i32, i32>;

    fn product_version(&self) -> std::result::Result<i32, i32>;

    fn parameters_dirty(&self) -> i32;

    fn get_float(&self, name: &str) -> std::result::Result<f32, i32>;

    fn set_float(&self, name: &str, value: f32) -> i32;

    fn get_string(&self, name: &str) -> std::result::Result<String, i32>;

    fn set_string(&self, name: &str, value: &str) -> i32;

    fn set_parameters(&self, script: &str) -> i32;

    fn level(&self, level_type: i32, channel: i32) -> std::result::Result<f32, i32>;
}

/// Produces API instances; split out so tests can substitute the native library
pub trait RemoteApiLoader: Send + Sync {
    fn load(&self, override_path: Option<&Path>) -> Result<Box<dyn RemoteMixerApi>>;

    /// Load the library on its own (no login) and report which known entry
    /// point it exports
    fn probe(&self, override_path: Option<&Path>) -> Result<String>;
}

pub struct NativeApiLoader;

impl RemoteApiLoader for NativeApiLoader {
    fn load(&self, override_path: Option<&Path>) -> Result<Box<dyn RemoteMixerApi>> {
        let library = NativeLibrary::open_first(override_path, DEFAULT_LIBRARY_NAMES)?;
        Ok(Box::new(NativeRemoteApi::resolve(library)?))
    }

    fn probe(&self, override_path: Option<&Path>) -> Result<String> {
        let library = NativeLibrary::open_first(override_path, DEFAULT_LIBRARY_NAMES)?;
        KNOWN_ENTRY_POINTS
            .iter()
            .find(|name| library.has_symbol(name))
            .map(|name| format!("{} exports {}", library.path().display(), name))
            .ok_or_else(|| RemoteMixerError::MissingEntryPoint {
                name: KNOWN_ENTRY_POINTS.join("|"),
            })
    }
}

type StatusFn = unsafe extern "system" fn() -> i32;
type RunFn = unsafe extern "system" fn(i32) -> i32;
type OutI32Fn = unsafe extern "system" fn(*mut i32) -> i32;
type GetFloatFn = unsafe extern "system" fn(*const c_char, *mut f32) -> i32;
type SetFloatFn = unsafe extern "system" fn(*const c_char, f32) -> i32;
type GetStringFn = unsafe extern "system" fn(*const c_char, *mut c_char) -> i32;
type SetStringFn = unsafe extern "system" fn(*const c_char, *const c_char) -> i32;
type ScriptFn = unsafe extern "system" fn(*const c_char) -> i32;
type LevelFn = unsafe extern "system" fn(i32, i32, *mut f32) -> i32;

macro_rules! resolve {
    ($library:expr, $name:literal) => {{
        let ptr: *mut c_void = $library.symbol($name)?;
        // Signature fixed by the remote API header
        unsafe { std::mem::transmute(ptr) }
    }};
}

/// Function pointers into a loaded remote library. The library field keeps
/// the pointers valid and unloads on drop.
pub struct NativeRemoteApi {
    VBVMR_Login: StatusFn,
    VBVMR_Logout: StatusFn,
    VBVMR_RunVoicemeeter: RunFn,
    VBVMR_GetVoicemeeterType: OutI32Fn,
    VBVMR_GetVoicemeeterVersion: OutI32Fn,
    VBVMR_IsParametersDirty: StatusFn,
    VBVMR_GetParameterFloat: GetFloatFn,
    VBVMR_SetParameterFloat: SetFloatFn,
    VBVMR_GetParameterStringA: GetStringFn,
    VBVMR_SetParameterStringA: SetStringFn,
    VBVMR_SetParameters: ScriptFn,
    VBVMR_GetLevel: LevelFn,
    _library: NativeLibrary,
}

impl NativeRemoteApi {
    pub fn resolve(library: NativeLibrary) -> Result<Self> {
        Ok(Self {
            VBVMR_Login: resolve!(library, "VBVMR_Login"),
            VBVMR_Logout: resolve!(library, "VBVMR_Logout"),
            VBVMR_RunVoicemeeter: resolve!(library, "VBVMR_RunVoicemeeter"),
            VBVMR_GetVoicemeeterType: resolve!(library, "VBVMR_GetVoicemeeterType"),
            VBVMR_GetVoicemeeterVersion: resolve!(library, "VBVMR_GetVoicemeeterVersion"),
            VBVMR_IsParametersDirty: resolve!(library, "VBVMR_IsParametersDirty"),
            VBVMR_GetParameterFloat: resolve!(library, "VBVMR_GetParameterFloat"),
            VBVMR_SetParameterFloat: resolve!(library, "VBVMR_SetParameterFloat"),
            VBVMR_GetParameterStringA: resolve!(library, "VBVMR_GetParameterStringA"),
            VBVMR_SetParameterStringA: resolve!(library, "VBVMR_SetParameterStringA"),
            VBVMR_SetParameters: resolve!(library, "VBVMR_SetParameters"),
            VBVMR_GetLevel: resolve!(library, "VBVMR_GetLevel"),
            _library: library,
        })
    }
}

fn c_string(value: &str) -> std::result::Result<CString, i32> {
    CString::new(value).map_err(|_| INVALID_NAME)
}

fn status(code: i32) -> std::result::Result<(), i32> {
    if code < 0 {
        Err(code)
    } else {
        Ok(())
    }
}

impl RemoteMixerApi for NativeRemoteApi {
    fn login(&self) -> i32 {
        unsafe { (self.VBVMR_Login)() }
    }

    fn logout(&self) -> i32 {
        unsafe { (self.VBVMR_Logout)() }
    }

    fn run_product(&self, product_code: i32) -> i32 {
        unsafe { (self.VBVMR_RunVoicemeeter)(product_code) }
    }

    fn product_type(&self) -> std::result::Result<i32, i32> {
        let mut value = 0;
        status(unsafe { (self.VBVMR_GetVoicemeeterType)(&mut value) })?;
        Ok(value)
    }

    fn product_version(&self) -> std::result::Result<i32, i32> {
        let mut value = 0;
        status(unsafe { (self.VBVMR_GetVoicemeeterVersion)(&mut value) })?;
        Ok(value)
    }

    fn parameters_dirty(&self) -> i32 {
        unsafe { (self.VBVMR_IsParametersDirty)() }
    }

    fn get_float(&self, name: &str) -> std::result::Result<f32, i32> {
        let name = c_string(name)?;
        let mut value = 0.0f32;
        status(unsafe { (self.VBVMR_GetParameterFloat)(name.as_ptr(), &mut value) })?;
        Ok(value)
    }

    fn set_float(&self, name: &str, value: f32) -> i32 {
        match c_string(name) {
            Ok(name) => unsafe { (self.VBVMR_SetParameterFloat)(name.as_ptr(), value) },
            Err(code) => code,
        }
    }

    fn get_string(&self, name: &str) -> std::result::Result<String, i32> {
        let name = c_string(name)?;
        let mut buffer = [0 as c_char; STRING_PARAM_LEN];
        status(unsafe { (self.VBVMR_GetParameterStringA)(name.as_ptr(), buffer.as_mut_ptr()) })?;
        buffer[STRING_PARAM_LEN - 1] = 0;
        let value = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Ok(value.to_string_lossy().into_owned())
    }

    fn set_string(&self, name: &str, value: &str) -> i32 {
        match (c_string(name), c_string(value)) {
            (Ok(name), Ok(value)) => unsafe {
                (self.VBVMR_SetParameterStringA)(name.as_ptr(), value.as_ptr())
            },
            _ => INVALID_NAME,
        }
    }

    fn set_parameters(&self, script: &str) -> i32 {
        match c_string(script) {
            Ok(script) => unsafe { (self.VBVMR_SetParameters)(script.as_ptr()) },
            Err(code) => code,
        }
    }

    fn level(&self, level_type: i32, channel: i32) -> std::result::Result<f32, i32> {
        let mut value = 0.0f32;
        status(unsafe { (self.VBVMR_GetLevel)(level_type, channel, &mut value) })?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_loader_without_library() {
        let loader = NativeApiLoader;
        let missing = Path::new("/nonexistent/VoicemeeterRemote64.dll");
        assert!(matches!(
            loader.load(Some(missing)),
            Err(RemoteMixerError::LibraryNotFound { .. })
        ));
        assert!(loader.probe(Some(missing)).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolve_fails_on_foreign_library() {
        let Ok(library) = NativeLibrary::open(Path::new("libc.so.6")) else {
            return;
        };
        match NativeRemoteApi::resolve(library) {
            Err(RemoteMixerError::MissingEntryPoint { name }) => assert_eq!(name, "VBVMR_Login"),
            _ => panic!("libc must not resolve as a remote mixer"),
        }
    }

    #[test]
    fn test_c_string_rejects_interior_nul() {
        assert_eq!(c_string("Strip[0]\0.Gain").unwrap_err(), INVALID_NAME);
        assert!(status(0).is_ok());
        assert!(status(1).is_ok());
        assert_eq!(status(-2), Err(-2));
    }
}
