// Owned handle to a dynamically loaded native library
//
// The handle is released in `Drop`, so every early return during entry
// point resolution frees the library without explicit cleanup.

use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RemoteMixerError;

pub struct NativeLibrary {
    handle: *mut c_void,
    path: PathBuf,
}

// The handle is an opaque token owned exclusively by this value; the loader
// APIs are thread-safe.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    /// Load `path` (a file path or a bare name for the system search path)
    pub fn open(path: &Path) -> Result<Self, RemoteMixerError> {
        let handle = unsafe { platform::open(path) };
        if handle.is_null() {
            return Err(RemoteMixerError::LibraryNotFound {
                path: path.display().to_string(),
            });
        }
        debug!("Loaded native library {}", path.display());
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    /// Try `override_path` first, then each default name on the search path
    pub fn open_first(
        override_path: Option<&Path>,
        default_names: &[&str],
    ) -> Result<Self, RemoteMixerError> {
        let mut attempts: Vec<PathBuf> = Vec::new();
        if let Some(path) = override_path {
            attempts.push(path.to_path_buf());
        }
        attempts.extend(default_names.iter().map(PathBuf::from));

        let mut last_error = RemoteMixerError::LibraryNotFound {
            path: "<none>".to_string(),
        };
        for attempt in attempts {
            match Self::open(&attempt) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    debug!("{}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw address of an exported symbol
    pub fn symbol(&self, name: &str) -> Result<*mut c_void, RemoteMixerError> {
        let missing = || RemoteMixerError::MissingEntryPoint {
            name: name.to_string(),
        };
        let c_name = CString::new(name).map_err(|_| missing())?;
        let ptr = unsafe { platform::symbol(self.handle, &c_name) };
        if ptr.is_null() {
            Err(missing())
        } else {
            Ok(ptr)
        }
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_ok()
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        unsafe { platform::close(self.handle) };
        debug!("Released native library {}", self.path.display());
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::{c_void, CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub unsafe fn open(path: &Path) -> *mut c_void {
        match CString::new(path.as_os_str().as_bytes()) {
            Ok(c_path) => libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL),
            Err(_) => std::ptr::null_mut(),
        }
    }

    pub unsafe fn symbol(handle: *mut c_void, name: &CStr) -> *mut c_void {
        libc::dlsym(handle, name.as_ptr())
    }

    pub unsafe fn close(handle: *mut c_void) {
        libc::dlclose(handle);
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::{c_void, CStr};
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use windows::core::{PCSTR, PCWSTR};
    use windows::Win32::Foundation::{FreeLibrary, HMODULE};
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

    pub unsafe fn open(path: &Path) -> *mut c_void {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        match LoadLibraryW(PCWSTR(wide.as_ptr())) {
            Ok(module) => module.0 as *mut c_void,
            Err(_) => std::ptr::null_mut(),
        }
    }

    pub unsafe fn symbol(handle: *mut c_void, name: &CStr) -> *mut c_void {
        GetProcAddress(HMODULE(handle as isize), PCSTR(name.as_ptr() as *const u8))
            .map_or(std::ptr::null_mut(), |f| f as *mut c_void)
    }

    pub unsafe fn close(handle: *mut c_void) {
        let _ = FreeLibrary(HMODULE(handle as isize));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_an_error() {
        let result = NativeLibrary::open(Path::new("/nonexistent/libremote-mixer-4711.so"));
        assert!(matches!(result, Err(RemoteMixerError::LibraryNotFound { .. })));
    }

    #[test]
    fn test_open_first_reports_last_failure() {
        let result = NativeLibrary::open_first(
            Some(Path::new("/nonexistent/a.so")),
            &["libremote-mixer-missing-4711.so"],
        );
        match result {
            Err(RemoteMixerError::LibraryNotFound { path }) => {
                assert_eq!(path, "libremote-mixer-missing-4711.so")
            }
            _ => panic!("expected LibraryNotFound"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_symbol_lookup_on_system_library() {
        let library = match NativeLibrary::open(Path::new("libc.so.6")) {
            Ok(library) => library,
            Err(_) => return, // non-glibc system
        };
        assert!(library.has_symbol("malloc"));
        assert!(matches!(
            library.symbol("VBVMR_Login"),
            Err(RemoteMixerError::MissingEntryPoint { .. })
        ));
    }
}
