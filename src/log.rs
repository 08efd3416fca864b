use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Global flag to control per-event sync debug logging
pub static SYNC_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set sync debug logging on/off
pub fn set_sync_debug(enabled: bool) {
    SYNC_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    tracing::info!(
        "Sync debug logging {}",
        if enabled { "ENABLED" } else { "DISABLED" }
    );
}

/// Check if sync debug logging is enabled
pub fn is_sync_debug_enabled() -> bool {
    SYNC_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Hosts that already installed their own subscriber can call this anyway;
/// the second install is silently ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Sync debug macro - only logs if sync debug is enabled
#[macro_export]
macro_rules! sync_debug {
    ($($arg:tt)*) => {
        if $crate::log::SYNC_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_toggle() {
        set_sync_debug(true);
        assert!(is_sync_debug_enabled());
        set_sync_debug(false);
        assert!(!is_sync_debug_enabled());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("info");
        init_tracing("debug");
    }
}
