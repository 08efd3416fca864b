// Best-effort self test for the remote mixer backend
//
// Non-destructive: only reads parameters. Each check runs inside its own
// unwind boundary so a misbehaving library call fails that check alone.

use colored::Colorize;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{info, warn};

use super::backend::{ProductKind, RemoteMixerBackend};

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub checks: Vec<DiagnosticCheck>,
}

impl DiagnosticsReport {
    /// True when at least one check ran and none failed
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|check| check.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DiagnosticCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

fn run_check(name: &'static str, check: impl FnOnce() -> (bool, String)) -> DiagnosticCheck {
    let (passed, detail) = match catch_unwind(AssertUnwindSafe(check)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            (false, format!("panicked: {}", reason))
        }
    };

    if passed {
        info!("{} {}: {}", "DIAG_PASS".green(), name, detail);
    } else {
        warn!("{} {}: {}", "DIAG_FAIL".red(), name, detail);
    }

    DiagnosticCheck {
        name,
        passed,
        detail,
    }
}

fn check_library(backend: &RemoteMixerBackend) -> (bool, String) {
    match backend.probe_library() {
        Ok(detail) => (true, detail),
        Err(e) => (false, e.to_string()),
    }
}

fn check_installation(backend: &RemoteMixerBackend) -> (bool, String) {
    let kind = backend.current_product_kind();
    if kind == ProductKind::NotInstalled {
        return (false, "no remote mixer product detected".to_string());
    }
    let version = backend
        .product_version()
        .unwrap_or_else(|| "unknown".to_string());
    (
        true,
        format!(
            "{:?} {} ({} hardware inputs, {} virtual inputs, {} buses)",
            kind,
            version,
            kind.hardware_inputs(),
            kind.virtual_inputs(),
            kind.output_buses()
        ),
    )
}

fn check_enumeration(backend: &RemoteMixerBackend) -> (bool, String) {
    let targets = backend.available_targets();
    if targets.is_empty() {
        return (false, "no strips or buses".to_string());
    }

    let mut failed = Vec::new();
    for target in &targets {
        let gain = backend.try_get_float_parameter(&format!("{}.Gain", target.id));
        let mute = backend.try_get_float_parameter(&format!("{}.Mute", target.id));
        if let Err(e) = gain.and(mute) {
            failed.push(format!("{} ({})", target.id, e));
        }
    }

    if failed.is_empty() {
        (true, format!("{} targets readable", targets.len()))
    } else {
        (false, format!("unreadable: {}", failed.join(", ")))
    }
}

fn check_dirty_flag(backend: &RemoteMixerBackend) -> (bool, String) {
    match backend.try_parameters_dirty() {
        Ok(dirty) => (true, format!("dirty={}", dirty)),
        Err(e) => (false, e.to_string()),
    }
}

pub fn run_diagnostics(backend: &RemoteMixerBackend) -> DiagnosticsReport {
    info!("{}", "REMOTE_MIXER_DIAGNOSTICS".cyan());

    let checks = vec![
        run_check("library", || check_library(backend)),
        run_check("installation", || check_installation(backend)),
        run_check("enumeration", || check_enumeration(backend)),
        run_check("dirty_flag", || check_dirty_flag(backend)),
    ];

    DiagnosticsReport { checks }
}
