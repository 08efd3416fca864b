// Simulator data-access collaborator boundary
//
// The engine never talks to the simulator directly. Hosts implement
// `SimulatorLink` on top of their dataref client; `SystemProcessProbe` is a
// ready-made sysinfo-backed answer for the process questions.

use std::sync::{Arc, Mutex};
use sysinfo::{Pid, System};

use super::types::ControlValue;

/// Handle returned by `subscribe`, used to unsubscribe that callback only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Change callback: `(variable name, old value, new value)`
pub type VariableCallback = Arc<dyn Fn(&str, ControlValue, ControlValue) + Send + Sync>;

/// Interface consumed from the simulator data-access layer
pub trait SimulatorLink: Send + Sync {
    fn subscribe(&self, name: &str, callback: VariableCallback) -> SubscriptionId;

    fn unsubscribe(&self, name: &str, id: SubscriptionId);

    fn read_variable(&self, name: &str) -> Option<ControlValue>;

    fn is_process_running(&self, name: &str) -> bool;

    fn read_shared_flag(&self, name: &str) -> i32;
}

/// Strip the executable suffix some platforms report
pub fn normalize_process_name(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Process table lookups backed by sysinfo
pub struct SystemProcessProbe {
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Name of the process with `pid`, without a trailing `.exe`
    pub fn process_name(&self, pid: u32) -> Option<String> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();
        system
            .process(Pid::from_u32(pid))
            .map(|p| normalize_process_name(p.name()).to_string())
    }

    pub fn is_running(&self, name: &str) -> bool {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();
        system
            .processes()
            .values()
            .any(|p| normalize_process_name(p.name()) == name)
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_process_name() {
        assert_eq!(normalize_process_name("vPilot.exe"), "vPilot");
        assert_eq!(normalize_process_name("Discord.EXE"), "Discord");
        assert_eq!(normalize_process_name("swift"), "swift");
        assert_eq!(normalize_process_name(".exe"), ".exe");
    }

    #[test]
    fn test_probe_sees_current_process() {
        let probe = SystemProcessProbe::new();
        let name = probe
            .process_name(std::process::id())
            .expect("current process should be visible");
        assert!(probe.is_running(&name));
        assert!(!probe.is_running("definitely-not-a-running-process-4711"));
    }
}
