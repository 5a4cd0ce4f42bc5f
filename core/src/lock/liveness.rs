use std::fmt;

use sysinfo::{Pid, System};

use super::holder::LockHolder;

/// Decides whether the process recorded in a lock marker is still running.
pub trait LivenessProbe: Send + Sync + fmt::Debug {
    fn is_alive(&self, holder: &LockHolder) -> bool;
}

/// Checks same-host pids through `sysinfo`.
///
/// Holders on another host cannot be checked and are reported alive, so their
/// markers are never reclaimed automatically.
#[derive(Debug, Clone)]
pub struct ProcessLiveness {
    hostname: String,
}

impl ProcessLiveness {
    pub fn new() -> Self {
        Self {
            hostname: local_hostname(),
        }
    }
}

impl Default for ProcessLiveness {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe for ProcessLiveness {
    fn is_alive(&self, holder: &LockHolder) -> bool {
        if holder.hostname != self.hostname {
            return true;
        }
        if holder.pid == std::process::id() {
            return true;
        }
        let mut sys = System::new();
        sys.refresh_process(Pid::from_u32(holder.pid))
    }
}

pub(crate) fn local_hostname() -> String {
    System::host_name()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let probe = ProcessLiveness::new();
        let me = LockHolder::for_current_process(None);
        assert!(probe.is_alive(&me));
    }

    #[test]
    fn test_foreign_host_assumed_alive() {
        let probe = ProcessLiveness::new();
        let mut other = LockHolder::for_current_process(None);
        other.hostname = format!("{}-elsewhere", other.hostname);
        other.pid = u32::MAX - 1;
        assert!(probe.is_alive(&other));
    }
}
