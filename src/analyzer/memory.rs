//! Resident memory sampling for the streaming watchdog

use sysinfo::{Pid, System};

/// Samples this process's resident set size and remembers the peak
pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
    peak: u64,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            peak: 0,
        }
    }

    /// Current resident bytes; 0 where the platform does not report it
    pub fn sample(&mut self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        if !self.system.refresh_process(pid) {
            return 0;
        }
        let bytes = self.system.process(pid).map(|p| p.memory()).unwrap_or(0);
        self.peak = self.peak.max(bytes);
        bytes
    }

    /// Highest value seen by `sample`
    pub fn peak(&self) -> u64 {
        self.peak
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_samples() {
        let mut probe = MemoryProbe::new();
        let first = probe.sample();
        let second = probe.sample();
        assert_eq!(probe.peak(), first.max(second));
    }
}
