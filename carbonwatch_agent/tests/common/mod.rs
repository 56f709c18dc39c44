//! Shared fixtures for integration tests.
#![allow(dead_code)]

use carbonwatch_agent::calculator::{CarbonCalculator, HostUsage, MemoryReading};
use carbonwatch_agent::monitor::{ActivityMonitor, KernelProbe, PollingSource};
use carbonwatch_agent::state::AppState;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Host readings that never change and never block.
pub struct FixedUsage {
    pub cpu: f64,
    pub mem: MemoryReading,
}

impl FixedUsage {
    pub fn idle() -> Self {
        Self {
            cpu: 0.0,
            mem: MemoryReading {
                usage_percent: 25.0,
                used_bytes: 2 << 30,
                total_bytes: 8 << 30,
            },
        }
    }
}

impl HostUsage for FixedUsage {
    fn cpu_percent(&self) -> f64 {
        self.cpu
    }

    fn memory(&self) -> MemoryReading {
        self.mem
    }
}

pub fn polling_monitor() -> ActivityMonitor {
    ActivityMonitor::new(
        Box::new(KernelProbe::disabled()),
        Box::new(PollingSource::new()),
    )
    .with_connection_reader(|| Ok(3))
}

pub fn test_state(usage: impl HostUsage + 'static) -> AppState {
    let monitor = Arc::new(polling_monitor());
    let calculator = Arc::new(CarbonCalculator::new(Arc::new(usage)));
    AppState::new(monitor, calculator)
}

/// Minimal tracefs layout: kprobe_events, the group enable file and a trace_pipe with `lines`.
pub fn fake_tracefs(root: &Path, lines: &str) {
    fs::write(root.join("kprobe_events"), "").unwrap();
    let group = root.join("events").join("carbonwatch");
    fs::create_dir_all(&group).unwrap();
    fs::write(group.join("enable"), "0").unwrap();
    fs::write(root.join("trace_pipe"), lines).unwrap();
}

pub fn send_line(comm: &str, pid: u32, size: u64) -> String {
    format!("  {comm}-{pid}  [000] ..... 1.000000: cw_tcp_send: (tcp_sendmsg+0x0/0x50) size={size}\n")
}
