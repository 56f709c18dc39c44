//! Network/process activity monitor with a kernel-probe backend and a polling fallback.

pub mod connections;
pub mod kprobe;
pub mod polling;

use crate::error::MonitorError;
use crate::types::{NetworkSnapshot, ProcessInfo, ProcessTraffic};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use sysinfo::{MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

pub use kprobe::KernelProbe;
pub use polling::PollingSource;

/// Number of entries returned by [`ActivityMonitor::get_process_list`].
pub const TOP_PROCESSES: usize = 20;

/// Raw cumulative counters owned by a backend. Always read and written under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub packet_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub per_process: BTreeMap<String, ProcessTraffic>,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A source of cumulative traffic counters.
pub trait ActivitySource: Send + Sync {
    fn name(&self) -> &'static str;
    /// Start producing counters. Failure means the source cannot be used.
    fn attach(&self) -> Result<(), MonitorError>;
    /// Stop producing counters. Safe to call repeatedly.
    fn detach(&self);
    /// Copy of the current counters.
    fn counters(&self) -> TrafficCounters;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Polling,
    KernelProbe,
    /// Kernel probe was attached and has been stopped; its final counters stay readable.
    Stopped,
}

pub struct ActivityMonitor {
    probe: Box<dyn ActivitySource>,
    polling: Box<dyn ActivitySource>,
    mode: Mutex<BackendMode>,
    connections: fn() -> io::Result<u32>,
    sys: Mutex<System>,
}

impl ActivityMonitor {
    pub fn new(probe: Box<dyn ActivitySource>, polling: Box<dyn ActivitySource>) -> Self {
        Self {
            probe,
            polling,
            mode: Mutex::new(BackendMode::Polling),
            connections: connections::count_connections,
            sys: Mutex::new(System::new()),
        }
    }

    /// Replace the connection table reader (tests, non-Linux hosts).
    pub fn with_connection_reader(mut self, reader: fn() -> io::Result<u32>) -> Self {
        self.connections = reader;
        self
    }

    pub fn mode(&self) -> BackendMode {
        *lock(&self.mode)
    }

    /// Try the kernel probe; on any failure stay in polling mode. Never errors.
    pub fn start_monitoring(&self) -> bool {
        let mut mode = lock(&self.mode);
        if *mode == BackendMode::KernelProbe {
            return true;
        }
        match self.probe.attach() {
            Ok(()) => {
                info!("{} backend attached", self.probe.name());
                *mode = BackendMode::KernelProbe;
                true
            }
            Err(e) => {
                warn!("{e}; falling back to {} monitoring", self.polling.name());
                if *mode != BackendMode::Stopped {
                    *mode = BackendMode::Polling;
                }
                false
            }
        }
    }

    pub fn get_stats(&self) -> NetworkSnapshot {
        let counters = match self.mode() {
            BackendMode::KernelProbe | BackendMode::Stopped => self.probe.counters(),
            BackendMode::Polling => self.polling.counters(),
        };
        let active_connections = (self.connections)().unwrap_or_else(|e| {
            debug!("connection table read failed: {e}");
            0
        });
        NetworkSnapshot {
            packet_count: counters.packet_count,
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            active_connections,
            per_process: counters.per_process,
        }
    }

    /// Top processes by CPU. CPU% is measured against the previous call on this monitor.
    pub fn get_process_list(&self) -> Vec<ProcessInfo> {
        let mut sys = lock(&self.sys);
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        // remove_dead drops processes that exited since the last refresh
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let total_mem = sys.total_memory().max(1) as f64;
        let mut list: Vec<ProcessInfo> = sys
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_percent: p.cpu_usage() as f64,
                memory_percent: p.memory() as f64 / total_mem * 100.0,
            })
            .collect();
        drop(sys);
        sort_top(&mut list);
        list
    }

    /// Detach the probe, waiting briefly for the ingestion task to drain. Counters stay readable.
    pub fn stop_monitoring(&self) {
        let mut mode = lock(&self.mode);
        if *mode == BackendMode::KernelProbe {
            info!("stopping {} backend", self.probe.name());
            self.probe.detach();
            *mode = BackendMode::Stopped;
        }
    }
}

/// Sort by CPU descending and keep the top entries.
pub(crate) fn sort_top(list: &mut Vec<ProcessInfo>) {
    list.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    list.truncate(TOP_PROCESSES);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, cpu: f64) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: format!("p{pid}"),
            cpu_percent: cpu,
            memory_percent: 0.0,
        }
    }

    #[test]
    fn sort_top_orders_by_cpu_and_truncates() {
        let mut list: Vec<ProcessInfo> = (0..30).map(|i| proc(i, (i % 7) as f64)).collect();
        sort_top(&mut list);
        assert_eq!(list.len(), TOP_PROCESSES);
        assert!(list.windows(2).all(|w| w[0].cpu_percent >= w[1].cpu_percent));
        assert_eq!(list[0].cpu_percent, 6.0);
    }
}
