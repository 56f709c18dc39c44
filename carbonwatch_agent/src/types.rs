//! Data types shared by the monitor, calculator and HTTP layer.
//! Field names here are the JSON wire format.

use serde::Serialize;
use std::collections::BTreeMap;

/// Per-process outbound traffic seen by the kernel probe, keyed by command name.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTraffic {
    pub packets: u64,
    pub bytes: u64,
}

/// Point-in-time copy of the monitor's cumulative counters.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub packet_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    // live connection table size, not accumulated
    pub active_connections: u32,
    pub per_process: BTreeMap<String, ProcessTraffic>,
}

impl NetworkSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent.saturating_add(self.bytes_received)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory")]
    pub memory_percent: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub power_watts: f64,
    pub energy_kwh: f64,
    pub carbon_grams: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct NetworkMetrics {
    pub total_gb: f64,
    pub carbon_grams: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct MemoryMetrics {
    pub usage_percent: f64,
    pub used_gb: f64,
    pub total_gb: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct TotalMetrics {
    pub carbon_grams: f64,
    pub carbon_kg: f64,
    pub runtime_hours: f64,
    pub total_energy_kwh: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CarbonMetrics {
    pub cpu: CpuMetrics,
    pub network: NetworkMetrics,
    pub memory: MemoryMetrics,
    pub total: TotalMetrics,
}
