//! Carbon and energy estimates from CPU load, memory and network counters.
//!
//! The model is deliberately coarse: CPU power is linear between idle and TDP, CPU energy is
//! that power times the whole calculator uptime, and network energy is a flat cost per GB.

use crate::monitor::lock;
use crate::types::{
    CarbonMetrics, CpuMetrics, MemoryMetrics, NetworkMetrics, NetworkSnapshot, TotalMetrics,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{MemoryRefreshKind, System};

/// kg CO2 per kWh, global grid average.
pub const GRID_CARBON_INTENSITY: f64 = 0.5;
/// Typical desktop CPU, watts.
pub const CPU_TDP_WATTS: f64 = 65.0;
/// Whole-system idle draw, watts.
pub const IDLE_POWER_WATTS: f64 = 50.0;
/// kWh per GB transmitted.
pub const NETWORK_KWH_PER_GB: f64 = 0.06;
pub const BYTES_PER_GB: f64 = (1u64 << 30) as f64;
/// Blocking window used for one CPU utilisation sample.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub usage_percent: f64,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Live host readings the calculator depends on.
pub trait HostUsage: Send + Sync {
    /// Global CPU utilisation in percent. May block for a sampling window.
    fn cpu_percent(&self) -> f64;
    fn memory(&self) -> MemoryReading;
}

pub struct SysinfoUsage {
    sys: Mutex<System>,
    window: Duration,
}

impl SysinfoUsage {
    pub fn new() -> Self {
        Self::with_window(CPU_SAMPLE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            sys: Mutex::new(System::new()),
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for SysinfoUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl HostUsage for SysinfoUsage {
    fn cpu_percent(&self) -> f64 {
        // lock held across the window: one sample at a time, later callers queue
        let mut sys = lock(&self.sys);
        sys.refresh_cpu_usage();
        std::thread::sleep(self.window);
        sys.refresh_cpu_usage();
        sys.global_cpu_usage() as f64
    }

    fn memory(&self) -> MemoryReading {
        let mut sys = lock(&self.sys);
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        let total = sys.total_memory();
        let used = total.saturating_sub(sys.available_memory());
        MemoryReading {
            usage_percent: if total == 0 {
                0.0
            } else {
                used as f64 / total as f64 * 100.0
            },
            used_bytes: used,
            total_bytes: total,
        }
    }
}

pub fn cpu_power_watts(cpu_percent: f64) -> f64 {
    IDLE_POWER_WATTS + CPU_TDP_WATTS * (cpu_percent / 100.0)
}

pub fn energy_kwh(power_watts: f64, hours: f64) -> f64 {
    power_watts * hours / 1000.0
}

/// Grams of CO2 for an amount of energy.
pub fn carbon_grams(kwh: f64) -> f64 {
    kwh * GRID_CARBON_INTENSITY * 1000.0
}

pub fn network_carbon_grams(bytes: u64) -> f64 {
    carbon_grams(bytes as f64 / BYTES_PER_GB * NETWORK_KWH_PER_GB)
}

pub struct CarbonCalculator {
    usage: Arc<dyn HostUsage>,
    started: Instant,
    last_total_carbon: Mutex<f64>,
}

impl CarbonCalculator {
    pub fn new(usage: Arc<dyn HostUsage>) -> Self {
        Self {
            usage,
            started: Instant::now(),
            last_total_carbon: Mutex::new(0.0),
        }
    }

    pub fn runtime_hours(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 3600.0
    }

    /// Full metrics for `snapshot`. Blocks for the CPU sampling window.
    pub fn compute_metrics(&self, snapshot: &NetworkSnapshot) -> CarbonMetrics {
        let hours = self.runtime_hours();
        self.compute_for_runtime(snapshot, hours)
    }

    /// Same as [`compute_metrics`](Self::compute_metrics) with the runtime supplied.
    pub fn compute_for_runtime(&self, snapshot: &NetworkSnapshot, runtime_hours: f64) -> CarbonMetrics {
        let cpu_percent = self.usage.cpu_percent();
        let power = cpu_power_watts(cpu_percent);
        let cpu_energy = energy_kwh(power, runtime_hours);
        let cpu_carbon = carbon_grams(cpu_energy);

        let total_bytes = snapshot.total_bytes();
        let network_carbon = network_carbon_grams(total_bytes);

        let total_carbon = cpu_carbon + network_carbon;
        *lock(&self.last_total_carbon) = total_carbon;

        let mem = self.usage.memory();
        CarbonMetrics {
            cpu: CpuMetrics {
                usage_percent: cpu_percent,
                power_watts: power,
                energy_kwh: cpu_energy,
                carbon_grams: cpu_carbon,
            },
            network: NetworkMetrics {
                total_gb: total_bytes as f64 / BYTES_PER_GB,
                carbon_grams: network_carbon,
            },
            memory: MemoryMetrics {
                usage_percent: mem.usage_percent,
                used_gb: mem.used_bytes as f64 / BYTES_PER_GB,
                total_gb: mem.total_bytes as f64 / BYTES_PER_GB,
            },
            total: TotalMetrics {
                carbon_grams: total_carbon,
                carbon_kg: total_carbon / 1000.0,
                runtime_hours,
                total_energy_kwh: cpu_energy,
            },
        }
    }

    /// Total carbon from the most recent computation, 0 before the first.
    pub fn last_total_carbon(&self) -> f64 {
        *lock(&self.last_total_carbon)
    }

    pub fn estimate_savings(&self, kind: OptimizationKind) -> SavingsEstimate {
        savings_for(kind, self.last_total_carbon())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    ReduceCpu,
    OptimizeNetwork,
    PowerManagement,
}

impl OptimizationKind {
    pub const ALL: [OptimizationKind; 3] = [
        OptimizationKind::ReduceCpu,
        OptimizationKind::OptimizeNetwork,
        OptimizationKind::PowerManagement,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Unknown names fall back to `reduce_cpu`.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(OptimizationKind::ReduceCpu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationKind::ReduceCpu => "reduce_cpu",
            OptimizationKind::OptimizeNetwork => "optimize_network",
            OptimizationKind::PowerManagement => "power_management",
        }
    }

    pub fn reduction_percent(self) -> u32 {
        match self {
            OptimizationKind::ReduceCpu => 30,
            OptimizationKind::OptimizeNetwork => 25,
            OptimizationKind::PowerManagement => 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SavingsEstimate {
    pub name: &'static str,
    pub description: &'static str,
    pub potential_reduction_percent: u32,
    pub estimated_savings_grams: f64,
}

pub fn savings_for(kind: OptimizationKind, total_carbon_grams: f64) -> SavingsEstimate {
    let (name, description) = match kind {
        OptimizationKind::ReduceCpu => (
            "Reduce CPU Usage",
            "Limit background processes and CPU-intensive tasks",
        ),
        OptimizationKind::OptimizeNetwork => (
            "Optimize Network Traffic",
            "Compress data, cache content, reduce unnecessary requests",
        ),
        OptimizationKind::PowerManagement => (
            "Enable Power Management",
            "Use power-saving modes, reduce screen brightness, sleep idle processes",
        ),
    };
    let pct = kind.reduction_percent();
    SavingsEstimate {
        name,
        description,
        potential_reduction_percent: pct,
        estimated_savings_grams: total_carbon_grams * pct as f64 / 100.0,
    }
}
