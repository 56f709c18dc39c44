//! Advisory optimizations. Nothing here changes host settings: actions inspect the host and
//! return recommendations; the carbon delta reported to clients is simulated.

use crate::calculator::OptimizationKind;
use crate::monitor::connections;
use crate::types::ProcessInfo;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Processes above this CPU% are reported by `reduce_cpu`.
pub const HIGH_CPU_THRESHOLD: f64 = 50.0;
/// Used when an outcome carries no parsable reduction.
pub const DEFAULT_REDUCTION_FRACTION: f64 = 0.30;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Info,
    Recommendation,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OptimizationAction {
    pub action: String,
    pub details: String,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessInfo>>,
}

impl OptimizationAction {
    fn new(action: &str, details: impl Into<String>, status: ActionStatus) -> Self {
        Self {
            action: action.to_string(),
            details: details.into(),
            status,
            processes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OptimizationOutcome {
    pub success: bool,
    pub actions: Vec<OptimizationAction>,
    pub estimated_reduction: Option<String>,
    pub error: Option<String>,
}

/// The most recent optimization request, as served by `/api/optimization-data`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OptimizationRecord {
    pub before_carbon_g: Option<f64>,
    pub after_carbon_g: Option<f64>,
    pub reduction_g: Option<f64>,
    pub reduction_percent: Option<f64>,
    pub optimization_applied: bool,
    pub optimization_type: Option<String>,
}

impl OptimizationRecord {
    pub fn applied(kind: &str, before_carbon_g: f64, reduction_fraction: f64) -> Self {
        let after = before_carbon_g * (1.0 - reduction_fraction);
        Self {
            before_carbon_g: Some(before_carbon_g),
            after_carbon_g: Some(after),
            reduction_g: Some(before_carbon_g - after),
            reduction_percent: Some(reduction_fraction * 100.0),
            optimization_applied: true,
            optimization_type: Some(kind.to_string()),
        }
    }
}

/// "30%" -> 0.30; anything unparsable gives the default.
pub fn reduction_fraction(estimated: Option<&str>) -> f64 {
    estimated
        .and_then(|s| s.trim().trim_end_matches('%').trim().parse::<f64>().ok())
        .map(|pct| pct / 100.0)
        .unwrap_or(DEFAULT_REDUCTION_FRACTION)
}

/// Host paths the optimizer inspects.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub cpu_governor: PathBuf,
    pub laptop_mode: PathBuf,
    pub proc_net: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            cpu_governor: PathBuf::from("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor"),
            laptop_mode: PathBuf::from("/proc/sys/vm/laptop_mode"),
            proc_net: PathBuf::from("/proc/net"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    paths: HostPaths,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(paths: HostPaths) -> Self {
        Self { paths }
    }

    /// Run the named optimization. `processes` is the current top-process listing.
    pub fn apply(&self, kind: &str, processes: &[ProcessInfo]) -> OptimizationOutcome {
        let Some(kind) = OptimizationKind::parse(kind) else {
            return OptimizationOutcome {
                success: false,
                actions: Vec::new(),
                estimated_reduction: None,
                error: Some("Unknown optimization type".into()),
            };
        };
        let actions = match kind {
            OptimizationKind::ReduceCpu => self.reduce_cpu(processes),
            OptimizationKind::OptimizeNetwork => self.optimize_network(),
            OptimizationKind::PowerManagement => self.power_management(),
        };
        OptimizationOutcome {
            success: true,
            actions,
            estimated_reduction: Some(format!("{}%", kind.reduction_percent())),
            error: None,
        }
    }

    fn governor(&self) -> Option<String> {
        fs::read_to_string(&self.paths.cpu_governor)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn reduce_cpu(&self, processes: &[ProcessInfo]) -> Vec<OptimizationAction> {
        let mut actions = Vec::new();
        let hot: Vec<ProcessInfo> = processes
            .iter()
            .filter(|p| p.cpu_percent > HIGH_CPU_THRESHOLD)
            .cloned()
            .collect();
        if !hot.is_empty() {
            let mut a = OptimizationAction::new(
                "Identified high CPU processes",
                format!(
                    "Found {} processes using >{HIGH_CPU_THRESHOLD:.0}% CPU",
                    hot.len()
                ),
                ActionStatus::Info,
            );
            a.processes = Some(hot);
            actions.push(a);
        }
        actions.push(match self.governor().as_deref() {
            Some("powersave") => OptimizationAction::new(
                "CPU frequency scaling",
                "CPU governor is already in powersave mode",
                ActionStatus::Success,
            ),
            Some(g) => OptimizationAction::new(
                "CPU frequency scaling",
                format!("Current governor is {g}; switch to powersave with: sudo cpupower frequency-set -g powersave"),
                ActionStatus::Recommendation,
            ),
            None => OptimizationAction::new(
                "CPU frequency scaling",
                "cpufreq not available (install with: sudo apt install linux-tools-common)",
                ActionStatus::Info,
            ),
        });
        actions.push(OptimizationAction::new(
            "Process management recommendation",
            "Consider closing unnecessary applications and browser tabs",
            ActionStatus::Recommendation,
        ));
        actions
    }

    fn optimize_network(&self) -> Vec<OptimizationAction> {
        let mut actions = Vec::new();
        match connections::count_established_in(&self.paths.proc_net) {
            Ok(n) => actions.push(OptimizationAction::new(
                "Network analysis",
                format!("Found {n} active connections"),
                ActionStatus::Info,
            )),
            Err(e) => actions.push(OptimizationAction::new(
                "Network analysis",
                format!("Connection table unavailable: {e}"),
                ActionStatus::Info,
            )),
        }
        actions.push(OptimizationAction::new(
            "Network optimization suggestions",
            "Enable browser compression, use content caching, limit background sync",
            ActionStatus::Recommendation,
        ));
        actions.push(OptimizationAction::new(
            "Traffic compression",
            "Consider using VPN with compression or CDN caching",
            ActionStatus::Recommendation,
        ));
        actions
    }

    fn power_management(&self) -> Vec<OptimizationAction> {
        let mut actions = Vec::new();
        if let Some(g) = self.governor() {
            actions.push(OptimizationAction::new(
                "Power profile check",
                format!("Current CPU governor: {g}"),
                ActionStatus::Info,
            ));
        }
        actions.push(OptimizationAction::new(
            "Power management tools",
            "Install TLP for automatic power management: sudo apt install tlp",
            ActionStatus::Recommendation,
        ));
        if self.paths.laptop_mode.exists() {
            actions.push(OptimizationAction::new(
                "Laptop mode",
                "Enable laptop mode for better power efficiency: sudo sysctl -w vm.laptop_mode=5",
                ActionStatus::Recommendation,
            ));
        }
        actions.push(OptimizationAction::new(
            "USB power saving",
            "Enable USB autosuspend for idle devices",
            ActionStatus::Recommendation,
        ));
        actions.push(OptimizationAction::new(
            "Display optimization",
            "Reduce screen brightness to 50-70% for optimal power savings",
            ActionStatus::Recommendation,
        ));
        actions
    }
}
