//! HTTP routes. Every body carries a `success` flag; failures are `{"success": false, "error"}`.

use crate::calculator::{OptimizationKind, SavingsEstimate};
use crate::error::ApiError;
use crate::history::{HistoryPoint, HistorySeries};
use crate::optimizer::{reduction_fraction, OptimizationAction, OptimizationRecord};
use crate::state::AppState;
use crate::types::{CarbonMetrics, NetworkSnapshot, ProcessInfo};
use crate::ws::ws_handler;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
/// Processes included in `/api/stats`.
const STATS_PROCESSES: usize = 10;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/optimize", post(optimize))
        .route("/api/savings", get(savings))
        .route("/api/optimization-data", get(optimization_data))
        .route("/api/history", get(history))
        .route("/api/graph/:kind", get(graph))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct NetworkSection {
    pub packets: u64,
    pub bytes_sent_mb: f64,
    pub bytes_received_mb: f64,
    pub total_mb: f64,
    pub active_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct CarbonSection {
    pub cpu_carbon_g: f64,
    pub network_carbon_g: f64,
    pub total_carbon_g: f64,
    pub total_carbon_kg: f64,
}

#[derive(Debug, Serialize)]
pub struct EnergySection {
    pub cpu_power_w: f64,
    pub total_energy_kwh: f64,
    pub runtime_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct SystemSection {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub network: NetworkSection,
    pub carbon: CarbonSection,
    pub energy: EnergySection,
    pub system: SystemSection,
    pub processes: Vec<ProcessInfo>,
}

impl StatsResponse {
    pub fn build(snap: &NetworkSnapshot, m: &CarbonMetrics, mut processes: Vec<ProcessInfo>) -> Self {
        processes.truncate(STATS_PROCESSES);
        Self {
            success: true,
            network: NetworkSection {
                packets: snap.packet_count,
                bytes_sent_mb: snap.bytes_sent as f64 / BYTES_PER_MB,
                bytes_received_mb: snap.bytes_received as f64 / BYTES_PER_MB,
                total_mb: snap.total_bytes() as f64 / BYTES_PER_MB,
                active_connections: snap.active_connections,
            },
            carbon: CarbonSection {
                cpu_carbon_g: m.cpu.carbon_grams,
                network_carbon_g: m.network.carbon_grams,
                total_carbon_g: m.total.carbon_grams,
                total_carbon_kg: m.total.carbon_kg,
            },
            energy: EnergySection {
                cpu_power_w: m.cpu.power_watts,
                total_energy_kwh: m.total.total_energy_kwh,
                runtime_hours: m.total.runtime_hours,
            },
            system: SystemSection {
                cpu_percent: m.cpu.usage_percent,
                memory_percent: m.memory.usage_percent,
                memory_used_gb: m.memory.used_gb,
                memory_total_gb: m.memory.total_gb,
            },
            processes,
        }
    }
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let monitor = state.monitor.clone();
    let calculator = state.calculator.clone();
    let resp = tokio::task::spawn_blocking(move || {
        let snap = monitor.get_stats();
        let metrics = calculator.compute_metrics(&snap);
        let processes = monitor.get_process_list();
        StatsResponse::build(&snap, &metrics, processes)
    })
    .await?;
    Ok(Json(resp))
}

fn default_kind() -> String {
    OptimizationKind::ReduceCpu.as_str().to_string()
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub success: bool,
    pub optimization_type: String,
    pub actions: Vec<OptimizationAction>,
    pub estimated_reduction: String,
    pub before_carbon_g: f64,
    pub after_carbon_g: f64,
    pub reduction_g: f64,
    pub reduction_percent: f64,
    pub error: Option<String>,
}

fn failure(status: StatusCode, error: String) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

async fn optimize(
    State(state): State<AppState>,
    payload: Result<Json<OptimizeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return Ok(failure(rejection.status(), rejection.body_text())),
    };
    let monitor = state.monitor.clone();
    let calculator = state.calculator.clone();
    let optimizer = state.optimizer.clone();
    let kind = req.kind.clone();
    let (before, outcome) = tokio::task::spawn_blocking(move || {
        let snap = monitor.get_stats();
        let before = calculator.compute_metrics(&snap).total.carbon_grams;
        let processes = monitor.get_process_list();
        (before, optimizer.apply(&kind, &processes))
    })
    .await?;

    let fraction = reduction_fraction(outcome.estimated_reduction.as_deref());
    let record = OptimizationRecord::applied(&req.kind, before, fraction);
    *state.optimization.write().await = record.clone();

    Ok(Json(OptimizeResponse {
        success: outcome.success,
        optimization_type: req.kind,
        actions: outcome.actions,
        estimated_reduction: outcome.estimated_reduction.unwrap_or_else(|| "N/A".into()),
        before_carbon_g: before,
        after_carbon_g: record.after_carbon_g.unwrap_or(before),
        reduction_g: record.reduction_g.unwrap_or(0.0),
        reduction_percent: fraction * 100.0,
        error: outcome.error,
    })
    .into_response())
}

#[derive(Debug, Serialize)]
pub struct SavingsResponse {
    pub success: bool,
    pub savings: BTreeMap<&'static str, SavingsEstimate>,
}

async fn savings(State(state): State<AppState>) -> Json<SavingsResponse> {
    let savings = OptimizationKind::ALL
        .into_iter()
        .map(|k| (k.as_str(), state.calculator.estimate_savings(k)))
        .collect();
    Json(SavingsResponse {
        success: true,
        savings,
    })
}

async fn optimization_data(State(state): State<AppState>) -> Response {
    let record = state.optimization.read().await.clone();
    Json(json!({ "success": true, "optimization_data": record })).into_response()
}

async fn history(State(state): State<AppState>) -> Json<serde_json::Value> {
    let series: HistorySeries = state.history.series().await;
    Json(json!({ "success": true, "history": series }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Cpu,
    Network,
    Carbon,
    Energy,
}

impl GraphKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(GraphKind::Cpu),
            "network" => Some(GraphKind::Network),
            "carbon" => Some(GraphKind::Carbon),
            "energy" => Some(GraphKind::Energy),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            GraphKind::Cpu => "CPU Usage Over Time",
            GraphKind::Network => "Network Traffic Over Time",
            GraphKind::Carbon => "Carbon Emissions Over Time",
            GraphKind::Energy => "Energy Consumption Over Time",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            GraphKind::Cpu => "CPU Usage (%)",
            GraphKind::Network => "Data (MB)",
            GraphKind::Carbon => "Carbon (grams CO2)",
            GraphKind::Energy => "Energy (Wh)",
        }
    }

    pub fn value(self, p: &HistoryPoint) -> f64 {
        match self {
            GraphKind::Cpu => p.cpu_usage,
            GraphKind::Network => p.network_mb,
            GraphKind::Carbon => p.carbon_grams,
            GraphKind::Energy => p.energy_wh,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub success: bool,
    pub title: &'static str,
    pub unit: &'static str,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

async fn graph(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let Some(g) = GraphKind::parse(&kind) else {
        return failure(
            StatusCode::BAD_REQUEST,
            format!("unknown graph type `{kind}`"),
        );
    };
    let points = state.history.points().await;
    Json(GraphResponse {
        success: true,
        title: g.title(),
        unit: g.unit(),
        labels: points.iter().map(|p| p.timestamp.clone()).collect(),
        values: points.iter().map(|p| g.value(p)).collect(),
    })
    .into_response()
}
