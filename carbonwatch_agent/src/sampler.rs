//! Background collector: every period, snapshot the monitor, compute metrics, append to history
//! and refresh the cached JSON that WS replies send.

use crate::error::CollectError;
use crate::history::HistoryPoint;
use crate::state::AppState;
use crate::types::{CarbonMetrics, NetworkSnapshot};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct CollectedSample {
    pub timestamp: String,
    pub hostname: String,
    pub network: NetworkSnapshot,
    pub carbon: CarbonMetrics,
}

fn now_label() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Snapshot + metrics on the blocking pool (the CPU sample sleeps).
pub async fn measure(state: &AppState) -> Result<(NetworkSnapshot, CarbonMetrics), CollectError> {
    let monitor = state.monitor.clone();
    let calculator = state.calculator.clone();
    let pair = tokio::task::spawn_blocking(move || {
        let snapshot = monitor.get_stats();
        let metrics = calculator.compute_metrics(&snapshot);
        (snapshot, metrics)
    })
    .await?;
    Ok(pair)
}

pub async fn take_sample(state: &AppState) -> Result<CollectedSample, CollectError> {
    let (network, carbon) = measure(state).await?;
    Ok(CollectedSample {
        timestamp: now_label(),
        hostname: state.hostname.clone(),
        network,
        carbon,
    })
}

/// Serialize `sample` into the WS cache and return the JSON.
pub async fn publish(state: &AppState, sample: &CollectedSample) -> Result<String, CollectError> {
    let json = serde_json::to_string(sample)?;
    *state.last_json.write().await = json.clone();
    Ok(json)
}

/// One collection cycle.
pub async fn collect_once(state: &AppState) -> Result<HistoryPoint, CollectError> {
    let sample = take_sample(state).await?;
    publish(state, &sample).await?;

    let point = HistoryPoint::from_sample(sample.timestamp, &sample.network, &sample.carbon);
    state.history.push(point.clone()).await;
    Ok(point)
}

/// Runs until `shutdown` turns true or its sender is dropped. A failed cycle is logged and
/// the next one runs on schedule.
pub fn spawn_collector(
    state: AppState,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match collect_once(&state).await {
                Ok(p) => debug!(
                    cpu = p.cpu_usage,
                    carbon_g = p.carbon_grams,
                    "collected sample at {}",
                    p.timestamp
                ),
                Err(e) => warn!("collection cycle failed: {e}"),
            }
        }
        debug!("collector stopped");
    })
}
