//! Collection scheduler: periodic cycles, failure isolation and shutdown.

mod common;

use carbonwatch_agent::calculator::{HostUsage, MemoryReading};
use carbonwatch_agent::sampler::{collect_once, spawn_collector};
use common::{test_state, FixedUsage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

async fn wait_for_points(state: &carbonwatch_agent::state::AppState, n: usize) -> usize {
    for _ in 0..500 {
        let len = state.history.len().await;
        if len >= n {
            return len;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    state.history.len().await
}

#[tokio::test]
async fn single_cycle_feeds_history_and_cache() {
    let state = test_state(FixedUsage::idle());
    let point = collect_once(&state).await.unwrap();
    assert_eq!(point.cpu_usage, 0.0);
    assert_eq!(state.history.len().await, 1);

    let cached: serde_json::Value =
        serde_json::from_str(&state.last_json.read().await).unwrap();
    assert_eq!(cached["network"]["active_connections"], 3);
    assert!(cached["carbon"]["total"]["carbon_grams"].is_number());
}

#[tokio::test]
async fn collector_runs_until_shutdown() {
    let state = test_state(FixedUsage::idle());
    let (tx, rx) = watch::channel(false);
    let handle = spawn_collector(state.clone(), Duration::from_millis(20), rx);

    assert!(wait_for_points(&state, 3).await >= 3);
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("collector did not stop")
        .unwrap();
}

/// Panics on the first CPU sample, then behaves.
struct FlakyUsage {
    failed: AtomicBool,
}

impl HostUsage for FlakyUsage {
    fn cpu_percent(&self) -> f64 {
        if !self.failed.swap(true, Ordering::SeqCst) {
            panic!("sensor glitch");
        }
        10.0
    }

    fn memory(&self) -> MemoryReading {
        FixedUsage::idle().mem
    }
}

#[tokio::test]
async fn failed_cycle_does_not_stop_the_collector() {
    let state = test_state(FlakyUsage {
        failed: AtomicBool::new(false),
    });
    let (tx, rx) = watch::channel(false);
    let handle = spawn_collector(state.clone(), Duration::from_millis(20), rx);

    assert!(wait_for_points(&state, 2).await >= 2);
    let points = state.history.points().await;
    assert!(points.iter().all(|p| p.cpu_usage == 10.0));

    drop(tx);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("collector did not stop on dropped sender")
        .unwrap();
}
