//! WebSocket `get_stats` against a live listener.

mod common;

use carbonwatch_agent::api::router;
use carbonwatch_agent::calculator::{HostUsage, MemoryReading};
use carbonwatch_agent::state::AppState;
use common::{test_state, FixedUsage};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

async fn get_stats_twice(addr: SocketAddr) -> (Value, Value) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let mut replies = Vec::new();
    for _ in 0..2 {
        ws.send(Message::Text("get_stats".into())).await.unwrap();
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => {
                    replies.push(serde_json::from_str::<Value>(&t).unwrap());
                    break;
                }
                _ => continue,
            }
        }
    }
    let second = replies.pop().unwrap();
    (replies.pop().unwrap(), second)
}

#[tokio::test]
async fn cold_start_samples_once_and_caches() {
    let state = test_state(FixedUsage::idle());
    let addr = serve(state.clone()).await;
    let (first, second) = get_stats_twice(addr).await;

    assert_eq!(first["network"]["active_connections"], 3);
    assert_eq!(first["hostname"], state.hostname.as_str());
    assert!(first["carbon"]["total"]["carbon_grams"].is_number());
    // the second reply comes from the cache
    assert_eq!(first, second);
    assert!(!state.last_json.read().await.is_empty());
    // only the collector appends history
    assert!(state.history.is_empty().await);
}

#[tokio::test]
async fn serves_collector_cache() {
    let state = test_state(FixedUsage::idle());
    *state.last_json.write().await = r#"{"cached":true}"#.to_string();
    let addr = serve(state).await;
    let (first, _) = get_stats_twice(addr).await;
    assert_eq!(first["cached"], true);
}

struct DeadSensor;

impl HostUsage for DeadSensor {
    fn cpu_percent(&self) -> f64 {
        panic!("sensor offline");
    }

    fn memory(&self) -> MemoryReading {
        FixedUsage::idle().mem
    }
}

#[tokio::test]
async fn failed_sample_gets_error_reply() {
    let addr = serve(test_state(DeadSensor)).await;
    let (first, second) = get_stats_twice(addr).await;
    assert_eq!(first["success"], false);
    assert!(first["error"].is_string());
    // the socket stays usable
    assert_eq!(second["success"], false);
}
