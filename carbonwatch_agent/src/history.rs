//! Bounded history of collected samples for charts.

use crate::types::{CarbonMetrics, NetworkSnapshot};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

pub const HISTORY_CAPACITY: usize = 100;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Append `v`, evicting from the front so at most `cap` (minimum 1) items remain.
pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    let cap = cap.max(1);
    while dq.len() >= cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: String,
    pub cpu_usage: f64,
    pub network_mb: f64,
    pub carbon_grams: f64,
    pub energy_wh: f64,
}

impl HistoryPoint {
    pub fn from_sample(timestamp: String, snapshot: &NetworkSnapshot, metrics: &CarbonMetrics) -> Self {
        Self {
            timestamp,
            cpu_usage: metrics.cpu.usage_percent,
            network_mb: snapshot.total_bytes() as f64 / BYTES_PER_MB,
            carbon_grams: metrics.total.carbon_grams,
            energy_wh: metrics.total.total_energy_kwh * 1000.0,
        }
    }
}

/// Column view of the buffer. All columns have the same length.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HistorySeries {
    pub timestamps: Vec<String>,
    pub cpu_usage: Vec<f64>,
    pub network_bytes: Vec<f64>,
    pub carbon_emissions: Vec<f64>,
    pub energy_consumption: Vec<f64>,
}

/// FIFO ring of [`HistoryPoint`]s behind one lock, so every column is read from the same state.
pub struct HistoryBuffer {
    points: RwLock<VecDeque<HistoryPoint>>,
    cap: usize,
}

impl HistoryBuffer {
    /// `cap` is clamped to at least 1.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            points: RwLock::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub async fn push(&self, p: HistoryPoint) {
        let mut points = self.points.write().await;
        push_capped(&mut points, p, self.cap);
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    pub async fn points(&self) -> Vec<HistoryPoint> {
        self.points.read().await.iter().cloned().collect()
    }

    pub async fn series(&self) -> HistorySeries {
        let points = self.points.read().await;
        let mut s = HistorySeries::default();
        for p in points.iter() {
            s.timestamps.push(p.timestamp.clone());
            s.cpu_usage.push(p.cpu_usage);
            s.network_bytes.push(p.network_mb);
            s.carbon_emissions.push(p.carbon_grams);
            s.energy_consumption.push(p.energy_wh);
        }
        s
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: usize) -> HistoryPoint {
        HistoryPoint {
            timestamp: format!("t{i}"),
            cpu_usage: i as f64,
            network_mb: i as f64 * 2.0,
            carbon_grams: i as f64 * 3.0,
            energy_wh: i as f64 * 4.0,
        }
    }

    #[test]
    fn push_capped_evicts_oldest() {
        let mut dq = VecDeque::new();
        for i in 0..5 {
            push_capped(&mut dq, i, 3);
        }
        assert_eq!(dq, [2, 3, 4]);
    }

    #[test]
    fn push_capped_never_exceeds_cap() {
        let mut dq: VecDeque<_> = (0..6).collect();
        push_capped(&mut dq, 6, 3);
        assert_eq!(dq, [4, 5, 6]);
        let mut dq = VecDeque::new();
        push_capped(&mut dq, 1, 0);
        push_capped(&mut dq, 2, 0);
        assert_eq!(dq, [2]);
    }

    #[tokio::test]
    async fn zero_capacity_keeps_latest_point() {
        let h = HistoryBuffer::new(0);
        assert_eq!(h.capacity(), 1);
        for i in 0..5 {
            h.push(point(i)).await;
        }
        assert_eq!(h.len().await, 1);
        assert_eq!(h.points().await[0].timestamp, "t4");
    }

    #[tokio::test]
    async fn keeps_last_hundred_in_order() {
        let h = HistoryBuffer::default();
        for i in 0..250 {
            h.push(point(i)).await;
            assert!(h.len().await <= HISTORY_CAPACITY);
        }
        let pts = h.points().await;
        assert_eq!(pts.len(), 100);
        assert_eq!(pts.first().unwrap().timestamp, "t150");
        assert_eq!(pts.last().unwrap().timestamp, "t249");
        assert!(pts.windows(2).all(|w| w[0].cpu_usage < w[1].cpu_usage));
    }

    #[tokio::test]
    async fn series_columns_stay_aligned() {
        let h = HistoryBuffer::new(4);
        for i in 0..6 {
            h.push(point(i)).await;
        }
        let s = h.series().await;
        assert_eq!(s.timestamps, ["t2", "t3", "t4", "t5"]);
        assert_eq!(s.cpu_usage, [2.0, 3.0, 4.0, 5.0]);
        assert_eq!(s.network_bytes, [4.0, 6.0, 8.0, 10.0]);
        assert_eq!(s.carbon_emissions, [6.0, 9.0, 12.0, 15.0]);
        assert_eq!(s.energy_consumption, [8.0, 12.0, 16.0, 20.0]);
    }
}
