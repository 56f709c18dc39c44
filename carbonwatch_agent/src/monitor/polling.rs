//! Polling backend: mirrors the OS cumulative interface counters on every read.

use super::{lock, ActivitySource, TrafficCounters};
use crate::error::MonitorError;
use std::sync::Mutex;
use sysinfo::Networks;

pub struct PollingSource {
    // Keep Networks alive across reads so interfaces are not rediscovered each time
    nets: Mutex<Networks>,
    counters: Mutex<TrafficCounters>,
}

/// Summed totals across all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceTotals {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

impl PollingSource {
    pub fn new() -> Self {
        Self {
            nets: Mutex::new(Networks::new_with_refreshed_list()),
            counters: Mutex::new(TrafficCounters::default()),
        }
    }

    fn read_totals(&self) -> InterfaceTotals {
        let mut nets = lock(&self.nets);
        // keep interfaces that went away so their totals still count
        nets.refresh(false);
        nets.iter().fold(InterfaceTotals::default(), |acc, (_, d)| InterfaceTotals {
            rx_bytes: acc.rx_bytes.saturating_add(d.total_received()),
            tx_bytes: acc.tx_bytes.saturating_add(d.total_transmitted()),
            rx_packets: acc.rx_packets.saturating_add(d.total_packets_received()),
            tx_packets: acc.tx_packets.saturating_add(d.total_packets_transmitted()),
        })
    }
}

impl Default for PollingSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy a fresh OS reading into the counters without letting any field move backwards.
pub fn mirror_totals(c: &mut TrafficCounters, t: InterfaceTotals) {
    c.packet_count = c
        .packet_count
        .max(t.rx_packets.saturating_add(t.tx_packets));
    c.bytes_sent = c.bytes_sent.max(t.tx_bytes);
    c.bytes_received = c.bytes_received.max(t.rx_bytes);
}

impl ActivitySource for PollingSource {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn attach(&self) -> Result<(), MonitorError> {
        Ok(())
    }

    fn detach(&self) {}

    fn counters(&self) -> TrafficCounters {
        let totals = self.read_totals();
        let mut c = lock(&self.counters);
        mirror_totals(&mut c, totals);
        c.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_never_decreases() {
        let mut c = TrafficCounters::default();
        mirror_totals(
            &mut c,
            InterfaceTotals {
                rx_bytes: 100,
                tx_bytes: 50,
                rx_packets: 3,
                tx_packets: 2,
            },
        );
        assert_eq!((c.bytes_received, c.bytes_sent, c.packet_count), (100, 50, 5));

        // an interface vanished: totals shrink, counters hold
        mirror_totals(
            &mut c,
            InterfaceTotals {
                rx_bytes: 40,
                tx_bytes: 80,
                rx_packets: 1,
                tx_packets: 1,
            },
        );
        assert_eq!((c.bytes_received, c.bytes_sent, c.packet_count), (100, 80, 5));
    }

    #[test]
    fn live_counters_are_monotonic() {
        let src = PollingSource::new();
        let a = src.counters();
        let b = src.counters();
        assert!(b.bytes_sent >= a.bytes_sent);
        assert!(b.bytes_received >= a.bytes_received);
        assert!(b.packet_count >= a.packet_count);
        assert!(b.per_process.is_empty());
    }
}
