//! Carbon calculator against fixed host readings.

mod common;

use carbonwatch_agent::calculator::{CarbonCalculator, MemoryReading, OptimizationKind};
use carbonwatch_agent::types::NetworkSnapshot;
use common::FixedUsage;
use std::sync::Arc;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn snapshot(sent: u64, received: u64) -> NetworkSnapshot {
    NetworkSnapshot {
        bytes_sent: sent,
        bytes_received: received,
        ..Default::default()
    }
}

#[test]
fn one_hour_idle_with_a_gigabyte_of_traffic() {
    let calc = CarbonCalculator::new(Arc::new(FixedUsage::idle()));
    let m = calc.compute_for_runtime(&snapshot(500_000_000, 500_000_000), 1.0);

    let network_g = 1_000_000_000f64 / (1u64 << 30) as f64 * 0.06 * 0.5 * 1000.0;
    assert!(close(m.cpu.power_watts, 50.0));
    assert!(close(m.cpu.energy_kwh, 0.05));
    assert!(close(m.cpu.carbon_grams, 25.0));
    assert!(close(m.network.carbon_grams, network_g));
    assert!((m.network.carbon_grams - 27.9397).abs() < 1e-4);
    assert!(close(m.total.carbon_grams, 25.0 + network_g));
    assert!((m.total.carbon_grams - 52.9397).abs() < 1e-4);
    assert!(close(m.total.carbon_kg, m.total.carbon_grams / 1000.0));
    assert!(close(m.total.total_energy_kwh, 0.05));
    assert_eq!(m.total.runtime_hours, 1.0);
    assert!(close(calc.last_total_carbon(), m.total.carbon_grams));
}

#[test]
fn full_load_and_memory_fields() {
    let usage = FixedUsage {
        cpu: 100.0,
        mem: MemoryReading {
            usage_percent: 50.0,
            used_bytes: 4 << 30,
            total_bytes: 8 << 30,
        },
    };
    let calc = CarbonCalculator::new(Arc::new(usage));
    let m = calc.compute_for_runtime(&snapshot(0, 0), 2.0);
    assert!(close(m.cpu.power_watts, 115.0));
    assert!(close(m.cpu.energy_kwh, 0.23));
    assert!(close(m.cpu.carbon_grams, 115.0));
    assert_eq!(m.network.carbon_grams, 0.0);
    assert_eq!(m.memory.usage_percent, 50.0);
    assert_eq!(m.memory.used_gb, 4.0);
    assert_eq!(m.memory.total_gb, 8.0);
}

#[test]
fn same_inputs_same_outputs() {
    let calc = CarbonCalculator::new(Arc::new(FixedUsage::idle()));
    let snap = snapshot(123_456, 654_321);
    assert_eq!(
        calc.compute_for_runtime(&snap, 0.5),
        calc.compute_for_runtime(&snap, 0.5)
    );
}

#[test]
fn live_runtime_is_small_right_after_construction() {
    let calc = CarbonCalculator::new(Arc::new(FixedUsage::idle()));
    let m = calc.compute_metrics(&snapshot(0, 0));
    assert!(m.total.runtime_hours >= 0.0);
    assert!(m.total.runtime_hours < 0.01);
}

#[test]
fn savings_follow_last_computation() {
    let calc = CarbonCalculator::new(Arc::new(FixedUsage::idle()));
    assert_eq!(
        calc.estimate_savings(OptimizationKind::ReduceCpu)
            .estimated_savings_grams,
        0.0
    );

    let total = calc
        .compute_for_runtime(&snapshot(0, 0), 1.0)
        .total
        .carbon_grams;
    let pm = calc.estimate_savings(OptimizationKind::PowerManagement);
    assert_eq!(pm.potential_reduction_percent, 40);
    assert!(close(pm.estimated_savings_grams, total * 0.40));
    assert_eq!(
        calc.estimate_savings(OptimizationKind::OptimizeNetwork)
            .potential_reduction_percent,
        25
    );

    let unknown = calc.estimate_savings(OptimizationKind::parse_or_default("turbo_mode"));
    assert_eq!(unknown, calc.estimate_savings(OptimizationKind::ReduceCpu));
    assert_eq!(unknown.potential_reduction_percent, 30);
}
