//! Baseline node catalog and assumption set.
//!
//! Quantities are monthly flows in each node's unit. Month 0 is January 2025.

use crate::assumptions::{AssumptionDoc, AssumptionSet, BlockSchedule, Confidence, DetailedValue, RawTable, RawValue};
use crate::config::SimConfig;
use crate::node::{Catalog, CommittedExpansion, Node, NodeKind, RampProfile, WorkloadSpec, YieldModel};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Block ids in schedule order.
pub const BLOCK_IDS: [&str; 8] = [
    "year1",
    "year2",
    "year3",
    "year4",
    "year5",
    "years6_10",
    "years11_15",
    "years16_20",
];

fn date(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(NaiveDate::MIN)
}

fn committed(y: i32, m: u32, lead: u32, magnitude: f64, ramp: u32) -> CommittedExpansion {
    CommittedExpansion {
        launch: date(y, m),
        lead_time_months: lead,
        magnitude,
        ramp_months: ramp,
        committed: true,
    }
}

fn optional(y: i32, m: u32, lead: u32, magnitude: f64, ramp: u32) -> CommittedExpansion {
    CommittedExpansion {
        committed: false,
        ..committed(y, m, lead, magnitude, ramp)
    }
}

fn workload(id: &str, name: &str, unit: &str, spec: WorkloadSpec) -> Node {
    Node::new(id, name, unit, "workload", NodeKind::WorkloadDriver).workload(spec)
}

fn spec(base: f64, hours: f64, growth: &str, intensity: Option<&str>) -> WorkloadSpec {
    WorkloadSpec {
        base_volume: base,
        hours_per_unit: hours,
        growth_series: growth.to_string(),
        intensity_series: intensity.map(str::to_string),
    }
}

/// Baseline catalog: workloads, accelerators, and their component supply chain.
pub fn catalog() -> Catalog {
    let accelerators = ["gpu_datacenter", "asic_custom"];
    Catalog::new(vec![
        workload(
            "wl_consumer_inference",
            "Consumer inference",
            "tokens",
            spec(1.5e15, 1.0e-7, "consumer_inference", Some("inference")),
        ),
        workload(
            "wl_enterprise_inference",
            "Enterprise inference",
            "tokens",
            spec(8.0e14, 1.2e-7, "enterprise_inference", Some("inference")),
        ),
        workload(
            "wl_agentic_inference",
            "Agentic inference",
            "tokens",
            spec(2.0e14, 1.5e-7, "agentic_inference", Some("inference")),
        ),
        workload(
            "wl_frontier_training",
            "Frontier training runs",
            "runs",
            spec(0.5, 2.0e7, "frontier_training", None),
        ),
        workload(
            "wl_midtier_training",
            "Mid-tier training runs",
            "runs",
            spec(20.0, 3.0e5, "midtier_training", None),
        ),
        Node::new("gpu_datacenter", "Datacenter GPUs", "accelerators", "compute", NodeKind::ComputeStock)
            .capacity(200_000.0)
            .utilization(0.95)
            .yields(YieldModel::Simple { loss: 0.05 })
            .ramp(RampProfile::SCurve)
            .service_life(60.0)
            .share(0.8)
            .lead_time(18)
            .expansion(committed(2025, 7, 0, 60_000.0, 6))
            .expansion(committed(2026, 3, 0, 80_000.0, 9))
            .expansion(optional(2027, 1, 6, 120_000.0, 12)),
        Node::new("asic_custom", "Custom accelerators", "accelerators", "compute", NodeKind::ComputeStock)
            .capacity(60_000.0)
            .utilization(0.9)
            .yields(YieldModel::Simple { loss: 0.08 })
            .ramp(RampProfile::SCurve)
            .service_life(60.0)
            .share(0.2)
            .lead_time(18)
            .expansion(committed(2025, 10, 0, 30_000.0, 9)),
        Node::new("hbm_stacks", "HBM stacks", "stacks", "memory", NodeKind::DerivedFlow)
            .capacity(3_000_000.0)
            .utilization(0.95)
            .yields(YieldModel::Stacked {
                initial: 0.65,
                target: 0.85,
                halflife_months: 18.0,
            })
            .ramp(RampProfile::SCurve)
            .driven_by(8.0, &accelerators)
            .gating()
            .lead_time(24)
            .expansion(committed(2025, 9, 0, 600_000.0, 12))
            .expansion(committed(2026, 6, 0, 800_000.0, 12)),
        Node::new("cowos_packaging", "Advanced packaging", "packages", "packaging", NodeKind::DerivedFlow)
            .capacity(300_000.0)
            .utilization(0.9)
            .yields(YieldModel::Simple { loss: 0.03 })
            .driven_by(1.0, &accelerators)
            .gating()
            .lead_time(18)
            .expansion(committed(2025, 6, 0, 80_000.0, 9))
            .expansion(committed(2026, 1, 0, 100_000.0, 9)),
        Node::new("leading_logic_wafers", "Leading-edge logic wafers", "wafers", "foundry", NodeKind::DerivedFlow)
            .capacity(12_000.0)
            .utilization(0.92)
            .yields(YieldModel::Stacked {
                initial: 0.7,
                target: 0.9,
                halflife_months: 12.0,
            })
            .ramp(RampProfile::SCurve)
            .driven_by(0.035, &["cowos_packaging"])
            .lead_time(36)
            .expansion(committed(2026, 1, 6, 4_000.0, 12)),
        Node::new("dram_wafers", "DRAM wafers for HBM", "wafers", "memory", NodeKind::DerivedFlow)
            .capacity(50_000.0)
            .utilization(0.95)
            .driven_by(0.02, &["hbm_stacks"])
            .lead_time(30),
        Node::new("silicon_wafers", "300mm raw wafers", "wafers", "materials", NodeKind::DerivedFlow)
            .capacity(80_000.0)
            .utilization(0.9)
            .driven_by(1.0, &["leading_logic_wafers", "dram_wafers"])
            .lead_time(24),
        Node::new("abf_substrates", "ABF substrates", "substrates", "packaging", NodeKind::DerivedFlow)
            .capacity(350_000.0)
            .utilization(0.9)
            .yields(YieldModel::Simple { loss: 0.04 })
            .driven_by(1.05, &["cowos_packaging"])
            .lead_time(18),
        Node::new("interposers", "Silicon interposers", "interposers", "packaging", NodeKind::DerivedFlow)
            .capacity(320_000.0)
            .utilization(0.9)
            .driven_by(1.0, &["cowos_packaging"])
            .lead_time(15),
        Node::new("server_systems", "AI servers", "servers", "systems", NodeKind::DerivedFlow)
            .capacity(40_000.0)
            .utilization(0.9)
            .ramp(RampProfile::Step)
            .driven_by(0.125, &accelerators)
            .lead_time(9),
        Node::new("cpu_host", "Host CPUs", "cpus", "systems", NodeKind::DerivedFlow)
            .capacity(90_000.0)
            .utilization(0.9)
            .driven_by(2.0, &["server_systems"])
            .lead_time(12),
        Node::new("nand_ssd", "Datacenter SSD", "TB", "memory", NodeKind::DerivedFlow)
            .capacity(2_400_000.0)
            .utilization(0.9)
            .driven_by(60.0, &["server_systems"])
            .substitutable(0.2)
            .lead_time(18),
        Node::new("optical_transceivers", "Optical transceivers", "modules", "networking", NodeKind::DerivedFlow)
            .capacity(800_000.0)
            .utilization(0.9)
            .driven_by(2.5, &accelerators)
            .substitutable(0.3)
            .lead_time(12),
        Node::new("network_switches", "Network switches", "switches", "networking", NodeKind::DerivedFlow)
            .capacity(10_000.0)
            .utilization(0.9)
            .driven_by(0.25, &["server_systems"])
            .lead_time(12),
        Node::new("liquid_cooling", "Liquid cooling units", "units", "facilities", NodeKind::DerivedFlow)
            .capacity(20_000.0)
            .utilization(0.9)
            .driven_by(0.5, &["server_systems"])
            .lead_time(12),
        Node::new("datacenter_power", "Datacenter power", "MW", "power", NodeKind::DerivedFlow)
            .capacity(420.0)
            .utilization(0.9)
            .ramp(RampProfile::Linear)
            .driven_by(0.0014, &accelerators)
            .lead_time(36)
            .expansion(committed(2026, 1, 0, 150.0, 24)),
        Node::new("datacenter_shell", "Datacenter shell", "MW", "facilities", NodeKind::DerivedFlow)
            .capacity(450.0)
            .utilization(0.95)
            .driven_by(1.0, &["datacenter_power"])
            .lead_time(24),
        Node::new("power_transformers", "Large power transformers", "units", "power", NodeKind::DerivedFlow)
            .capacity(8.0)
            .utilization(0.95)
            .ramp(RampProfile::Step)
            .driven_by(0.02, &["datacenter_power"])
            .lead_time(30),
        Node::new("gas_turbines", "Gas turbines", "MW", "power", NodeKind::DerivedFlow)
            .capacity(150.0)
            .utilization(0.9)
            .driven_by(0.3, &["datacenter_power"])
            .substitutable(0.4)
            .lead_time(48),
    ])
}

fn table(values: [f64; 8]) -> RawTable {
    BLOCK_IDS
        .iter()
        .zip(values)
        .map(|(id, v)| (id.to_string(), RawValue::Number(v)))
        .collect()
}

fn sourced(values: [f64; 8], confidence: Confidence, source: &str) -> RawTable {
    let mut t = table(values);
    if let Some(first) = t.get_mut("year1") {
        *first = RawValue::Detailed(DetailedValue {
            value: first.value(),
            confidence: Some(confidence),
            source: Some(source.to_string()),
        });
    }
    t
}

/// Baseline assumption document (annual rates per block).
pub fn assumption_doc() -> AssumptionDoc {
    let mut demand = BTreeMap::new();
    demand.insert(
        "consumer_inference".to_string(),
        sourced([1.2, 0.9, 0.7, 0.5, 0.4, 0.25, 0.15, 0.08], Confidence::Medium, "usage disclosures"),
    );
    demand.insert(
        "enterprise_inference".to_string(),
        table([1.5, 1.2, 0.9, 0.7, 0.5, 0.3, 0.15, 0.08]),
    );
    demand.insert(
        "agentic_inference".to_string(),
        sourced([3.0, 2.2, 1.5, 1.0, 0.7, 0.4, 0.2, 0.1], Confidence::Speculative, "adoption surveys"),
    );
    demand.insert(
        "frontier_training".to_string(),
        table([2.0, 1.6, 1.2, 0.9, 0.7, 0.4, 0.2, 0.1]),
    );
    demand.insert(
        "midtier_training".to_string(),
        table([0.8, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.05]),
    );

    let mut efficiency = BTreeMap::new();
    efficiency.insert(
        "model".to_string(),
        sourced([0.40, 0.38, 0.35, 0.32, 0.30, 0.22, 0.15, 0.10], Confidence::Medium, "price-per-token trends"),
    );
    efficiency.insert(
        "systems".to_string(),
        table([0.25, 0.22, 0.20, 0.18, 0.15, 0.12, 0.08, 0.05]),
    );
    efficiency.insert(
        "hardware".to_string(),
        sourced([0.35, 0.33, 0.30, 0.28, 0.25, 0.20, 0.15, 0.10], Confidence::High, "vendor roadmaps"),
    );

    let mut intensity = BTreeMap::new();
    intensity.insert(
        "inference".to_string(),
        table([0.6, 0.5, 0.4, 0.3, 0.25, 0.15, 0.08, 0.04]),
    );

    let mut supply = BTreeMap::new();
    for (node, rates) in [
        ("hbm_stacks", [0.20, 0.18, 0.15, 0.12, 0.10, 0.08, 0.05, 0.03]),
        ("cowos_packaging", [0.30, 0.25, 0.20, 0.15, 0.12, 0.08, 0.05, 0.03]),
        ("leading_logic_wafers", [0.15, 0.15, 0.12, 0.10, 0.10, 0.08, 0.05, 0.03]),
        ("dram_wafers", [0.10, 0.10, 0.08, 0.08, 0.06, 0.05, 0.04, 0.03]),
        ("datacenter_power", [0.15, 0.15, 0.12, 0.12, 0.10, 0.08, 0.06, 0.05]),
        ("power_transformers", [0.05, 0.08, 0.10, 0.10, 0.08, 0.06, 0.05, 0.04]),
        ("optical_transceivers", [0.25, 0.20, 0.18, 0.15, 0.12, 0.08, 0.05, 0.03]),
    ] {
        supply.insert(node.to_string(), table(rates));
    }

    AssumptionDoc {
        demand,
        efficiency,
        intensity,
        supply,
    }
}

/// Baseline assumption set over the standard 20-year partition.
pub fn assumptions(horizon_months: u32) -> AssumptionSet {
    AssumptionSet::from_doc(&assumption_doc(), BlockSchedule::standard(horizon_months))
}

/// Baseline configuration, calibrated to six million installed primary accelerators.
pub fn config() -> SimConfig {
    SimConfig {
        calibration_installed_base: Some(6.0e6),
        ..SimConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{validate_catalog, validate_config, RateKey};

    #[test]
    fn baseline_catalog_is_valid() {
        let cat = catalog();
        validate_catalog(&cat, &config()).unwrap();
        validate_config(&config()).unwrap();
        assert!(cat.len() >= 20);
        let shares: f64 = cat
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::ComputeStock)
            .map(|n| n.compute_share)
            .sum();
        assert!((shares - 1.0).abs() < 1e-12);
    }

    #[test]
    fn every_workload_series_has_rates() {
        let set = assumptions(240);
        for n in catalog().nodes {
            if let Some(w) = n.workload {
                assert!(set.series(&RateKey::demand(&w.growth_series)).is_some(), "{}", w.growth_series);
                if let Some(i) = w.intensity_series {
                    assert!(set.series(&RateKey::intensity(&i)).is_some());
                }
            }
        }
    }

    #[test]
    fn baseline_doc_roundtrips_through_json() {
        let doc = assumption_doc();
        let back = AssumptionDoc::from_value(doc.to_value()).unwrap();
        assert_eq!(back, doc);
    }
}
