use sim_core::{
    baseline, AssumptionSet, BlockSchedule, Catalog, Category, EfficiencyMetric, Node, NodeId,
    NodeKind, RateAdjustment, RateKey, Scenario, SimConfig, SupplyShock, WorkloadSpec, YieldModel,
};
use sim_runtime::{cache::monthly_factor, run_baseline, run_scenario, Engine, SimulationResult};

fn chat_workload() -> Node {
    Node::new("wl_chat", "Chat", "tokens", "workload", NodeKind::WorkloadDriver).workload(WorkloadSpec {
        base_volume: 1.0e12,
        hours_per_unit: 1.0e-6,
        growth_series: "chat".into(),
        intensity_series: None,
    })
}

fn flat_with_growth(rate: f64) -> AssumptionSet {
    let mut set = AssumptionSet::empty(BlockSchedule::standard(240));
    set.set_series(RateKey::demand("chat"), vec![rate]);
    set
}

fn baseline_result(years: u32) -> SimulationResult {
    run_baseline(years)
}

fn ramping_gpu_catalog() -> Catalog {
    Catalog::new(vec![
        chat_workload(),
        Node::new("gpu", "GPU", "accelerators", "compute", NodeKind::ComputeStock)
            .capacity(450_000.0)
            .utilization(0.95)
            .yields(YieldModel::Simple { loss: 0.05 })
            .service_life(60.0)
            .share(1.0)
            .lead_time(12),
    ])
}

fn ramping_gpu_config(months: u32) -> SimConfig {
    SimConfig {
        horizon_months: months,
        primary_compute_node: NodeId::new("gpu"),
        calibration_installed_base: Some(5.0e6),
        ..SimConfig::default()
    }
}

#[test]
fn ramping_requirement_builds_backlog() {
    let r = run_scenario(
        &ramping_gpu_catalog(),
        &flat_with_growth(3.0),
        &Scenario::baseline(),
        &ramping_gpu_config(24),
    );
    let gpu = r.node("gpu").unwrap();
    assert!((gpu.supply_potential[0] - 406_125.0).abs() < 1e-6);
    assert!((gpu.installed_base[0] - 5.0e6).abs() < 1.0);
    // month 0 is calibrated, so the gap opens from month 1 on
    for m in 1..=4 {
        assert!(gpu.required_base[m] > gpu.installed_base[m - 1]);
    }
    assert!(gpu.backlog[1] < gpu.backlog[2]);
    assert!(gpu.backlog[2] < gpu.backlog[3]);
    assert!(gpu.backlog[3] < gpu.backlog[4]);
}

#[test]
fn sustained_plan_signal_expands_after_lead_time() {
    let r = run_scenario(
        &ramping_gpu_catalog(),
        &flat_with_growth(3.0),
        &Scenario::baseline(),
        &ramping_gpu_config(48),
    );
    let cap = &r.node("gpu").unwrap().capacity;
    // first decision needs a full 6-month window, then 12 months of lead time
    assert!(cap[..=17].iter().all(|c| (*c - 450_000.0).abs() < 1e-6));
    assert!(cap[20] > 450_000.0);
    // triggers at months 5, 17 and 29 under the 12-month cooldown
    assert!((cap[47] - 738_000.0).abs() < 1e-6);
}

#[test]
fn cooldown_limits_expansions_within_a_run() {
    let mut config = ramping_gpu_config(48);
    config.trigger.cooldown_months = 100;
    let r = run_scenario(&ramping_gpu_catalog(), &flat_with_growth(3.0), &Scenario::baseline(), &config);
    let cap = &r.node("gpu").unwrap().capacity;
    assert!((cap[47] - 540_000.0).abs() < 1e-6);
}

#[test]
fn leftover_backlog_alone_does_not_trigger() {
    // steady fleet of 1000 units retiring over 60 months: 1000/60 purchases a month
    let purchases = 1_000.0 / 60.0;
    let catalog = Catalog::new(vec![
        Node::new("wl", "Chat", "tokens", "workload", NodeKind::WorkloadDriver).workload(WorkloadSpec {
            base_volume: 730.0,
            hours_per_unit: 1.0,
            growth_series: "chat".into(),
            intensity_series: None,
        }),
        Node::new("gpu", "GPU", "units", "compute", NodeKind::ComputeStock)
            .capacity(1_000.0)
            .service_life(60.0)
            .share(1.0),
        Node::new("pkg", "Packaging", "units", "packaging", NodeKind::DerivedFlow)
            .capacity(purchases * 1.05)
            .driven_by(1.0, &["gpu"]),
    ]);
    let config = SimConfig {
        horizon_months: 24,
        target_utilization: 1.0,
        primary_compute_node: NodeId::new("gpu"),
        calibration_installed_base: Some(1_000.0),
        ..SimConfig::default()
    };
    let scenario = Scenario {
        id: "pkg_outage".into(),
        shocks: vec![SupplyShock {
            node_ids: vec!["pkg".into()],
            start_month: 0,
            reduction: 0.5,
            recovery_months: 0,
        }],
        ..Scenario::baseline()
    };
    let r = run_scenario(&catalog, &flat_with_growth(0.0), &scenario, &config);
    let pkg = r.node("pkg").unwrap();
    assert!(pkg.backlog[1] > 0.0);
    assert!(pkg.backlog[5] > 0.0);
    for m in 1..24 {
        assert!(pkg.demand[m] <= pkg.supply_potential[m]);
        assert!((pkg.capacity[m] - purchases * 1.05).abs() < 1e-9);
    }
}

#[test]
fn stacked_yield_approaches_target() {
    let catalog = Catalog::new(vec![
        chat_workload(),
        Node::new("gpu", "GPU", "accelerators", "compute", NodeKind::ComputeStock)
            .capacity(1_000.0)
            .service_life(60.0)
            .share(1.0),
        Node::new("hbm", "HBM", "stacks", "memory", NodeKind::DerivedFlow)
            .capacity(10_000.0)
            .yields(YieldModel::Stacked {
                initial: 0.65,
                target: 0.85,
                halflife_months: 18.0,
            })
            .driven_by(8.0, &["gpu"]),
    ]);
    let config = SimConfig {
        primary_compute_node: NodeId::new("gpu"),
        ..SimConfig::default()
    };
    let r = run_scenario(&catalog, &flat_with_growth(0.1), &Scenario::baseline(), &config);
    let y = &r.node("hbm").unwrap().yield_fraction;
    assert!((y[0] - 0.65).abs() < 1e-12);
    assert!(y.windows(2).all(|w| w[1] >= w[0]));
    assert!(y.iter().all(|v| *v <= 0.85));
    assert!(y[180] > 0.849);
}

#[test]
fn tightness_round_trips_from_stored_arrays() {
    let r = baseline_result(20);
    let eps = baseline::config().epsilon;
    let catalog = baseline::catalog();
    for s in r.nodes.iter().filter(|s| s.kind != NodeKind::WorkloadDriver) {
        let initial = catalog.get(&s.node_id).unwrap().initial_inventory;
        for m in 0..s.len() {
            let (inv_in, backlog_in) = if m == 0 {
                (initial, 0.0)
            } else {
                (s.inventory[m - 1], s.backlog[m - 1])
            };
            let t = (s.demand[m] + backlog_in) / (s.supply_potential[m] + inv_in + eps);
            let tol = 1e-9 * t.abs().max(1.0);
            assert!((t - s.tightness[m]).abs() <= tol, "{} month {m}", s.node_id);
        }
    }
}

#[test]
fn stocks_and_yields_stay_in_bounds() {
    let r = baseline_result(20);
    assert!(r.is_complete());
    assert_eq!(r.months.len(), 240);
    for s in &r.nodes {
        assert!(s.inventory.iter().all(|v| *v >= 0.0), "{}", s.node_id);
        assert!(s.backlog.iter().all(|v| *v >= 0.0), "{}", s.node_id);
        assert!(s.installed_base.iter().all(|v| *v >= 0.0), "{}", s.node_id);
        assert!(s.yield_fraction.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(s.demand.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn efficiency_is_continuous_across_blocks() {
    let config = baseline::config();
    let assumptions = baseline::assumptions(240);
    let engine = Engine::new(baseline::catalog(), &assumptions, &Scenario::baseline(), config);
    for metric in EfficiencyMetric::ALL {
        let key = RateKey::efficiency(metric);
        let s = engine.cache().series(&key).unwrap();
        for m in 1..s.len() {
            let ceiling = engine.config().efficiency_ceiling.unwrap_or(f64::INFINITY);
            if s[m] >= ceiling || s[m] <= 1.0 / ceiling {
                continue;
            }
            let expected = monthly_factor(assumptions.rate_at(&key, m as u32), key.direction());
            assert!((s[m] / s[m - 1] - expected).abs() < 1e-9, "{key} month {m}");
        }
    }
}

#[test]
fn flags_require_persistence() {
    let r = baseline_result(20);
    let p = baseline::config().analysis;
    let k = p.persistence_months as usize;
    for s in &r.nodes {
        for (m, flag) in s.shortage.iter().enumerate() {
            if *flag == 1 {
                assert!(m + 1 >= k);
                assert!(s.tightness[m + 1 - k..=m].iter().all(|t| *t > p.shortage_threshold));
            }
        }
        for (m, flag) in s.glut.iter().enumerate() {
            if *flag == 1 {
                assert!(s.tightness[m + 1 - k..=m].iter().all(|t| *t < p.glut_threshold));
            }
        }
    }
}

#[test]
fn higher_growth_means_higher_workload_demand() {
    let config = baseline::config().with_years(10);
    let assumptions = baseline::assumptions(config.horizon_months);
    let catalog = baseline::catalog();
    let accelerated = Scenario {
        id: "accelerated".into(),
        adjustments: vec![RateAdjustment {
            category: Category::Demand,
            series: "agentic_inference".into(),
            blocks: None,
            delta: 0.5,
        }],
        ..Scenario::baseline()
    };
    let base = run_scenario(&catalog, &assumptions, &Scenario::baseline(), &config);
    let fast = run_scenario(&catalog, &assumptions, &accelerated, &config);
    let b = &base.node("wl_agentic_inference").unwrap().demand;
    let f = &fast.node("wl_agentic_inference").unwrap().demand;
    assert_eq!(b[0], f[0]);
    assert!((1..b.len()).all(|m| f[m] > b[m]));
    let gb = &base.node("gpu_datacenter").unwrap().required_base;
    let gf = &fast.node("gpu_datacenter").unwrap().required_base;
    assert!(gf[60] > gb[60]);
}

#[test]
fn identical_inputs_serialize_identically() {
    let a = serde_json::to_vec(&baseline_result(20)).unwrap();
    let b = serde_json::to_vec(&baseline_result(20)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn supply_shock_cuts_capacity_then_recovers() {
    let config = baseline::config().with_years(5);
    let assumptions = baseline::assumptions(config.horizon_months);
    let catalog = baseline::catalog();
    let shocked = Scenario {
        id: "hbm_shock".into(),
        shocks: vec![SupplyShock {
            node_ids: vec!["hbm_stacks".into()],
            start_month: 12,
            reduction: 0.4,
            recovery_months: 12,
        }],
        ..Scenario::baseline()
    };
    let base = run_scenario(&catalog, &assumptions, &Scenario::baseline(), &config);
    let hit = run_scenario(&catalog, &assumptions, &shocked, &config);
    let cb = &base.node("hbm_stacks").unwrap().capacity;
    let ch = &hit.node("hbm_stacks").unwrap().capacity;
    assert_eq!(cb[11], ch[11]);
    assert!((ch[12] / cb[12] - 0.6).abs() < 1e-9);
    assert!(ch[18] > ch[12]);
}

#[test]
fn summary_is_ranked_and_truncated() {
    let r = baseline_result(20);
    let top = baseline::config().analysis.top_n;
    assert!(r.summary.shortages.len() <= top);
    assert!(r.summary.gluts.len() <= top);
    assert!(r.summary.bottlenecks.len() <= top);
    assert!(r.summary.shortages.windows(2).all(|w| w[0].severity >= w[1].severity));
    assert!(r.summary.gluts.windows(2).all(|w| w[0].severity >= w[1].severity));
    assert!(r.summary.bottlenecks.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(r.summary.bottlenecks.iter().all(|b| b.score > 0.0));
    assert!(r.node("wl_consumer_inference").unwrap().shortage.iter().all(|f| *f == 0));
}
