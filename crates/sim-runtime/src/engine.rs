//! Monthly simulation loop.

use crate::analyzer;
use crate::cache::CompoundingCache;
use crate::capacity::{producible, yield_at, CapacityModel};
use crate::result::{MonthRecord, NodeSeries, RunWarning, SimulationResult, Summary, WarningKind};
use crate::state::NodeState;
use crate::translation::{derived_demand, DemandTranslator};
use crate::triggers::{self, plan_signal};
use chrono::{Months, NaiveDate};
use sim_core::{AssumptionSet, Catalog, Node, NodeId, NodeKind, RateKey, Scenario, SimConfig};
use sim_econ::{clear_flow, clear_stock, price_index, stock_demand, tightness, Clearing};
use tracing::{debug, info, warn};

/// A configured run: catalog, effective assumptions and their multiplier cache.
///
/// One engine per scenario. `run` does not mutate the engine, so the same
/// engine always produces the same result.
#[derive(Clone, Debug)]
pub struct Engine {
    catalog: Catalog,
    config: SimConfig,
    scenario: Scenario,
    assumptions: AssumptionSet,
    cache: CompoundingCache,
    workloads: Vec<usize>,
    compute: Vec<usize>,
    derived_order: Vec<usize>,
    parents: Vec<Vec<usize>>,
    gates: Vec<Vec<usize>>,
    setup_warnings: Vec<RunWarning>,
}

/// Market outcome of one cleared node in one month.
struct Outcome {
    demand: f64,
    supply_potential: f64,
    /// Producible of the node's own capacity, for the plan signal.
    own_potential: f64,
    tightness: f64,
    price: f64,
    clearing: Clearing,
}

fn note(
    warnings: &mut Vec<RunWarning>,
    kind: WarningKind,
    node: Option<&NodeId>,
    month: Option<u32>,
    message: String,
) {
    warn!(?kind, node = ?node.map(NodeId::as_str), ?month, "{message}");
    warnings.push(RunWarning {
        kind,
        node_id: node.cloned(),
        month,
        message,
    });
}

impl Engine {
    /// Prepare a run of `scenario` on top of `base` assumptions.
    pub fn new(catalog: Catalog, base: &AssumptionSet, scenario: &Scenario, config: SimConfig) -> Self {
        let assumptions = scenario.apply_to(base);
        let cache = CompoundingCache::build(&assumptions, config.horizon_months, config.efficiency_ceiling);
        let mut setup_warnings = vec![];
        let parents = resolve_parents(&catalog, &mut setup_warnings);
        let derived_order = derived_order(&catalog, &parents, &mut setup_warnings);
        let compute = catalog.indices_of_kind(NodeKind::ComputeStock);
        let gates = gating_components(&catalog, &parents);
        for &i in &compute {
            if gates[i].is_empty() {
                let id = &catalog.nodes[i].id;
                note(
                    &mut setup_warnings,
                    WarningKind::Unconstrained,
                    Some(id),
                    None,
                    format!("{id} has no gating component; production is unconstrained"),
                );
            }
        }
        Self {
            workloads: catalog.indices_of_kind(NodeKind::WorkloadDriver),
            catalog,
            config,
            scenario: scenario.clone(),
            assumptions,
            cache,
            compute,
            derived_order,
            parents,
            gates,
            setup_warnings,
        }
    }

    /// Swap in new base assumptions. Returns whether the cache was rebuilt.
    pub fn set_assumptions(&mut self, base: &AssumptionSet) -> bool {
        self.assumptions = self.scenario.apply_to(base);
        self.cache.ensure_for(&self.assumptions)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Assumptions after the scenario's adjustments.
    pub fn assumptions(&self) -> &AssumptionSet {
        &self.assumptions
    }

    pub fn cache(&self) -> &CompoundingCache {
        &self.cache
    }

    /// Derived nodes in the order they are cleared.
    pub fn derived_order(&self) -> &[usize] {
        &self.derived_order
    }

    /// Run the full horizon.
    pub fn run(&self) -> SimulationResult {
        let cfg = &self.config;
        let horizon = cfg.horizon_months;
        let eps = cfg.epsilon;
        let n = self.catalog.len();
        let translator = DemandTranslator::new(&self.catalog, cfg);
        let capacity_model = CapacityModel::new(cfg.start_date, &self.scenario);
        let primary = self.catalog.index_of(&cfg.primary_compute_node);
        let mut warnings = self.setup_warnings.clone();
        let k = self.calibration(&translator, primary, &mut warnings);

        let mut states: Vec<NodeState> = self
            .catalog
            .nodes
            .iter()
            .map(|node| NodeState::new(node, horizon))
            .collect();
        let month0 = translator.snapshot(&self.cache, 0);
        for &i in &self.compute {
            states[i].installed_base = k * month0.required_total * self.catalog.nodes[i].compute_share;
        }
        let mut series: Vec<NodeSeries> = self
            .catalog
            .nodes
            .iter()
            .map(|node| NodeSeries::new(node, horizon))
            .collect();
        info!(
            scenario = %self.scenario.id,
            horizon,
            nodes = n,
            calibration = k,
            "starting run"
        );

        let mut capacity = vec![0.0; n];
        let mut yields = vec![0.0; n];
        let mut potential = vec![0.0; n];
        for m in 0..horizon {
            let snap = translator.snapshot(&self.cache, m);
            for (i, node) in self.catalog.nodes.iter().enumerate() {
                if !node.kind.is_cleared() {
                    continue;
                }
                let growth = self.cache.multiplier(&RateKey::supply(node.id.as_str()), m);
                capacity[i] = capacity_model.capacity(node, &states[i].dynamic_expansions, growth, m);
                yields[i] = yield_at(&node.yield_model, m);
                potential[i] = producible(capacity[i], node.max_capacity_utilization, yields[i]);
            }

            let mut records = vec![MonthRecord::default(); n];
            for &i in &self.workloads {
                records[i] = MonthRecord {
                    demand: snap.volumes[i],
                    required_base: k * snap.required[i],
                    ..MonthRecord::default()
                };
            }
            let mut drivers = snap.volumes;

            for &i in &self.compute {
                let node = &self.catalog.nodes[i];
                let supply_potential = match self.component_limit(i, &potential, &states) {
                    Some(limit) => potential[i].min(limit),
                    None => potential[i],
                };
                let required = k * snap.required_total * node.compute_share;
                let st = &mut states[i];
                let life = node.service_life_months.unwrap_or(0.0);
                let wanted = stock_demand(required, st.installed_base, life);
                let demand = finite_or_zero(
                    st.substitution.effective_demand(wanted.demand),
                    node,
                    m,
                    st,
                    &mut warnings,
                );
                let t = tightness(demand, st.backlog, supply_potential, st.inventory, eps);
                let cleared = clear_stock(
                    demand,
                    wanted.retirements,
                    st.installed_base,
                    supply_potential,
                    st.inventory,
                    st.backlog,
                );
                st.installed_base = cleared.installed_base;
                let outcome = Outcome {
                    demand,
                    supply_potential,
                    own_potential: potential[i],
                    tightness: t,
                    price: price_index(t, &cfg.price),
                    clearing: cleared.clearing,
                };
                records[i] = settle(node, st, &outcome, m, cfg, &mut warnings);
                records[i].capacity = capacity[i];
                records[i].yield_fraction = yields[i];
                records[i].installed_base = st.installed_base;
                records[i].required_base = required;
                drivers[i] = demand;
            }

            for &i in &self.derived_order {
                let node = &self.catalog.nodes[i];
                let raw = derived_demand(node.input_intensity, &self.parents[i], &drivers);
                let st = &mut states[i];
                let demand = finite_or_zero(st.substitution.effective_demand(raw), node, m, st, &mut warnings);
                let t = tightness(demand, st.backlog, potential[i], st.inventory, eps);
                let outcome = Outcome {
                    demand,
                    supply_potential: potential[i],
                    own_potential: potential[i],
                    tightness: t,
                    price: price_index(t, &cfg.price),
                    clearing: clear_flow(demand, potential[i], st.inventory, st.backlog),
                };
                records[i] = settle(node, st, &outcome, m, cfg, &mut warnings);
                records[i].capacity = capacity[i];
                records[i].yield_fraction = yields[i];
                drivers[i] = demand;
            }

            for (i, node) in self.catalog.nodes.iter().enumerate() {
                if !node.kind.is_cleared() {
                    continue;
                }
                let fired = triggers::evaluate(
                    &mut states[i],
                    node,
                    primary == Some(i),
                    capacity[i],
                    m,
                    &cfg.trigger,
                );
                if let Some(e) = fired {
                    debug!(
                        node = %node.id,
                        month = m,
                        effective_month = e.effective_month,
                        magnitude = e.magnitude,
                        "capacity expansion triggered"
                    );
                }
            }

            for (s, r) in series.iter_mut().zip(records) {
                s.push(r);
            }
        }

        let months = (0..horizon).map(|m| month_date(cfg.start_date, m)).collect();
        let mut result = SimulationResult {
            scenario_id: self.scenario.id.clone(),
            start_date: cfg.start_date,
            horizon_months: horizon,
            months,
            calibration_factor: k,
            assumptions_fingerprint: self.cache.fingerprint(),
            nodes: series,
            summary: Summary::default(),
            warnings,
        };
        analyzer::analyze(&mut result, &self.catalog, &cfg.analysis);
        info!(
            scenario = %self.scenario.id,
            warnings = result.warnings.len(),
            "run complete"
        );
        result
    }

    /// Single global multiplier mapping month-0 requirement onto the target base.
    fn calibration(
        &self,
        translator: &DemandTranslator<'_>,
        primary: Option<usize>,
        warnings: &mut Vec<RunWarning>,
    ) -> f64 {
        if self.config.calibration_installed_base.is_none() {
            return 1.0;
        }
        let share = primary
            .map(|i| &self.catalog.nodes[i])
            .filter(|node| node.kind == NodeKind::ComputeStock)
            .map(|node| node.compute_share);
        match share.and_then(|s| translator.calibration_factor(&self.cache, s)) {
            Some(k) => k,
            None => {
                note(
                    warnings,
                    WarningKind::CalibrationSkipped,
                    Some(&self.config.primary_compute_node),
                    Some(0),
                    "calibration target not applicable; using factor 1".to_string(),
                );
                1.0
            }
        }
    }

    /// Units of a compute-stock node its gating components can support.
    ///
    /// A component shared by several compute-stock parents is split between
    /// them by compute share.
    fn component_limit(&self, i: usize, potential: &[f64], states: &[NodeState]) -> Option<f64> {
        let nodes = &self.catalog.nodes;
        self.gates[i]
            .iter()
            .map(|&c| {
                let comp = &nodes[c];
                let users: Vec<usize> = self.parents[c]
                    .iter()
                    .copied()
                    .filter(|&p| nodes[p].kind == NodeKind::ComputeStock)
                    .collect();
                let total: f64 = users.iter().map(|&p| nodes[p].compute_share).sum();
                let fraction = if total > 0.0 {
                    nodes[i].compute_share / total
                } else {
                    1.0 / users.len().max(1) as f64
                };
                (potential[c] + states[c].inventory) * fraction / comp.input_intensity
            })
            .reduce(f64::min)
    }
}

/// Apply a clearing outcome to the node state and produce the month's record.
fn settle(
    node: &Node,
    st: &mut NodeState,
    o: &Outcome,
    month: u32,
    cfg: &SimConfig,
    warnings: &mut Vec<RunWarning>,
) -> MonthRecord {
    if o.clearing.clamped && st.first_clamp() {
        note(
            warnings,
            WarningKind::NegativeClamp,
            Some(&node.id),
            Some(month),
            format!("{} inventory or backlog clamped to zero", node.id),
        );
    }
    st.inventory = o.clearing.inventory;
    st.backlog = o.clearing.backlog;
    st.tightness_history.push(o.tightness);
    st.plan_history
        .push(plan_signal(o.demand, o.own_potential, cfg.epsilon));
    st.substitution
        .update(o.price, o.tightness, node.substitutability, &cfg.substitution);
    MonthRecord {
        demand: o.demand,
        supply: o.clearing.deliveries,
        supply_potential: o.supply_potential,
        inventory: st.inventory,
        backlog: st.backlog,
        tightness: o.tightness,
        price_index: o.price,
        ..MonthRecord::default()
    }
}

fn finite_or_zero(
    demand: f64,
    node: &Node,
    month: u32,
    st: &mut NodeState,
    warnings: &mut Vec<RunWarning>,
) -> f64 {
    if demand.is_finite() {
        return demand;
    }
    if st.first_non_finite() {
        note(
            warnings,
            WarningKind::NonFiniteDemand,
            Some(&node.id),
            Some(month),
            format!("{} demand is not finite; treated as zero", node.id),
        );
    }
    0.0
}

fn month_date(start: NaiveDate, month: u32) -> NaiveDate {
    start.checked_add_months(Months::new(month)).unwrap_or(start)
}

fn resolve_parents(catalog: &Catalog, warnings: &mut Vec<RunWarning>) -> Vec<Vec<usize>> {
    catalog
        .nodes
        .iter()
        .map(|node| {
            node.parent_node_ids
                .iter()
                .filter_map(|p| {
                    let idx = catalog.index_of(p);
                    if idx.is_none() {
                        note(
                            warnings,
                            WarningKind::UnknownParent,
                            Some(&node.id),
                            None,
                            format!("{} lists unknown parent {p}; ignored", node.id),
                        );
                    }
                    idx
                })
                .collect()
        })
        .collect()
}

/// Derived nodes ordered so derived parents clear before their children.
///
/// Ties keep catalog order. Nodes left in a cycle are appended in catalog order.
fn derived_order(catalog: &Catalog, parents: &[Vec<usize>], warnings: &mut Vec<RunWarning>) -> Vec<usize> {
    let is_derived: Vec<bool> = catalog
        .nodes
        .iter()
        .map(|n| n.kind == NodeKind::DerivedFlow)
        .collect();
    let mut placed = vec![false; catalog.len()];
    let mut remaining = catalog.indices_of_kind(NodeKind::DerivedFlow);
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|&i| {
            parents[i]
                .iter()
                .all(|&p| p == i || !is_derived[p] || placed[p])
        });
        match ready {
            Some(pos) => {
                let i = remaining.remove(pos);
                placed[i] = true;
                order.push(i);
            }
            None => {
                let ids: Vec<&str> = remaining
                    .iter()
                    .map(|&i| catalog.nodes[i].id.as_str())
                    .collect();
                note(
                    warnings,
                    WarningKind::DependencyCycle,
                    None,
                    None,
                    format!("dependency cycle among {}; clearing in catalog order", ids.join(", ")),
                );
                order.append(&mut remaining);
            }
        }
    }
    order
}

/// For each compute-stock node, children that gate its production.
fn gating_components(catalog: &Catalog, parents: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut gates = vec![vec![]; catalog.len()];
    for (c, comp) in catalog.nodes.iter().enumerate() {
        if !(comp.constrains_parent && comp.kind.is_cleared() && comp.input_intensity > 0.0) {
            continue;
        }
        for &p in &parents[c] {
            if catalog.nodes[p].kind == NodeKind::ComputeStock {
                gates[p].push(c);
            }
        }
    }
    gates
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{BlockSchedule, WorkloadSpec};

    fn workload() -> Node {
        Node::new("wl", "Chat", "tokens", "workload", NodeKind::WorkloadDriver).workload(WorkloadSpec {
            base_volume: 730.0,
            hours_per_unit: 1.0,
            growth_series: "chat".into(),
            intensity_series: None,
        })
    }

    fn gpu() -> Node {
        Node::new("gpu", "GPU", "units", "compute", NodeKind::ComputeStock)
            .capacity(1_000.0)
            .service_life(60.0)
            .share(1.0)
    }

    fn config(months: u32) -> SimConfig {
        SimConfig {
            horizon_months: months,
            target_utilization: 1.0,
            primary_compute_node: NodeId::new("gpu"),
            calibration_installed_base: Some(1_000.0),
            ..SimConfig::default()
        }
    }

    fn flat() -> AssumptionSet {
        AssumptionSet::empty(BlockSchedule::standard(240))
    }

    #[test]
    fn derived_parents_clear_first() {
        let catalog = Catalog::new(vec![
            workload(),
            gpu(),
            Node::new("pkg", "Pkg", "u", "g", NodeKind::DerivedFlow).driven_by(1.0, &["wafer"]),
            Node::new("wafer", "Wafer", "u", "g", NodeKind::DerivedFlow).driven_by(1.0, &["gpu"]),
        ]);
        let engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(12));
        assert_eq!(engine.derived_order(), &[3, 2]);
    }

    #[test]
    fn cycles_fall_back_to_catalog_order_with_warning() {
        let catalog = Catalog::new(vec![
            gpu(),
            Node::new("a", "A", "u", "g", NodeKind::DerivedFlow).driven_by(1.0, &["b"]),
            Node::new("b", "B", "u", "g", NodeKind::DerivedFlow).driven_by(1.0, &["a"]),
        ]);
        let engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(12));
        assert_eq!(engine.derived_order(), &[1, 2]);
        let r = engine.run();
        assert!(r.warnings.iter().any(|w| w.kind == WarningKind::DependencyCycle));
    }

    #[test]
    fn calibrated_base_and_steady_state() {
        let catalog = Catalog::new(vec![workload(), gpu()]);
        let engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(24));
        let r = engine.run();
        assert!(r.is_complete());
        // 730 hours over 730 hours per unit-month = 1 unit, calibrated to 1000
        assert!((r.calibration_factor - 1_000.0).abs() < 1e-6 * 1_000.0);
        let gpu = r.node("gpu").unwrap();
        assert!((gpu.installed_base[0] - 1_000.0).abs() < 1e-6);
        // flat demand: purchases only replace retirements
        assert!((gpu.demand[0] - 1_000.0 / 60.0).abs() < 1e-6);
        assert!(gpu.backlog.iter().all(|b| *b == 0.0));
        assert!(r.warnings.iter().any(|w| w.kind == WarningKind::Unconstrained));
    }

    #[test]
    fn gating_component_limits_compute_supply() {
        let catalog = Catalog::new(vec![
            workload(),
            gpu(),
            Node::new("hbm", "HBM", "stacks", "memory", NodeKind::DerivedFlow)
                .capacity(40.0)
                .driven_by(8.0, &["gpu"])
                .gating(),
        ]);
        let engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(6));
        let r = engine.run();
        let gpu = r.node("gpu").unwrap();
        assert!((gpu.supply_potential[0] - 5.0).abs() < 1e-9);
        assert!(!r.warnings.iter().any(|w| w.kind == WarningKind::Unconstrained));
    }

    #[test]
    fn unknown_parents_are_warned_and_ignored() {
        let catalog = Catalog::new(vec![
            gpu(),
            Node::new("a", "A", "u", "g", NodeKind::DerivedFlow).driven_by(1.0, &["ghost"]),
        ]);
        let engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(3));
        let r = engine.run();
        assert!(r.warnings.iter().any(|w| w.kind == WarningKind::UnknownParent));
        assert!(r.node("a").unwrap().demand.iter().all(|d| *d == 0.0));
    }

    #[test]
    fn set_assumptions_rebuilds_cache_on_change() {
        let catalog = Catalog::new(vec![workload(), gpu()]);
        let mut engine = Engine::new(catalog, &flat(), &Scenario::baseline(), config(12));
        assert!(!engine.set_assumptions(&flat()));
        let mut faster = flat();
        faster.set_series(RateKey::demand("chat"), vec![0.5]);
        assert!(engine.set_assumptions(&faster));
    }

    #[test]
    fn month_dates_follow_calendar() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(month_date(start, 13), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }
}
