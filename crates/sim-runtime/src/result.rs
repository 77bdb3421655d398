//! Serializable output of a simulation run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sim_core::{Node, NodeId, NodeKind};

/// Monthly series of one node. All arrays have the run's horizon length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSeries {
    pub node_id: NodeId,
    pub name: String,
    pub unit: String,
    pub group: String,
    pub kind: NodeKind,
    /// Effective demand (workload drivers: volume).
    pub demand: Vec<f64>,
    /// Cleared deliveries.
    pub supply: Vec<f64>,
    /// Producible output offered to the market.
    pub supply_potential: Vec<f64>,
    pub capacity: Vec<f64>,
    pub yield_fraction: Vec<f64>,
    pub inventory: Vec<f64>,
    pub backlog: Vec<f64>,
    pub tightness: Vec<f64>,
    pub price_index: Vec<f64>,
    pub installed_base: Vec<f64>,
    /// Calibrated installed units required (compute-stock and workload nodes).
    pub required_base: Vec<f64>,
    pub shortage: Vec<u8>,
    pub glut: Vec<u8>,
}

/// One month of one node, as recorded by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MonthRecord {
    pub demand: f64,
    pub supply: f64,
    pub supply_potential: f64,
    pub capacity: f64,
    pub yield_fraction: f64,
    pub inventory: f64,
    pub backlog: f64,
    pub tightness: f64,
    pub price_index: f64,
    pub installed_base: f64,
    pub required_base: f64,
}

impl NodeSeries {
    pub fn new(node: &Node, horizon_months: u32) -> Self {
        let cap = horizon_months as usize;
        let v = || Vec::with_capacity(cap);
        Self {
            node_id: node.id.clone(),
            name: node.name.clone(),
            unit: node.unit.clone(),
            group: node.group.clone(),
            kind: node.kind,
            demand: v(),
            supply: v(),
            supply_potential: v(),
            capacity: v(),
            yield_fraction: v(),
            inventory: v(),
            backlog: v(),
            tightness: v(),
            price_index: v(),
            installed_base: v(),
            required_base: v(),
            shortage: Vec::with_capacity(cap),
            glut: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, r: MonthRecord) {
        self.demand.push(r.demand);
        self.supply.push(r.supply);
        self.supply_potential.push(r.supply_potential);
        self.capacity.push(r.capacity);
        self.yield_fraction.push(r.yield_fraction);
        self.inventory.push(r.inventory);
        self.backlog.push(r.backlog);
        self.tightness.push(r.tightness);
        self.price_index.push(r.price_index);
        self.installed_base.push(r.installed_base);
        self.required_base.push(r.required_base);
    }

    pub fn len(&self) -> usize {
        self.demand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demand.is_empty()
    }

    /// Whether every array has length `n`.
    pub fn has_length(&self, n: usize) -> bool {
        [
            &self.demand,
            &self.supply,
            &self.supply_potential,
            &self.capacity,
            &self.yield_fraction,
            &self.inventory,
            &self.backlog,
            &self.tightness,
            &self.price_index,
            &self.installed_base,
            &self.required_base,
        ]
        .iter()
        .all(|a| a.len() == n)
            && self.shortage.len() == n
            && self.glut.len() == n
    }
}

/// A persistent run of tightness above the shortage threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShortageEvent {
    pub node_id: NodeId,
    pub start_month: u32,
    pub duration_months: u32,
    pub peak_tightness: f64,
    /// `peak * duration`.
    pub severity: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlutClass {
    Soft,
    Hard,
}

/// A persistent run of tightness below a glut threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlutEvent {
    pub node_id: NodeId,
    pub class: GlutClass,
    pub start_month: u32,
    pub duration_months: u32,
    pub trough_tightness: f64,
    /// `(1 - trough) * duration`.
    pub severity: f64,
}

/// Ranked bottleneck candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub node_id: NodeId,
    pub score: f64,
    pub avg_tightness: f64,
    pub shortage_months: u32,
    pub downstream_children: u32,
}

/// Top-N lists of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub shortages: Vec<ShortageEvent>,
    pub gluts: Vec<GlutEvent>,
    pub bottlenecks: Vec<Bottleneck>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Inventory or backlog had to be clamped to zero.
    NegativeClamp,
    /// Compute-stock node without a gating component.
    Unconstrained,
    /// Demand was NaN or infinite and treated as zero.
    NonFiniteDemand,
    /// Derived nodes form a cycle; catalog order used for the rest.
    DependencyCycle,
    /// Parent id not present in the catalog.
    UnknownParent,
    /// Calibration target could not be applied.
    CalibrationSkipped,
}

/// Non-fatal condition observed during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub node_id: Option<NodeId>,
    pub month: Option<u32>,
    pub message: String,
}

/// Full output of one scenario run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario_id: String,
    pub start_date: NaiveDate,
    pub horizon_months: u32,
    /// Calendar month of each simulated month.
    pub months: Vec<NaiveDate>,
    /// Global calibration multiplier applied to translated demand.
    pub calibration_factor: f64,
    /// Fingerprint of the effective assumption set.
    pub assumptions_fingerprint: u64,
    pub nodes: Vec<NodeSeries>,
    pub summary: Summary,
    pub warnings: Vec<RunWarning>,
}

impl SimulationResult {
    pub fn node(&self, id: &str) -> Option<&NodeSeries> {
        self.nodes.iter().find(|n| n.node_id.as_str() == id)
    }

    /// Whether every node series spans the full horizon.
    pub fn is_complete(&self) -> bool {
        let n = self.horizon_months as usize;
        self.months.len() == n && self.nodes.iter().all(|s| s.has_length(n))
    }
}
