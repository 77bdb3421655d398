//! Supply-chain node definitions and the catalog that holds them.

use crate::patch::{apply_patches, BoundPolicy, Patch, PatchReport, Rejection};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Unique identifier for a supply-chain node, e.g. "gpu_datacenter", "hbm_stacks".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The three roles a node can play in the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Installed, depreciating population (e.g. datacenter accelerators).
    ComputeStock,
    /// Pure production/consumption flow driven by upstream nodes.
    DerivedFlow,
    /// Exogenous demand source; never cleared.
    WorkloadDriver,
}

impl NodeKind {
    /// Whether the node participates in market clearing.
    pub fn is_cleared(self) -> bool {
        !matches!(self, NodeKind::WorkloadDriver)
    }
}

/// Time-shape by which a capacity increment becomes available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampProfile {
    /// Full increment on the effective month.
    Step,
    /// Straight line from zero to the full increment over the ramp duration.
    #[default]
    Linear,
    /// Logistic ramp centred on the middle of the ramp duration.
    SCurve,
}

/// Yield model for a node's production.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum YieldModel {
    /// Constant loss fraction, time-invariant.
    Simple {
        /// Fraction of output lost, in [0,1].
        loss: f64,
    },
    /// Learning curve approaching `target` with the given half-life.
    Stacked {
        /// Yield at month 0.
        initial: f64,
        /// Asymptotic yield.
        target: f64,
        /// Months for the gap to the target to halve.
        halflife_months: f64,
    },
}

impl Default for YieldModel {
    fn default() -> Self {
        YieldModel::Simple { loss: 0.0 }
    }
}

/// A scheduled capacity expansion announced by suppliers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommittedExpansion {
    /// Announced launch date of the expansion.
    pub launch: NaiveDate,
    /// Extra months between launch and first output.
    #[serde(default)]
    pub lead_time_months: u32,
    /// Capacity added once fully ramped (node units per month).
    pub magnitude: f64,
    /// Months from first output to full output.
    #[serde(default)]
    pub ramp_months: u32,
    /// Committed (true) or optional (only counted when a scenario opts in).
    #[serde(default = "default_true")]
    pub committed: bool,
}

fn default_true() -> bool {
    true
}

/// Exogenous workload attached to a workload-driver node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Volume at month 0 (tokens per month, training runs per month, ...).
    pub base_volume: f64,
    /// Accelerator-hours needed per unit of volume at month-0 efficiency.
    pub hours_per_unit: f64,
    /// Demand growth series compounding the volume.
    pub growth_series: String,
    /// Compute-intensity series (context length, reasoning, agents), if any.
    #[serde(default)]
    pub intensity_series: Option<String>,
}

/// A node of the supply chain. Immutable during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Unit of quantities (accelerators, stacks, wafers, MW, ...).
    pub unit: String,
    /// Grouping used by presentation layers (compute, memory, packaging, power, ...).
    pub group: String,
    /// Role of the node.
    pub kind: NodeKind,
    /// Capacity at month 0 in units per month.
    #[serde(default)]
    pub starting_capacity: f64,
    /// Announced expansions in launch order.
    #[serde(default)]
    pub committed_expansions: Vec<CommittedExpansion>,
    /// Ramp shape for all expansions of this node.
    #[serde(default)]
    pub ramp_profile: RampProfile,
    /// Yield model.
    #[serde(default)]
    pub yield_model: YieldModel,
    /// Maximum usable share of nameplate capacity, in (0,1].
    #[serde(default = "default_utilization")]
    pub max_capacity_utilization: f64,
    /// Units of this node consumed per unit of the driving parent.
    #[serde(default)]
    pub input_intensity: f64,
    /// Months between deciding an unplanned expansion and first output.
    #[serde(default)]
    pub lead_time_debottleneck_months: u32,
    /// Upstream drivers of this node's demand.
    #[serde(default)]
    pub parent_node_ids: Vec<NodeId>,
    /// Whether availability of this component limits its compute-stock parents.
    #[serde(default)]
    pub constrains_parent: bool,
    /// Substitutability score in [0,1]; 0 disables substitution.
    #[serde(default)]
    pub substitutability: f64,
    /// Service life used for retirement (compute-stock only).
    #[serde(default)]
    pub service_life_months: Option<f64>,
    /// Share of required compute served by this node (compute-stock only).
    #[serde(default)]
    pub compute_share: f64,
    /// Workload definition (workload drivers only).
    #[serde(default)]
    pub workload: Option<WorkloadSpec>,
    /// On-hand inventory at month 0.
    #[serde(default)]
    pub initial_inventory: f64,
}

fn default_utilization() -> f64 {
    1.0
}

impl Node {
    /// A node with neutral defaults; refine it with the builder methods.
    pub fn new(id: &str, name: &str, unit: &str, group: &str, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            name: name.to_string(),
            unit: unit.to_string(),
            group: group.to_string(),
            kind,
            starting_capacity: 0.0,
            committed_expansions: vec![],
            ramp_profile: RampProfile::default(),
            yield_model: YieldModel::default(),
            max_capacity_utilization: 1.0,
            input_intensity: 0.0,
            lead_time_debottleneck_months: 0,
            parent_node_ids: vec![],
            constrains_parent: false,
            substitutability: 0.0,
            service_life_months: None,
            compute_share: 0.0,
            workload: None,
            initial_inventory: 0.0,
        }
    }

    pub fn capacity(mut self, units_per_month: f64) -> Self {
        self.starting_capacity = units_per_month;
        self
    }

    pub fn utilization(mut self, max: f64) -> Self {
        self.max_capacity_utilization = max;
        self
    }

    pub fn yields(mut self, model: YieldModel) -> Self {
        self.yield_model = model;
        self
    }

    pub fn ramp(mut self, profile: RampProfile) -> Self {
        self.ramp_profile = profile;
        self
    }

    pub fn driven_by(mut self, intensity: f64, parents: &[&str]) -> Self {
        self.input_intensity = intensity;
        self.parent_node_ids = parents.iter().map(|p| NodeId::new(*p)).collect();
        self
    }

    pub fn expansion(mut self, expansion: CommittedExpansion) -> Self {
        self.committed_expansions.push(expansion);
        self
    }

    pub fn lead_time(mut self, months: u32) -> Self {
        self.lead_time_debottleneck_months = months;
        self
    }

    pub fn gating(mut self) -> Self {
        self.constrains_parent = true;
        self
    }

    pub fn substitutable(mut self, score: f64) -> Self {
        self.substitutability = score;
        self
    }

    pub fn service_life(mut self, months: f64) -> Self {
        self.service_life_months = Some(months);
        self
    }

    pub fn share(mut self, compute_share: f64) -> Self {
        self.compute_share = compute_share;
        self
    }

    pub fn workload(mut self, spec: WorkloadSpec) -> Self {
        self.workload = Some(spec);
        self
    }

    pub fn inventory(mut self, units: f64) -> Self {
        self.initial_inventory = units;
        self
    }
}

/// Ordered collection of nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub nodes: Vec<Node>,
}

impl Catalog {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    /// Indices of nodes listing `id` among their parents.
    pub fn children_of(&self, id: &NodeId) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent_node_ids.contains(id))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of nodes of the given kind, in catalog order.
    pub fn indices_of_kind(&self, kind: NodeKind) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// Patch nodes with an override document keyed by node id.
    ///
    /// Each entry is deep-merged into the serialized node. A node whose
    /// patched form no longer deserializes keeps its base definition.
    pub fn with_overrides(&self, doc: &Value, policy: &BoundPolicy) -> (Catalog, PatchReport) {
        let mut report = PatchReport::default();
        let Some(entries) = doc.as_object() else {
            report.rejected.push(Rejection {
                path: "<root>".to_string(),
                reason: "catalog overrides must be keyed by node id".to_string(),
            });
            return (self.clone(), report);
        };
        let mut nodes = self.nodes.clone();
        for (id, subtree) in entries {
            let Some(node) = nodes.iter_mut().find(|n| n.id.as_str() == id) else {
                warn!(node = %id, "override names unknown node");
                report.rejected.push(Rejection {
                    path: id.clone(),
                    reason: "unknown node".to_string(),
                });
                continue;
            };
            let Ok(base) = serde_json::to_value(&*node) else {
                continue;
            };
            let (patched, mut node_report) =
                apply_patches(&base, &[Patch::document(subtree.clone())], policy);
            for r in node_report.rejected.iter_mut() {
                r.path = format!("{}.{}", id, r.path);
            }
            for c in node_report.clamped.iter_mut() {
                c.path = format!("{}.{}", id, c.path);
            }
            match serde_json::from_value::<Node>(patched) {
                Ok(updated) => {
                    *node = updated;
                    report.extend(node_report);
                }
                Err(e) => {
                    warn!(node = %id, error = %e, "patched node is malformed; keeping base");
                    report.rejected.push(Rejection {
                        path: id.clone(),
                        reason: format!("patched node is malformed: {e}"),
                    });
                }
            }
        }
        (Catalog { nodes }, report)
    }
}
