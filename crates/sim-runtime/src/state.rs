//! Mutable per-node state carried from month to month.

use crate::capacity::DynamicExpansion;
use sim_core::Node;
use sim_econ::Substitution;

/// State of one node during a run.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeState {
    pub inventory: f64,
    pub backlog: f64,
    /// Installed population (compute-stock nodes only).
    pub installed_base: f64,
    pub dynamic_expansions: Vec<DynamicExpansion>,
    pub last_expansion_month: Option<u32>,
    /// Market tightness per month, append-only.
    pub tightness_history: Vec<f64>,
    /// Plan signal `demand / supply_potential` per month, append-only.
    pub plan_history: Vec<f64>,
    pub substitution: Substitution,
    clamp_warned: bool,
    non_finite_warned: bool,
}

impl NodeState {
    pub fn new(node: &Node, horizon_months: u32) -> Self {
        let cap = horizon_months as usize;
        Self {
            inventory: node.initial_inventory.max(0.0),
            backlog: 0.0,
            installed_base: 0.0,
            dynamic_expansions: Vec::new(),
            last_expansion_month: None,
            tightness_history: Vec::with_capacity(cap),
            plan_history: Vec::with_capacity(cap),
            substitution: Substitution::default(),
            clamp_warned: false,
            non_finite_warned: false,
        }
    }

    /// Latch for the negative-clamp warning; true only the first time.
    pub fn first_clamp(&mut self) -> bool {
        !std::mem::replace(&mut self.clamp_warned, true)
    }

    /// Latch for the non-finite demand warning; true only the first time.
    pub fn first_non_finite(&mut self) -> bool {
        !std::mem::replace(&mut self.non_finite_warned, true)
    }
}
