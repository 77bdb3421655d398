#![deny(warnings)]

//! Core domain models and invariants for the supply-chain forecaster.
//!
//! This crate defines the serializable inputs of a run (node catalog,
//! assumption tables, scenarios, configuration), the override patch reducer,
//! and validation helpers that callers use before handing inputs to the
//! engine.

pub mod assumptions;
pub mod baseline;
pub mod config;
pub mod node;
pub mod patch;
pub mod scenario;

pub use assumptions::{
    AssumptionDoc, AssumptionSet, BlockSchedule, BlockSpan, Category, Confidence, DetailedValue,
    Direction, EfficiencyMetric, Provenance, RateKey, RawValue,
};
pub use config::{AnalysisParams, PriceParams, SimConfig, SubstitutionParams, TriggerParams};
pub use node::{
    Catalog, CommittedExpansion, Node, NodeId, NodeKind, RampProfile, WorkloadSpec, YieldModel,
};
pub use patch::{apply_patches, BoundPolicy, ClampRecord, Patch, PatchReport, Rejection};
pub use scenario::{RateAdjustment, Scenario, SupplyShock};

use std::collections::BTreeSet;
use thiserror::Error;

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The catalog holds no nodes.
    #[error("catalog is empty")]
    EmptyCatalog,
    /// Two nodes share an id.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    /// A parent reference points nowhere.
    #[error("node {node} references unknown parent {parent}")]
    UnknownParent { node: String, parent: String },
    /// Utilization must be within (0, 1].
    #[error("node {0}: max capacity utilization must be within (0,1]")]
    InvalidUtilization(String),
    /// Yield parameters must be within [0, 1] and half-life >= 0.
    #[error("node {0}: yield parameters out of range")]
    InvalidYield(String),
    /// Quantities must be finite and non-negative.
    #[error("node {node}: {field} must be finite and >= 0")]
    NegativeQuantity { node: String, field: String },
    /// Fields inconsistent with the node kind.
    #[error("node {node}: {reason}")]
    KindMismatch { node: String, reason: String },
    /// The configured primary compute node is missing or not compute-stock.
    #[error("primary compute node {0} is missing or not a compute-stock node")]
    MissingPrimary(String),
    /// Assumption blocks leave a month uncovered.
    #[error("assumption blocks leave month {0} uncovered")]
    BlockGap(u32),
    /// Assumption blocks overlap or are empty.
    #[error("assumption block {0} overlaps its predecessor or is empty")]
    BlockOverlap(String),
    /// Numeric configuration must be finite and positive.
    #[error("configuration value {0} must be finite and > 0")]
    InvalidConfig(&'static str),
    /// A document does not have the expected shape.
    #[error("malformed document: {0}")]
    MalformedDocument(String),
}

fn non_negative(node: &Node, field: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NegativeQuantity {
            node: node.id.0.clone(),
            field: field.to_string(),
        })
    }
}

fn mismatch(node: &Node, reason: &str) -> ValidationError {
    ValidationError::KindMismatch {
        node: node.id.0.clone(),
        reason: reason.to_string(),
    }
}

/// Validate the yield model parameters.
pub fn validate_yield(node: &Node) -> Result<(), ValidationError> {
    let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    let ok = match node.yield_model {
        YieldModel::Simple { loss } => unit(loss),
        YieldModel::Stacked {
            initial,
            target,
            halflife_months,
        } => unit(initial) && unit(target) && halflife_months.is_finite() && halflife_months >= 0.0,
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidYield(node.id.0.clone()))
    }
}

/// Validate a single node in isolation.
pub fn validate_node(node: &Node) -> Result<(), ValidationError> {
    non_negative(node, "starting_capacity", node.starting_capacity)?;
    non_negative(node, "input_intensity", node.input_intensity)?;
    non_negative(node, "initial_inventory", node.initial_inventory)?;
    non_negative(node, "compute_share", node.compute_share)?;
    for e in &node.committed_expansions {
        non_negative(node, "committed_expansions.magnitude", e.magnitude)?;
    }
    let u = node.max_capacity_utilization;
    if !(u.is_finite() && u > 0.0 && u <= 1.0) {
        return Err(ValidationError::InvalidUtilization(node.id.0.clone()));
    }
    if !(node.substitutability.is_finite() && (0.0..=1.0).contains(&node.substitutability)) {
        return Err(ValidationError::NegativeQuantity {
            node: node.id.0.clone(),
            field: "substitutability".to_string(),
        });
    }
    validate_yield(node)?;
    match node.kind {
        NodeKind::WorkloadDriver => {
            let Some(w) = &node.workload else {
                return Err(mismatch(node, "workload driver without workload"));
            };
            non_negative(node, "workload.base_volume", w.base_volume)?;
            non_negative(node, "workload.hours_per_unit", w.hours_per_unit)?;
        }
        NodeKind::ComputeStock => {
            if node.workload.is_some() {
                return Err(mismatch(node, "only workload drivers carry a workload"));
            }
            match node.service_life_months {
                Some(life) if life.is_finite() && life > 0.0 => {}
                _ => return Err(mismatch(node, "compute-stock node needs a positive service life")),
            }
        }
        NodeKind::DerivedFlow => {
            if node.workload.is_some() {
                return Err(mismatch(node, "only workload drivers carry a workload"));
            }
            if node.parent_node_ids.is_empty() {
                return Err(mismatch(node, "derived-flow node without parents"));
            }
        }
    }
    Ok(())
}

/// Validate the whole catalog, including cross-references and the primary node.
pub fn validate_catalog(catalog: &Catalog, cfg: &SimConfig) -> Result<(), ValidationError> {
    if catalog.is_empty() {
        return Err(ValidationError::EmptyCatalog);
    }
    let mut ids: BTreeSet<&NodeId> = BTreeSet::new();
    for n in &catalog.nodes {
        validate_node(n)?;
        if !ids.insert(&n.id) {
            return Err(ValidationError::DuplicateNode(n.id.0.clone()));
        }
    }
    for n in &catalog.nodes {
        for p in &n.parent_node_ids {
            if !ids.contains(p) {
                return Err(ValidationError::UnknownParent {
                    node: n.id.0.clone(),
                    parent: p.0.clone(),
                });
            }
        }
    }
    match catalog.get(&cfg.primary_compute_node) {
        Some(n) if n.kind == NodeKind::ComputeStock => {}
        _ => {
            return Err(ValidationError::MissingPrimary(
                cfg.primary_compute_node.0.clone(),
            ))
        }
    }
    Ok(())
}

/// Validate numeric configuration.
pub fn validate_config(cfg: &SimConfig) -> Result<(), ValidationError> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if cfg.horizon_months == 0 {
        return Err(ValidationError::InvalidConfig("horizon_months"));
    }
    if !positive(cfg.hours_per_month) {
        return Err(ValidationError::InvalidConfig("hours_per_month"));
    }
    if !positive(cfg.target_utilization) {
        return Err(ValidationError::InvalidConfig("target_utilization"));
    }
    if !positive(cfg.epsilon) {
        return Err(ValidationError::InvalidConfig("epsilon"));
    }
    if let Some(c) = cfg.efficiency_ceiling {
        if !(positive(c) && c >= 1.0) {
            return Err(ValidationError::InvalidConfig("efficiency_ceiling"));
        }
    }
    if let Some(base) = cfg.calibration_installed_base {
        if !positive(base) {
            return Err(ValidationError::InvalidConfig("calibration_installed_base"));
        }
    }
    if cfg.trigger.window_months == 0 {
        return Err(ValidationError::InvalidConfig("trigger.window_months"));
    }
    if cfg.analysis.persistence_months == 0 || cfg.analysis.hard_glut_persistence_months == 0 {
        return Err(ValidationError::InvalidConfig("analysis.persistence_months"));
    }
    Ok(())
}
