//! Scenario overrides: sparse rate adjustments plus supply shocks.

use crate::assumptions::{AssumptionSet, Category, RateKey};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Additive change to an annual rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateAdjustment {
    pub category: Category,
    pub series: String,
    /// Blocks affected; all blocks when absent.
    #[serde(default)]
    pub blocks: Option<Vec<String>>,
    pub delta: f64,
}

impl RateAdjustment {
    pub fn key(&self) -> RateKey {
        RateKey::new(self.category, self.series.clone())
    }
}

/// Capacity disruption with linear recovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplyShock {
    pub node_ids: Vec<NodeId>,
    pub start_month: u32,
    /// Capacity lost at the shock month, in [0,1].
    pub reduction: f64,
    /// Months until capacity is fully restored.
    #[serde(default)]
    pub recovery_months: u32,
}

impl SupplyShock {
    pub fn affects(&self, id: &NodeId) -> bool {
        self.node_ids.contains(id)
    }

    /// Capacity multiplier at `month`.
    ///
    /// Full reduction at the start month, shrinking linearly to zero over
    /// `recovery_months`. With no recovery window only the start month is hit.
    pub fn multiplier(&self, month: u32) -> f64 {
        if month < self.start_month {
            return 1.0;
        }
        let reduction = self.reduction.clamp(0.0, 1.0);
        let elapsed = f64::from(month - self.start_month);
        let remaining = if self.recovery_months == 0 {
            if elapsed == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - (elapsed / f64::from(self.recovery_months)).min(1.0)
        };
        1.0 - reduction * remaining
    }
}

/// A read-only patch applied on top of base assumptions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub adjustments: Vec<RateAdjustment>,
    #[serde(default)]
    pub shocks: Vec<SupplyShock>,
    /// Count non-committed expansions as well.
    #[serde(default)]
    pub include_optional_expansions: bool,
}

impl Scenario {
    pub fn baseline() -> Self {
        Self {
            id: "base".to_string(),
            name: "Baseline".to_string(),
            ..Self::default()
        }
    }

    /// Effective assumptions for this scenario. `base` is left untouched.
    pub fn apply_to(&self, base: &AssumptionSet) -> AssumptionSet {
        let mut out = base.clone();
        for adj in &self.adjustments {
            out.adjust(&adj.key(), adj.blocks.as_deref(), adj.delta);
        }
        out
    }

    /// Combined shock multiplier for a node; overlapping shocks multiply.
    pub fn shock_multiplier(&self, id: &NodeId, month: u32) -> f64 {
        self.shocks
            .iter()
            .filter(|s| s.affects(id))
            .map(|s| s.multiplier(month))
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::BlockSchedule;
    use proptest::prelude::*;

    fn shock(recovery: u32) -> SupplyShock {
        SupplyShock {
            node_ids: vec![NodeId::new("hbm")],
            start_month: 10,
            reduction: 0.4,
            recovery_months: recovery,
        }
    }

    #[test]
    fn shock_recovers_linearly() {
        let s = shock(4);
        assert_eq!(s.multiplier(9), 1.0);
        assert!((s.multiplier(10) - 0.6).abs() < 1e-12);
        assert!((s.multiplier(12) - 0.8).abs() < 1e-12);
        assert_eq!(s.multiplier(14), 1.0);
        assert_eq!(s.multiplier(100), 1.0);
    }

    #[test]
    fn shock_without_recovery_window_hits_one_month() {
        let s = shock(0);
        assert!((s.multiplier(10) - 0.6).abs() < 1e-12);
        assert_eq!(s.multiplier(11), 1.0);
    }

    #[test]
    fn overlapping_shocks_multiply() {
        let mut sc = Scenario::baseline();
        sc.shocks = vec![shock(4), shock(4)];
        let m = sc.shock_multiplier(&NodeId::new("hbm"), 10);
        assert!((m - 0.36).abs() < 1e-12);
        assert_eq!(sc.shock_multiplier(&NodeId::new("gpu"), 10), 1.0);
    }

    #[test]
    fn apply_does_not_mutate_base() {
        let base = AssumptionSet::empty(BlockSchedule::standard(240));
        let mut sc = Scenario::baseline();
        sc.adjustments.push(RateAdjustment {
            category: Category::Demand,
            series: "chat".into(),
            blocks: None,
            delta: 0.25,
        });
        let out = sc.apply_to(&base);
        assert_eq!(base.rate(&RateKey::demand("chat"), 3), 0.0);
        assert_eq!(out.rate(&RateKey::demand("chat"), 3), 0.25);
    }

    proptest! {
        #[test]
        fn multiplier_is_bounded(month in 0u32..400, reduction in 0.0f64..1.0, recovery in 0u32..48) {
            let s = SupplyShock { node_ids: vec![], start_month: 24, reduction, recovery_months: recovery };
            let m = s.multiplier(month);
            prop_assert!(m >= 1.0 - reduction - 1e-12);
            prop_assert!(m <= 1.0);
        }
    }
}
