//! Capacity and yield of a node at a month.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sim_core::{CommittedExpansion, Node, RampProfile, Scenario, YieldModel};

/// Capacity increment scheduled by the expansion trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicExpansion {
    /// Month in which the node decided to expand.
    pub decided_month: u32,
    /// First month of output.
    pub effective_month: u32,
    /// Fully ramped increment, node units per month.
    pub magnitude: f64,
    pub ramp_months: u32,
}

/// Share of an increment available `elapsed` months after its effective month.
///
/// Negative elapsed time yields 0; a zero duration behaves as a step.
pub fn ramp_fraction(profile: RampProfile, elapsed: f64, duration: f64) -> f64 {
    if elapsed < 0.0 {
        return 0.0;
    }
    if duration <= 0.0 {
        return 1.0;
    }
    match profile {
        RampProfile::Step => 1.0,
        RampProfile::Linear => (elapsed / duration).min(1.0),
        RampProfile::SCurve => {
            let x = 10.0 * (elapsed / duration - 0.5);
            1.0 / (1.0 + (-x).exp())
        }
    }
}

/// Whole calendar months from `from` to `to` (negative when `to` is earlier).
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to.year() as i64 - from.year() as i64) * 12 + (to.month() as i64 - from.month() as i64)
}

/// Simulation month in which a committed expansion starts producing.
pub fn effective_month(start: NaiveDate, expansion: &CommittedExpansion) -> i64 {
    months_between(start, expansion.launch) + expansion.lead_time_months as i64
}

/// Yield fraction at a month, always in [0, 1].
///
/// Example:
/// let y = yield_at(&YieldModel::Simple { loss: 0.05 }, 10);
/// assert_eq!(y, 0.95);
pub fn yield_at(model: &YieldModel, month: u32) -> f64 {
    let y = match *model {
        YieldModel::Simple { loss } => 1.0 - loss,
        YieldModel::Stacked {
            initial,
            target,
            halflife_months,
        } => {
            if halflife_months <= 0.0 {
                target
            } else {
                target - (target - initial) * 2f64.powf(-(month as f64) / halflife_months)
            }
        }
    };
    if y.is_nan() {
        0.0
    } else {
        y.max(0.0).min(1.0)
    }
}

/// Output available for clearing.
pub fn producible(capacity: f64, max_utilization: f64, yield_fraction: f64) -> f64 {
    (capacity * max_utilization * yield_fraction).max(0.0)
}

/// Capacity rules of one run: start date plus the scenario's shocks and options.
#[derive(Clone, Copy, Debug)]
pub struct CapacityModel<'a> {
    start_date: NaiveDate,
    scenario: &'a Scenario,
}

impl<'a> CapacityModel<'a> {
    pub fn new(start_date: NaiveDate, scenario: &'a Scenario) -> Self {
        Self {
            start_date,
            scenario,
        }
    }

    /// Starting capacity plus ramped announced expansions.
    pub fn scheduled(&self, node: &Node, month: u32) -> f64 {
        let ramped: f64 = node
            .committed_expansions
            .iter()
            .filter(|e| e.committed || self.scenario.include_optional_expansions)
            .map(|e| {
                let elapsed = month as i64 - effective_month(self.start_date, e);
                e.magnitude * ramp_fraction(node.ramp_profile, elapsed as f64, e.ramp_months as f64)
            })
            .sum();
        node.starting_capacity + ramped
    }

    /// Effective capacity:
    /// `(scheduled * supply_growth + triggered) * shock`.
    pub fn capacity(
        &self,
        node: &Node,
        dynamic: &[DynamicExpansion],
        supply_growth: f64,
        month: u32,
    ) -> f64 {
        let triggered: f64 = dynamic
            .iter()
            .map(|d| {
                let elapsed = month as f64 - d.effective_month as f64;
                d.magnitude * ramp_fraction(node.ramp_profile, elapsed, d.ramp_months as f64)
            })
            .sum();
        let organic = self.scheduled(node, month) * supply_growth;
        ((organic + triggered) * self.scenario.shock_multiplier(&node.id, month)).max(0.0)
    }
}
