#![deny(warnings)]

//! Market clearing and pricing for the supply-chain forecaster.
//!
//! This module provides the per-node, per-month rules:
//! - Tightness ratio with an additive epsilon guard
//! - Price index as a function of tightness
//! - Clearing of flows and of installed stocks with retirement
//! - Price-driven substitution away from a tight node
//!
//! None of these functions fail: inputs that would break an invariant are
//! clamped and the caller is told through the returned values.

use serde::{Deserialize, Serialize};
use sim_core::{PriceParams, SubstitutionParams};
use thiserror::Error;

/// Errors produced when validating economic parameters.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Price curve parameters are out of range.
    #[error("invalid price curve: {0}")]
    InvalidPriceCurve(&'static str),
    /// Substitution smoothing parameters are out of range.
    #[error("invalid substitution parameter: {0}")]
    InvalidSubstitution(&'static str),
}

/// Validate price curve parameters: `a >= 0`, `b > 0`, `0 <= min <= 1 <= max`.
pub fn validate_price_params(p: &PriceParams) -> Result<(), EconError> {
    if !(p.a.is_finite() && p.a >= 0.0) {
        return Err(EconError::InvalidPriceCurve("a must be finite and >= 0"));
    }
    if !(p.b.is_finite() && p.b > 0.0) {
        return Err(EconError::InvalidPriceCurve("b must be finite and > 0"));
    }
    if !(p.min_price.is_finite() && p.max_price.is_finite()) {
        return Err(EconError::InvalidPriceCurve("bounds must be finite"));
    }
    if !(0.0..=1.0).contains(&p.min_price) || p.max_price < 1.0 {
        return Err(EconError::InvalidPriceCurve("bounds must bracket 1"));
    }
    Ok(())
}

/// Validate substitution smoothing: `lambda` in [0,1], price smoothing in (0,1].
pub fn validate_substitution_params(s: &SubstitutionParams) -> Result<(), EconError> {
    if !(s.lambda.is_finite() && (0.0..=1.0).contains(&s.lambda)) {
        return Err(EconError::InvalidSubstitution("lambda"));
    }
    if !(s.price_smoothing.is_finite() && s.price_smoothing > 0.0 && s.price_smoothing <= 1.0) {
        return Err(EconError::InvalidSubstitution("price_smoothing"));
    }
    Ok(())
}

/// Total claim over total availability.
///
/// `(demand + backlog_in) / (supply + inventory_in + eps)`
pub fn tightness(demand: f64, backlog_in: f64, supply: f64, inventory_in: f64, eps: f64) -> f64 {
    (demand + backlog_in) / (supply + inventory_in + eps)
}

/// Price index relative to balance (1.0).
///
/// Below balance the price softens as `sqrt(t)`; above it rises as
/// `1 + a*(t-1)^b`. The result is clamped to `[min_price, max_price]`.
///
/// Example:
/// let p = price_index(1.0, &PriceParams::default());
/// assert_eq!(p, 1.0);
pub fn price_index(t: f64, p: &PriceParams) -> f64 {
    if t.is_nan() {
        return 1.0_f64.max(p.min_price).min(p.max_price);
    }
    let raw = if t <= 1.0 {
        t.max(0.0).sqrt()
    } else {
        1.0 + p.a * (t - 1.0).powf(p.b)
    };
    // max/min rather than clamp: misconfigured bounds must not panic
    raw.max(p.min_price).min(p.max_price)
}

/// Result of clearing one node for one month.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clearing {
    /// Units shipped this month.
    pub deliveries: f64,
    /// Inventory carried into next month (>= 0).
    pub inventory: f64,
    /// Backlog carried into next month (>= 0).
    pub backlog: f64,
    /// Whether inventory or backlog had to be clamped up to zero.
    pub clamped: bool,
}

/// Clear a flow: ship what is available against what is claimed.
///
/// Example:
/// let c = clear_flow(100.0, 80.0, 0.0, 0.0);
/// assert_eq!(c.deliveries, 80.0);
/// assert_eq!(c.backlog, 20.0);
pub fn clear_flow(demand: f64, producible: f64, inventory_in: f64, backlog_in: f64) -> Clearing {
    let available = producible + inventory_in;
    let claim = demand + backlog_in;
    let deliveries = available.min(claim).max(0.0);
    let inventory = inventory_in + producible - deliveries;
    let backlog = backlog_in + demand - deliveries;
    Clearing {
        deliveries,
        inventory: inventory.max(0.0),
        backlog: backlog.max(0.0),
        clamped: inventory < 0.0 || backlog < 0.0,
    }
}

/// Gross purchase demand of a compute-stock node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockDemand {
    /// `max(0, required - installed) + retirements`.
    pub demand: f64,
    /// `installed / service_life`.
    pub retirements: f64,
}

/// Purchases needed to reach `required` and replace retiring units.
pub fn stock_demand(required: f64, installed_base: f64, service_life_months: f64) -> StockDemand {
    let installed = installed_base.max(0.0);
    let retirements = if service_life_months > 0.0 {
        installed / service_life_months
    } else {
        0.0
    };
    StockDemand {
        demand: (required - installed).max(0.0) + retirements,
        retirements,
    }
}

/// Clearing of a compute-stock node plus its updated installed base.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockClearing {
    pub clearing: Clearing,
    /// Installed base after deliveries and retirements (>= 0).
    pub installed_base: f64,
}

/// Clear a compute-stock node: deliveries join the installed base, retirements leave it.
pub fn clear_stock(
    demand: f64,
    retirements: f64,
    installed_base: f64,
    producible: f64,
    inventory_in: f64,
    backlog_in: f64,
) -> StockClearing {
    let clearing = clear_flow(demand, producible, inventory_in, backlog_in);
    StockClearing {
        clearing,
        installed_base: (installed_base + clearing.deliveries - retirements).max(0.0),
    }
}

/// Substitution state of a node: share of demand diverted to alternatives.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    /// Share of raw demand served elsewhere, in [0, substitutability].
    pub share: f64,
    /// Exponentially smoothed price index.
    pub smoothed_price: f64,
}

impl Default for Substitution {
    fn default() -> Self {
        Self {
            share: 0.0,
            smoothed_price: 1.0,
        }
    }
}

impl Substitution {
    /// Demand left after substitution.
    pub fn effective_demand(&self, demand: f64) -> f64 {
        demand * (1.0 - self.share)
    }

    /// Update from this month's price and tightness.
    ///
    /// Under shortage the share moves toward `s * (1 - 1/smoothed_price)`;
    /// otherwise it relaxes toward zero. Nodes with `s == 0` never move.
    pub fn update(&mut self, price: f64, tightness: f64, substitutability: f64, p: &SubstitutionParams) {
        if substitutability <= 0.0 || !price.is_finite() {
            return;
        }
        self.smoothed_price += p.price_smoothing * (price - self.smoothed_price);
        let target = if tightness > 1.0 && self.smoothed_price > 1.0 {
            substitutability * (1.0 - 1.0 / self.smoothed_price)
        } else {
            0.0
        };
        self.share += p.lambda * (target - self.share);
        self.share = self.share.max(0.0).min(substitutability.min(1.0));
    }
}
