//! Run configuration.
//!
//! Every section deserializes with defaults so scenario packs can carry a
//! partial configuration.

use crate::node::NodeId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Price index curve: `sqrt(t)` below balance, `1 + a*(t-1)^b` above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceParams {
    pub a: f64,
    pub b: f64,
    pub min_price: f64,
    pub max_price: f64,
}

impl Default for PriceParams {
    fn default() -> Self {
        Self {
            a: 2.0,
            b: 1.5,
            min_price: 0.5,
            max_price: 5.0,
        }
    }
}

/// Exponential smoothing of the substitution share.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstitutionParams {
    /// Step toward the target share per month (λ).
    pub lambda: f64,
    /// Smoothing factor of the price signal.
    pub price_smoothing: f64,
}

impl Default for SubstitutionParams {
    fn default() -> Self {
        Self {
            lambda: 0.15,
            price_smoothing: 0.3,
        }
    }
}

/// Endogenous capacity expansion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerParams {
    /// Trailing window of the moving average, in months.
    pub window_months: u32,
    /// Threshold for the primary compute-stock node.
    pub primary_threshold: f64,
    /// Threshold for every other node.
    pub threshold: f64,
    /// Minimum months between two triggers on a node.
    pub cooldown_months: u32,
    /// Increment as a fraction of capacity at trigger time.
    pub increment_fraction: f64,
    /// Ramp duration of triggered increments.
    pub ramp_months: u32,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            window_months: 6,
            primary_threshold: 1.10,
            threshold: 1.15,
            cooldown_months: 12,
            increment_fraction: 0.20,
            ramp_months: 6,
        }
    }
}

/// Post-run event detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub shortage_threshold: f64,
    pub persistence_months: u32,
    pub glut_threshold: f64,
    pub hard_glut_threshold: f64,
    pub hard_glut_persistence_months: u32,
    /// Length of the ranked summary lists.
    pub top_n: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            shortage_threshold: 1.05,
            persistence_months: 3,
            glut_threshold: 0.95,
            hard_glut_threshold: 0.80,
            hard_glut_persistence_months: 2,
            top_n: 10,
        }
    }
}

/// Simulation configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Calendar month of simulation month 0.
    pub start_date: NaiveDate,
    /// Number of simulated months (default: 240).
    pub horizon_months: u32,
    /// Hours in a month of accelerator time.
    pub hours_per_month: f64,
    /// Utilization assumed when converting hours into installed units.
    pub target_utilization: f64,
    /// Additive guard in every ratio denominator.
    pub epsilon: f64,
    /// Cap on cumulative efficiency gain per metric, if any.
    pub efficiency_ceiling: Option<f64>,
    /// Compute-stock node used for calibration and the primary trigger threshold.
    pub primary_compute_node: NodeId,
    /// Installed base of the primary node at month 0, if calibrating.
    pub calibration_installed_base: Option<f64>,
    pub price: PriceParams,
    pub substitution: SubstitutionParams,
    pub trigger: TriggerParams,
    pub analysis: AnalysisParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN),
            horizon_months: 240,
            hours_per_month: 730.0,
            target_utilization: 0.7,
            epsilon: 1e-9,
            efficiency_ceiling: Some(117.0),
            primary_compute_node: NodeId::new("gpu_datacenter"),
            calibration_installed_base: None,
            price: PriceParams::default(),
            substitution: SubstitutionParams::default(),
            trigger: TriggerParams::default(),
            analysis: AnalysisParams::default(),
        }
    }
}

impl SimConfig {
    /// Config for a horizon in years.
    pub fn with_years(mut self, years: u32) -> Self {
        self.horizon_months = years.saturating_mul(12);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: SimConfig = serde_json::from_value(serde_json::json!({
            "horizon_months": 120,
            "trigger": {"cooldown_months": 24}
        }))
        .unwrap();
        assert_eq!(cfg.horizon_months, 120);
        assert_eq!(cfg.trigger.cooldown_months, 24);
        assert_eq!(cfg.trigger.window_months, 6);
        assert_eq!(cfg.price, PriceParams::default());
        assert_eq!(cfg.start_date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn years_convert_to_months() {
        assert_eq!(SimConfig::default().with_years(5).horizon_months, 60);
        assert_eq!(SimConfig::default().with_years(u32::MAX).horizon_months, u32::MAX);
    }
}
