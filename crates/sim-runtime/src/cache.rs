//! Cumulative multiplier tables built once per assumption set.

use sim_core::{AssumptionSet, Category, Direction, RateKey};
use std::collections::BTreeMap;
use tracing::debug;

/// Smallest base of a monthly factor; keeps `(1 - r)^(1/12)` real for r >= 1.
pub const MIN_FACTOR_BASE: f64 = 1e-6;

/// Monthly factor equivalent to an annual rate.
///
/// Example:
/// let f = monthly_factor(1.0, Direction::Grow);
/// assert!((f.powi(12) - 2.0).abs() < 1e-12);
pub fn monthly_factor(annual_rate: f64, direction: Direction) -> f64 {
    let base = match direction {
        Direction::Grow => 1.0 + annual_rate,
        Direction::Decline => 1.0 - annual_rate,
    };
    base.max(MIN_FACTOR_BASE).powf(1.0 / 12.0)
}

/// Cumulative multiplier for one series over `horizon` months.
///
/// `cum[0] = 1`; each later month multiplies the previous value by the
/// monthly factor of the block it falls in. With a ceiling the value is held
/// at `ceiling` (growing) or `1/ceiling` (declining) once it gets there.
pub fn compound_series(
    assumptions: &AssumptionSet,
    key: &RateKey,
    horizon_months: u32,
    ceiling: Option<f64>,
) -> Vec<f64> {
    let direction = key.direction();
    let bound = ceiling.filter(|c| *c >= 1.0).map(|c| match direction {
        Direction::Grow => c,
        Direction::Decline => 1.0 / c,
    });
    let len = horizon_months.max(1) as usize;
    let mut out = Vec::with_capacity(len);
    let mut cum = 1.0;
    let mut saturated = false;
    out.push(cum);
    for m in 1..len as u32 {
        if !saturated {
            cum *= monthly_factor(assumptions.rate_at(key, m), direction);
            if let Some(b) = bound {
                let reached = match direction {
                    Direction::Grow => cum >= b,
                    Direction::Decline => cum <= b,
                };
                if reached {
                    cum = b;
                    saturated = true;
                }
            }
        }
        out.push(cum);
    }
    out
}

/// Multiplier tables for every series of an assumption set.
#[derive(Clone, Debug)]
pub struct CompoundingCache {
    fingerprint: u64,
    horizon_months: u32,
    ceiling: Option<f64>,
    tables: BTreeMap<RateKey, Vec<f64>>,
}

impl CompoundingCache {
    /// Build tables for all series. The ceiling only applies to efficiency series.
    pub fn build(assumptions: &AssumptionSet, horizon_months: u32, ceiling: Option<f64>) -> Self {
        let tables = assumptions
            .keys()
            .map(|key| {
                let cap = if key.category == Category::Efficiency {
                    ceiling
                } else {
                    None
                };
                (key.clone(), compound_series(assumptions, key, horizon_months, cap))
            })
            .collect();
        let fingerprint = assumptions.fingerprint();
        debug!(fingerprint, horizon_months, "built compounding cache");
        Self {
            fingerprint,
            horizon_months,
            ceiling,
            tables,
        }
    }

    /// Rebuild when the assumption set changed. Returns whether a rebuild happened.
    pub fn ensure_for(&mut self, assumptions: &AssumptionSet) -> bool {
        if assumptions.fingerprint() == self.fingerprint {
            return false;
        }
        *self = Self::build(assumptions, self.horizon_months, self.ceiling);
        true
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn horizon_months(&self) -> u32 {
        self.horizon_months
    }

    /// Cumulative multiplier of a series at a month. Unknown series are flat (1.0);
    /// months past the horizon hold the last value.
    pub fn multiplier(&self, key: &RateKey, month: u32) -> f64 {
        match self.tables.get(key) {
            Some(t) => t
                .get(month as usize)
                .or_else(|| t.last())
                .copied()
                .unwrap_or(1.0),
            None => 1.0,
        }
    }

    pub fn series(&self, key: &RateKey) -> Option<&[f64]> {
        self.tables.get(key).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::{BlockSchedule, EfficiencyMetric};

    fn set_with(key: RateKey, rates: Vec<f64>) -> AssumptionSet {
        let mut set = AssumptionSet::empty(BlockSchedule::standard(240));
        set.set_series(key, rates);
        set
    }

    #[test]
    fn first_month_is_one_and_a_year_compounds_the_rate() {
        let key = RateKey::demand("consumer");
        let set = set_with(key.clone(), vec![1.0]);
        let cache = CompoundingCache::build(&set, 240, None);
        assert_eq!(cache.multiplier(&key, 0), 1.0);
        assert!((cache.multiplier(&key, 12) - 2.0).abs() < 1e-9);
        assert!((cache.multiplier(&key, 24) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn model_efficiency_declines() {
        let key = RateKey::efficiency(EfficiencyMetric::Model);
        let set = set_with(key.clone(), vec![0.5]);
        let cache = CompoundingCache::build(&set, 240, None);
        assert!((cache.multiplier(&key, 12) - 0.5).abs() < 1e-9);
        assert!(cache.multiplier(&key, 13) < cache.multiplier(&key, 12));
    }

    #[test]
    fn full_decline_stays_finite_and_positive() {
        let key = RateKey::efficiency(EfficiencyMetric::Model);
        let set = set_with(key.clone(), vec![1.5]);
        let cache = CompoundingCache::build(&set, 24, None);
        let v = cache.multiplier(&key, 23);
        assert!(v.is_finite() && v > 0.0);
    }

    #[test]
    fn ceiling_saturates_and_later_rates_are_inert() {
        let key = RateKey::efficiency(EfficiencyMetric::Hardware);
        // 9 blocks: huge growth first, then decline that must not pull it down
        let mut rates = vec![10.0; 5];
        rates.extend([-0.5; 4]);
        let set = set_with(key.clone(), rates);
        let cache = CompoundingCache::build(&set, 240, Some(117.0));
        assert_eq!(cache.multiplier(&key, 239), 117.0);
        let s = cache.series(&key).unwrap();
        assert!(s.iter().all(|v| *v <= 117.0));
    }

    #[test]
    fn ceiling_ignored_for_demand() {
        let key = RateKey::demand("consumer");
        let set = set_with(key.clone(), vec![10.0]);
        let cache = CompoundingCache::build(&set, 60, Some(117.0));
        assert!(cache.multiplier(&key, 59) > 117.0);
    }

    #[test]
    fn unknown_series_is_flat_and_past_horizon_holds() {
        let key = RateKey::demand("consumer");
        let set = set_with(key.clone(), vec![0.2]);
        let cache = CompoundingCache::build(&set, 12, None);
        assert_eq!(cache.multiplier(&RateKey::demand("other"), 5), 1.0);
        assert_eq!(cache.multiplier(&key, 500), cache.multiplier(&key, 11));
    }

    #[test]
    fn ensure_for_rebuilds_only_on_change() {
        let key = RateKey::demand("consumer");
        let set = set_with(key.clone(), vec![0.2]);
        let mut cache = CompoundingCache::build(&set, 24, None);
        assert!(!cache.ensure_for(&set.clone()));
        let mut changed = set.clone();
        changed.adjust(&key, None, 0.1);
        assert!(cache.ensure_for(&changed));
        assert_eq!(cache.fingerprint(), changed.fingerprint());
        assert!((cache.multiplier(&key, 12) - 1.3).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn continuous_across_block_boundaries(r1 in -0.5f64..3.0, r2 in -0.5f64..3.0) {
            let key = RateKey::demand("consumer");
            let set = set_with(key.clone(), vec![r1, r2]);
            let cache = CompoundingCache::build(&set, 36, None);
            // month 12 is the first of year2; its step must be a single monthly factor
            let ratio = cache.multiplier(&key, 12) / cache.multiplier(&key, 11);
            prop_assert!((ratio - monthly_factor(r2, Direction::Grow)).abs() < 1e-9);
            let ratio = cache.multiplier(&key, 11) / cache.multiplier(&key, 10);
            prop_assert!((ratio - monthly_factor(r1, Direction::Grow)).abs() < 1e-9);
        }

        #[test]
        fn positive_growth_is_increasing(r in 0.001f64..5.0) {
            let key = RateKey::demand("x");
            let set = set_with(key.clone(), vec![r]);
            let cache = CompoundingCache::build(&set, 60, None);
            let s = cache.series(&key).unwrap();
            prop_assert!(s.windows(2).all(|w| w[1] > w[0]));
        }
    }
}
