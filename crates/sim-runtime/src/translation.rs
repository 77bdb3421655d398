//! Workload volumes to accelerator-hours to required compute stock.

use crate::cache::CompoundingCache;
use sim_core::{Catalog, EfficiencyMetric, NodeKind, RateKey, SimConfig, WorkloadSpec};

/// Cumulative efficiency multipliers at one month.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Efficiency {
    /// Compute per unit of work; declines with algorithmic progress.
    pub model: f64,
    pub systems: f64,
    pub hardware: f64,
}

impl Efficiency {
    pub fn at(cache: &CompoundingCache, month: u32) -> Self {
        Self {
            model: cache.multiplier(&RateKey::efficiency(EfficiencyMetric::Model), month),
            systems: cache.multiplier(&RateKey::efficiency(EfficiencyMetric::Systems), month),
            hardware: cache.multiplier(&RateKey::efficiency(EfficiencyMetric::Hardware), month),
        }
    }

    /// `M / (S * H)`, the hours scaling relative to month 0.
    pub fn hours_factor(&self, eps: f64) -> f64 {
        self.model / (self.systems * self.hardware + eps)
    }
}

/// Volume of a workload at a month.
pub fn workload_volume(spec: &WorkloadSpec, cache: &CompoundingCache, month: u32) -> f64 {
    spec.base_volume * cache.multiplier(&RateKey::demand(&spec.growth_series), month)
}

/// Accelerator-hours needed to serve `volume` at a month.
pub fn accelerator_hours(
    spec: &WorkloadSpec,
    volume: f64,
    efficiency: &Efficiency,
    cache: &CompoundingCache,
    month: u32,
    eps: f64,
) -> f64 {
    let intensity = spec
        .intensity_series
        .as_deref()
        .map(|s| cache.multiplier(&RateKey::intensity(s), month))
        .unwrap_or(1.0);
    volume * spec.hours_per_unit * intensity * efficiency.hours_factor(eps)
}

/// Installed units needed to deliver `hours` in a month.
pub fn required_units(hours: f64, hours_per_month: f64, target_utilization: f64, eps: f64) -> f64 {
    hours / (hours_per_month * target_utilization + eps)
}

/// Demand of a derived node from its parents' drivers.
pub fn derived_demand(input_intensity: f64, parents: &[usize], drivers: &[f64]) -> f64 {
    input_intensity * parents.iter().filter_map(|&p| drivers.get(p)).sum::<f64>()
}

/// Translated workload at one month, indexed like the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadSnapshot {
    /// Volume per workload node (0 for other nodes).
    pub volumes: Vec<f64>,
    /// Uncalibrated required installed units per workload node.
    pub required: Vec<f64>,
    /// Sum of `required`.
    pub required_total: f64,
}

/// Translates workload drivers for a catalog.
#[derive(Debug)]
pub struct DemandTranslator<'a> {
    catalog: &'a Catalog,
    config: &'a SimConfig,
    workloads: Vec<usize>,
}

impl<'a> DemandTranslator<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a SimConfig) -> Self {
        Self {
            catalog,
            config,
            workloads: catalog.indices_of_kind(NodeKind::WorkloadDriver),
        }
    }

    pub fn snapshot(&self, cache: &CompoundingCache, month: u32) -> WorkloadSnapshot {
        let n = self.catalog.len();
        let eps = self.config.epsilon;
        let efficiency = Efficiency::at(cache, month);
        let mut volumes = vec![0.0; n];
        let mut required = vec![0.0; n];
        for &i in &self.workloads {
            let Some(spec) = self.catalog.nodes[i].workload.as_ref() else {
                continue;
            };
            let volume = workload_volume(spec, cache, month);
            let hours = accelerator_hours(spec, volume, &efficiency, cache, month, eps);
            volumes[i] = volume;
            required[i] = required_units(
                hours,
                self.config.hours_per_month,
                self.config.target_utilization,
                eps,
            );
        }
        let required_total = required.iter().sum();
        WorkloadSnapshot {
            volumes,
            required,
            required_total,
        }
    }

    /// Multiplier `k` mapping month-0 requirement onto the calibration target.
    ///
    /// `None` when no target is configured or the month-0 requirement of the
    /// primary node is zero.
    pub fn calibration_factor(&self, cache: &CompoundingCache, primary_share: f64) -> Option<f64> {
        let target = self.config.calibration_installed_base?;
        let raw = self.snapshot(cache, 0).required_total * primary_share;
        if raw > self.config.epsilon && target.is_finite() {
            Some(target / raw)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{AssumptionSet, BlockSchedule, Node};

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Node::new("wl", "Chat", "tokens", "workload", NodeKind::WorkloadDriver).workload(
                WorkloadSpec {
                    base_volume: 1_000.0,
                    hours_per_unit: 0.73,
                    growth_series: "chat".into(),
                    intensity_series: Some("inference".into()),
                },
            ),
            Node::new("gpu", "GPU", "units", "compute", NodeKind::ComputeStock)
                .service_life(60.0)
                .share(0.5),
        ])
    }

    fn cache(rates: &[(RateKey, f64)]) -> CompoundingCache {
        let mut set = AssumptionSet::empty(BlockSchedule::standard(240));
        for (k, r) in rates {
            set.set_series(k.clone(), vec![*r]);
        }
        CompoundingCache::build(&set, 240, None)
    }

    #[test]
    fn hours_scale_with_volume_intensity_and_efficiency() {
        let cfg = SimConfig {
            target_utilization: 1.0,
            epsilon: 0.0,
            ..SimConfig::default()
        };
        let cat = catalog();
        let c = cache(&[
            (RateKey::demand("chat"), 1.0),
            (RateKey::intensity("inference"), 1.0),
            (RateKey::efficiency(EfficiencyMetric::Hardware), 3.0),
        ]);
        let t = DemandTranslator::new(&cat, &cfg);
        let s0 = t.snapshot(&c, 0);
        assert_eq!(s0.volumes[0], 1_000.0);
        // 1000 * 0.73 hours over 730 hours per unit-month
        assert!((s0.required_total - 1.0).abs() < 1e-12);
        let s12 = t.snapshot(&c, 12);
        assert!((s12.volumes[0] - 2_000.0).abs() < 1e-6);
        // volume x2, intensity x2, hardware x4
        assert!((s12.required_total - 1.0).abs() < 1e-9);
        assert_eq!(s12.volumes[1], 0.0);
    }

    #[test]
    fn calibration_maps_month_zero_to_target() {
        let cfg = SimConfig {
            calibration_installed_base: Some(500.0),
            ..SimConfig::default()
        };
        let cat = catalog();
        let c = cache(&[]);
        let t = DemandTranslator::new(&cat, &cfg);
        let k = t.calibration_factor(&c, 0.5).unwrap();
        let raw = t.snapshot(&c, 0).required_total;
        assert!((k * raw * 0.5 - 500.0).abs() < 1e-6);
        assert_eq!(t.calibration_factor(&c, 0.0), None);
        let uncalibrated = SimConfig::default();
        assert_eq!(DemandTranslator::new(&cat, &uncalibrated).calibration_factor(&c, 0.5), None);
    }

    #[test]
    fn derived_demand_sums_parents() {
        let drivers = [10.0, 20.0, 30.0];
        assert_eq!(derived_demand(2.0, &[0, 2], &drivers), 80.0);
        assert_eq!(derived_demand(2.0, &[7], &drivers), 0.0);
    }
}
