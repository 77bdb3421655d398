#![deny(warnings)]

//! Simulation runtime: compounding caches, capacity, demand translation,
//! expansion triggers, the monthly engine and the post-run analyzer.

pub mod analyzer;
pub mod cache;
pub mod capacity;
pub mod engine;
pub mod result;
pub mod state;
pub mod translation;
pub mod triggers;

pub use cache::CompoundingCache;
pub use capacity::{CapacityModel, DynamicExpansion};
pub use engine::Engine;
pub use result::{
    Bottleneck, GlutClass, GlutEvent, NodeSeries, RunWarning, ShortageEvent, SimulationResult,
    Summary, WarningKind,
};

use sim_core::{AssumptionSet, Catalog, Scenario, SimConfig};

/// Run one scenario over the configured horizon.
pub fn run_scenario(
    catalog: &Catalog,
    assumptions: &AssumptionSet,
    scenario: &Scenario,
    config: &SimConfig,
) -> SimulationResult {
    Engine::new(catalog.clone(), assumptions, scenario, config.clone()).run()
}

/// Run scenarios one after another, each on its own engine.
pub fn run_scenarios(
    catalog: &Catalog,
    assumptions: &AssumptionSet,
    scenarios: &[Scenario],
    config: &SimConfig,
) -> Vec<SimulationResult> {
    scenarios
        .iter()
        .map(|s| run_scenario(catalog, assumptions, s, config))
        .collect()
}

/// Baseline catalog and assumptions over `years`.
pub fn run_baseline(years: u32) -> SimulationResult {
    let config = sim_core::baseline::config().with_years(years);
    let assumptions = sim_core::baseline::assumptions(config.horizon_months);
    run_scenario(
        &sim_core::baseline::catalog(),
        &assumptions,
        &Scenario::baseline(),
        &config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_run_independently() {
        let config = sim_core::baseline::config().with_years(2);
        let assumptions = sim_core::baseline::assumptions(config.horizon_months);
        let catalog = sim_core::baseline::catalog();
        let mut fast = Scenario::baseline();
        fast.id = "fast".into();
        let results = run_scenarios(&catalog, &assumptions, &[Scenario::baseline(), fast], &config);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].scenario_id, "fast");
        assert_eq!(results[0].nodes, results[1].nodes);
    }
}
