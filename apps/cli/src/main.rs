#![deny(warnings)]

//! Headless forecaster: runs scenario packs over the baseline and prints the
//! ranked shortage, glut and bottleneck summary.

use anyhow::{bail, Context, Result};
use scenario_kit::{BaseInputs, ScenarioLibrary};
use sim_core::BoundPolicy;
use sim_runtime::SimulationResult;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
struct Args {
    /// Scenario ids, or empty for every pack.
    scenarios: Vec<String>,
    years: Option<u32>,
    assets: PathBuf,
    out: Option<PathBuf>,
    format: String,
    top: Option<usize>,
    max_change: Option<f64>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            scenarios: vec!["base".to_string()],
            years: None,
            assets: PathBuf::from("assets/scenarios"),
            out: None,
            format: "json".to_string(),
            top: None,
            max_change: Some(0.5),
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut out = Args::default();
    let mut it = args;
    while let Some(arg) = it.next() {
        let mut value = || it.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--scenario" => {
                let v = value()?;
                out.scenarios = if v == "all" {
                    vec![]
                } else {
                    v.split(',').map(str::to_string).collect()
                };
            }
            "--years" => out.years = Some(value()?.parse().context("--years")?),
            "--assets" => out.assets = PathBuf::from(value()?),
            "--out" => out.out = Some(PathBuf::from(value()?)),
            "--format" => out.format = value()?,
            "--top" => out.top = Some(value()?.parse().context("--top")?),
            "--max-change" => {
                let v = value()?;
                out.max_change = if v == "none" {
                    None
                } else {
                    let f: f64 = v.parse().context("--max-change")?;
                    if !f.is_finite() {
                        bail!("--max-change must be finite or none");
                    }
                    Some(f)
                };
            }
            other => bail!("unknown argument {other}"),
        }
    }
    if !matches!(out.format.as_str(), "json" | "bin") {
        bail!("--format must be json or bin");
    }
    Ok(out)
}

fn print_summary(r: &SimulationResult) {
    println!(
        "Scenario {} | months: {} | calibration k: {:.4e} | warnings: {}",
        r.scenario_id,
        r.horizon_months,
        r.calibration_factor,
        r.warnings.len()
    );
    let date = |m: u32| {
        r.months
            .get(m as usize)
            .map(|d| d.to_string())
            .unwrap_or_default()
    };
    println!("  Shortages");
    for e in &r.summary.shortages {
        println!(
            "    {:<24} from {} for {:>3} months | peak {:.2} | severity {:.1}",
            e.node_id,
            date(e.start_month),
            e.duration_months,
            e.peak_tightness,
            e.severity
        );
    }
    println!("  Gluts");
    for e in &r.summary.gluts {
        println!(
            "    {:<24} from {} for {:>3} months | trough {:.2} | {:?} | severity {:.1}",
            e.node_id,
            date(e.start_month),
            e.duration_months,
            e.trough_tightness,
            e.class,
            e.severity
        );
    }
    println!("  Bottlenecks");
    for b in &r.summary.bottlenecks {
        println!(
            "    {:<24} score {:>8.1} | avg tightness {:.2} | shortage months {} | children {}",
            b.node_id, b.score, b.avg_tightness, b.shortage_months, b.downstream_children
        );
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(
        ?args,
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting forecaster"
    );

    let mut library = ScenarioLibrary::new(&args.assets);
    library
        .load_all()
        .with_context(|| format!("load scenario packs from {}", args.assets.display()))?;
    let ids: Vec<String> = if args.scenarios.is_empty() {
        library.ids().map(str::to_string).collect()
    } else {
        args.scenarios.clone()
    };

    let mut base = BaseInputs::baseline();
    if let Some(years) = args.years {
        base.config = base.config.with_years(years);
    }
    if let Some(top) = args.top {
        base.config.analysis.top_n = top;
    }
    let policy = match args.max_change {
        Some(f) => BoundPolicy::max_change(f),
        None => BoundPolicy::unbounded(),
    };

    for id in &ids {
        let prepared = library.require(id)?.prepare(&base, &policy)?;
        for c in &prepared.report.clamped {
            println!(
                "override clamped: {} {} -> {} (requested {})",
                c.path, c.previous, c.applied, c.requested
            );
        }
        for r in &prepared.report.rejected {
            println!("override rejected: {} ({})", r.path, r.reason);
        }
        let result = sim_runtime::run_scenario(
            &prepared.catalog,
            &prepared.assumptions,
            &prepared.scenario,
            &prepared.config,
        );
        print_summary(&result);
        if let Some(dir) = &args.out {
            let path = dir.join(format!("{}.{}", result.scenario_id, args.format));
            let fingerprint = persistence::save(&path, &result)?;
            println!("  saved {} (fingerprint {:016x})", path.display(), fingerprint);
        }
    }

    Ok(())
}
