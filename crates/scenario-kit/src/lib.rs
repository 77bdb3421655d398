#![deny(warnings)]

//! Scenario packs on disk and the preparation of run inputs from them.
//!
//! A pack is a directory holding `scenario.yaml` and, optionally,
//! `assumptions.yaml` and `catalog.yaml` override documents:
//!
//! ```text
//! assets/scenarios/
//!   hbm_shock/
//!     scenario.yaml     id, name, description, adjustments, shocks, config
//!     catalog.yaml      per-node overrides keyed by node id
//!     assumptions.yaml  deep-merge override of the assumption document
//! ```

use serde::Deserialize;
use serde_json::Value;
use sim_core::{
    apply_patches, validate_catalog, validate_config, AssumptionDoc, AssumptionSet, BlockSchedule,
    BoundPolicy, Catalog, Patch, PatchReport, Scenario, SimConfig, ValidationError,
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const SCENARIO_FILE: &str = "scenario.yaml";
pub const ASSUMPTIONS_FILE: &str = "assumptions.yaml";
pub const CATALOG_FILE: &str = "catalog.yaml";

#[derive(Debug, Error)]
pub enum KitError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },
    #[error("duplicate scenario id: {0}")]
    DuplicateId(String),
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("invalid inputs: {0}")]
    Invalid(#[from] ValidationError),
}

impl From<std::io::Error> for KitError {
    fn from(e: std::io::Error) -> Self {
        KitError::Io(e.to_string())
    }
}

/// `scenario.yaml` as authored.
#[derive(Debug, Clone, Deserialize)]
struct ScenarioFile {
    #[serde(flatten)]
    scenario: Scenario,
    /// Partial run configuration overlaid on the base config.
    #[serde(default)]
    config: Option<serde_yaml::Value>,
}

/// A loaded scenario pack.
#[derive(Debug, Clone)]
pub struct ScenarioPack {
    pub dir: PathBuf,
    pub scenario: Scenario,
    pub config_overrides: Option<Value>,
    pub assumption_overrides: Option<Value>,
    pub catalog_overrides: Option<Value>,
}

/// Inputs a pack is applied to.
#[derive(Debug, Clone)]
pub struct BaseInputs {
    pub catalog: Catalog,
    pub assumptions: AssumptionDoc,
    pub config: SimConfig,
}

impl BaseInputs {
    pub fn baseline() -> Self {
        Self {
            catalog: sim_core::baseline::catalog(),
            assumptions: sim_core::baseline::assumption_doc(),
            config: sim_core::baseline::config(),
        }
    }
}

/// Validated inputs for one run, plus what the override documents did.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub scenario: Scenario,
    pub catalog: Catalog,
    pub assumptions: AssumptionSet,
    pub config: SimConfig,
    pub report: PatchReport,
}

fn yaml_to_json(path: &Path, v: serde_yaml::Value) -> Result<Value, KitError> {
    serde_json::to_value(v).map_err(|e| invalid(path, e))
}

fn invalid(path: &Path, reason: impl ToString) -> KitError {
    KitError::InvalidDocument {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn read_optional(path: &Path) -> Result<Option<Value>, KitError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| invalid(path, e))?;
    if yaml.is_null() {
        return Ok(None);
    }
    yaml_to_json(path, yaml).map(Some)
}

/// Objects merge key by key; anything else replaces the base value.
fn overlay(base: &mut Value, top: &Value) {
    match (base, top) {
        (Value::Object(b), Value::Object(t)) => {
            for (k, v) in t {
                match b.get_mut(k) {
                    Some(slot) => overlay(slot, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

impl ScenarioPack {
    /// Load one pack directory.
    pub fn load(dir: &Path) -> Result<Self, KitError> {
        let path = dir.join(SCENARIO_FILE);
        let text = fs::read_to_string(&path)?;
        let file: ScenarioFile = serde_yaml::from_str(&text).map_err(|e| invalid(&path, e))?;
        if file.scenario.id.trim().is_empty() {
            return Err(invalid(&path, "scenario id is empty"));
        }
        let config_overrides = match file.config {
            Some(v) if !v.is_null() => Some(yaml_to_json(&path, v)?),
            _ => None,
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            scenario: file.scenario,
            config_overrides,
            assumption_overrides: read_optional(&dir.join(ASSUMPTIONS_FILE))?,
            catalog_overrides: read_optional(&dir.join(CATALOG_FILE))?,
        })
    }

    /// Apply the pack to base inputs and validate the result.
    ///
    /// Numeric overrides of assumptions and catalog are bounded by `policy`;
    /// clamps and rejected leaves are returned in the report.
    pub fn prepare(&self, base: &BaseInputs, policy: &BoundPolicy) -> Result<PreparedRun, KitError> {
        let config = match &self.config_overrides {
            Some(doc) => {
                let mut v = serde_json::to_value(&base.config).map_err(|e| invalid(&self.dir, e))?;
                overlay(&mut v, doc);
                serde_json::from_value(v).map_err(|e| invalid(&self.dir.join(SCENARIO_FILE), e))?
            }
            None => base.config.clone(),
        };
        validate_config(&config)?;

        let mut report = PatchReport::default();
        let doc = match &self.assumption_overrides {
            Some(o) => {
                let (merged, r) = apply_patches(
                    &base.assumptions.to_value(),
                    &[Patch::document(o.clone())],
                    policy,
                );
                report.extend(r);
                AssumptionDoc::from_value(merged)?
            }
            None => base.assumptions.clone(),
        };
        let blocks = BlockSchedule::standard(config.horizon_months);
        blocks.validate(config.horizon_months)?;
        let assumptions = AssumptionSet::from_doc(&doc, blocks);

        let catalog = match &self.catalog_overrides {
            Some(o) => {
                let (c, r) = base.catalog.with_overrides(o, policy);
                report.extend(r);
                c
            }
            None => base.catalog.clone(),
        };
        validate_catalog(&catalog, &config)?;

        if !report.is_clean() {
            warn!(
                scenario = %self.scenario.id,
                clamped = report.clamped.len(),
                rejected = report.rejected.len(),
                "overrides were adjusted"
            );
        }
        Ok(PreparedRun {
            scenario: self.scenario.clone(),
            catalog,
            assumptions,
            config,
            report,
        })
    }
}

/// Scenario packs found under a root directory, ordered by id.
#[derive(Debug, Clone)]
pub struct ScenarioLibrary {
    root: PathBuf,
    packs: Vec<ScenarioPack>,
}

impl ScenarioLibrary {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            packs: vec![],
        }
    }

    /// Load every subdirectory containing a `scenario.yaml`.
    pub fn load_all(&mut self) -> Result<(), KitError> {
        self.packs.clear();
        for ent in fs::read_dir(&self.root)? {
            let ent = ent?;
            if !ent.file_type()?.is_dir() || !ent.path().join(SCENARIO_FILE).exists() {
                continue;
            }
            let pack = ScenarioPack::load(&ent.path())?;
            if self.get(&pack.scenario.id).is_some() {
                return Err(KitError::DuplicateId(pack.scenario.id));
            }
            self.packs.push(pack);
        }
        self.packs.sort_by(|a, b| a.scenario.id.cmp(&b.scenario.id));
        info!(root = %self.root.display(), packs = self.packs.len(), "scenario packs loaded");
        Ok(())
    }

    pub fn packs(&self) -> &[ScenarioPack] {
        &self.packs
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.packs.iter().map(|p| p.scenario.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioPack> {
        self.packs.iter().find(|p| p.scenario.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&ScenarioPack, KitError> {
        self.get(id)
            .ok_or_else(|| KitError::UnknownScenario(id.to_string()))
    }
}
