//! Time-segmented assumption tables.
//!
//! Documents arrive in a loose shape where each value is either a bare number
//! or a `{value, confidence, source}` record. They are resolved once into an
//! [`AssumptionSet`]: canonical `f64` rates per block plus a provenance
//! side-table that never feeds the numbers.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::warn;

/// Assumption categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Workload volume growth.
    Demand,
    /// Model, systems and hardware efficiency improvement.
    Efficiency,
    /// Compute intensity growth per unit of work.
    Intensity,
    /// Organic supply growth per node.
    Supply,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Demand => "demand",
            Category::Efficiency => "efficiency",
            Category::Intensity => "intensity",
            Category::Supply => "supply",
        }
    }
}

/// The three efficiency metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EfficiencyMetric {
    /// Compute per unit of work; falls over time.
    Model,
    /// System-level throughput; rises over time.
    Systems,
    /// Hardware throughput; rises over time.
    Hardware,
}

impl EfficiencyMetric {
    pub const ALL: [EfficiencyMetric; 3] = [
        EfficiencyMetric::Model,
        EfficiencyMetric::Systems,
        EfficiencyMetric::Hardware,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EfficiencyMetric::Model => "model",
            EfficiencyMetric::Systems => "systems",
            EfficiencyMetric::Hardware => "hardware",
        }
    }
}

/// Whether a compounded series rises or falls for positive rates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Grow,
    Decline,
}

/// Identifies one rate series.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RateKey {
    pub category: Category,
    pub series: String,
}

impl RateKey {
    pub fn new(category: Category, series: impl Into<String>) -> Self {
        Self {
            category,
            series: series.into(),
        }
    }

    pub fn demand(series: &str) -> Self {
        Self::new(Category::Demand, series)
    }

    pub fn efficiency(metric: EfficiencyMetric) -> Self {
        Self::new(Category::Efficiency, metric.as_str())
    }

    pub fn intensity(series: &str) -> Self {
        Self::new(Category::Intensity, series)
    }

    pub fn supply(node: &str) -> Self {
        Self::new(Category::Supply, node)
    }

    /// Model efficiency declines; every other series grows.
    pub fn direction(&self) -> Direction {
        if self.category == Category::Efficiency && self.series == EfficiencyMetric::Model.as_str()
        {
            Direction::Decline
        } else {
            Direction::Grow
        }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category.as_str(), self.series)
    }
}

/// A named month range `[start_month, end_month)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    pub id: String,
    pub start_month: u32,
    pub end_month: u32,
}

/// Partition of the horizon into assumption blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSchedule {
    pub spans: Vec<BlockSpan>,
}

impl BlockSchedule {
    /// Yearly blocks for years 1–5, then 5-year blocks through year 20.
    ///
    /// The last block stretches to cover horizons longer than 20 years.
    pub fn standard(horizon_months: u32) -> Self {
        let mut spans: Vec<BlockSpan> = (0..5)
            .map(|y| BlockSpan {
                id: format!("year{}", y + 1),
                start_month: y * 12,
                end_month: (y + 1) * 12,
            })
            .collect();
        for (first_year, last_year) in [(6u32, 10u32), (11, 15), (16, 20)] {
            spans.push(BlockSpan {
                id: format!("years{}_{}", first_year, last_year),
                start_month: (first_year - 1) * 12,
                end_month: last_year * 12,
            });
        }
        if let Some(last) = spans.last_mut() {
            last.end_month = last.end_month.max(horizon_months);
        }
        Self { spans }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.spans.iter().map(|s| s.id.as_str())
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.spans.iter().position(|s| s.id == id)
    }

    /// Block index for a month. Months past the last span resolve to it.
    pub fn resolve(&self, month: u32) -> usize {
        self.spans
            .iter()
            .position(|s| month < s.end_month)
            .unwrap_or_else(|| self.spans.len().saturating_sub(1))
    }

    /// Check that spans start at 0, are contiguous and cover the horizon.
    pub fn validate(&self, horizon_months: u32) -> Result<(), ValidationError> {
        let mut expected_start = 0u32;
        for span in &self.spans {
            if span.start_month > expected_start {
                return Err(ValidationError::BlockGap(expected_start));
            }
            if span.start_month < expected_start || span.end_month <= span.start_month {
                return Err(ValidationError::BlockOverlap(span.id.clone()));
            }
            expected_start = span.end_month;
        }
        if expected_start < horizon_months {
            return Err(ValidationError::BlockGap(expected_start));
        }
        Ok(())
    }
}

/// Confidence tier attached to an assumption value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Speculative,
}

/// Value with provenance metadata as found in documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailedValue {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Either a bare number or a detailed record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Detailed(DetailedValue),
}

impl RawValue {
    pub fn value(&self) -> f64 {
        match self {
            RawValue::Number(v) => *v,
            RawValue::Detailed(d) => d.value,
        }
    }
}

/// Block id → value.
pub type RawTable = BTreeMap<String, RawValue>;

/// Assumption document as authored (and as patched by override documents).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssumptionDoc {
    #[serde(default)]
    pub demand: BTreeMap<String, RawTable>,
    #[serde(default)]
    pub efficiency: BTreeMap<String, RawTable>,
    #[serde(default)]
    pub intensity: BTreeMap<String, RawTable>,
    #[serde(default)]
    pub supply: BTreeMap<String, RawTable>,
}

impl AssumptionDoc {
    fn tables(&self) -> [(Category, &BTreeMap<String, RawTable>); 4] {
        [
            (Category::Demand, &self.demand),
            (Category::Efficiency, &self.efficiency),
            (Category::Intensity, &self.intensity),
            (Category::Supply, &self.supply),
        ]
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedDocument(e.to_string()))
    }
}

/// Provenance of one resolved value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub key: String,
    pub block: String,
    pub confidence: Option<Confidence>,
    pub source: Option<String>,
}

/// Canonical assumption set: one annual rate per block per series.
#[derive(Clone, Debug, PartialEq)]
pub struct AssumptionSet {
    blocks: BlockSchedule,
    rates: BTreeMap<RateKey, Vec<f64>>,
    provenance: Vec<Provenance>,
}

impl AssumptionSet {
    /// An empty set: every series compounds at 0%.
    pub fn empty(blocks: BlockSchedule) -> Self {
        Self {
            blocks,
            rates: BTreeMap::new(),
            provenance: vec![],
        }
    }

    /// Resolve a document against a block schedule.
    ///
    /// Unknown block ids are ignored and non-finite values are dropped; a
    /// block missing from a table inherits the previous block's rate (0 for
    /// the first block).
    pub fn from_doc(doc: &AssumptionDoc, blocks: BlockSchedule) -> Self {
        let mut set = Self::empty(blocks);
        for (category, tables) in doc.tables() {
            for (series, table) in tables {
                let key = RateKey::new(category, series.clone());
                let mut slots: Vec<Option<f64>> = vec![None; set.blocks.len()];
                for (block_id, raw) in table {
                    let Some(idx) = set.blocks.index_of(block_id) else {
                        warn!(%key, block = %block_id, "ignoring rate for unknown block");
                        continue;
                    };
                    let v = raw.value();
                    if !v.is_finite() {
                        warn!(%key, block = %block_id, "ignoring non-finite rate");
                        continue;
                    }
                    slots[idx] = Some(v);
                    if let RawValue::Detailed(d) = raw {
                        set.provenance.push(Provenance {
                            key: key.to_string(),
                            block: block_id.clone(),
                            confidence: d.confidence,
                            source: d.source.clone(),
                        });
                    }
                }
                let mut carried = 0.0;
                let resolved = slots
                    .into_iter()
                    .map(|slot| {
                        if let Some(v) = slot {
                            carried = v;
                        }
                        carried
                    })
                    .collect();
                set.rates.insert(key, resolved);
            }
        }
        set
    }

    pub fn blocks(&self) -> &BlockSchedule {
        &self.blocks
    }

    pub fn keys(&self) -> impl Iterator<Item = &RateKey> {
        self.rates.keys()
    }

    pub fn series(&self, key: &RateKey) -> Option<&[f64]> {
        self.rates.get(key).map(Vec::as_slice)
    }

    /// Annual rate for a series in a block; absent series are 0.
    pub fn rate(&self, key: &RateKey, block: usize) -> f64 {
        self.rates
            .get(key)
            .and_then(|v| v.get(block))
            .copied()
            .unwrap_or(0.0)
    }

    /// Annual rate in force at a month.
    pub fn rate_at(&self, key: &RateKey, month: u32) -> f64 {
        self.rate(key, self.blocks.resolve(month))
    }

    /// Replace the rates of one series.
    pub fn set_series(&mut self, key: RateKey, mut rates: Vec<f64>) {
        let fill = rates.last().copied().unwrap_or(0.0);
        rates.resize(self.blocks.len(), fill);
        self.rates.insert(key, rates);
    }

    /// Add `delta` to the annual rate of a series, in the named blocks or all of them.
    pub fn adjust(&mut self, key: &RateKey, blocks: Option<&[String]>, delta: f64) {
        let n = self.blocks.len();
        let selected: Vec<usize> = match blocks {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    let idx = self.blocks.index_of(id);
                    if idx.is_none() {
                        warn!(%key, block = %id, "adjustment names unknown block");
                    }
                    idx
                })
                .collect(),
            None => (0..n).collect(),
        };
        let series = self.rates.entry(key.clone()).or_insert_with(|| vec![0.0; n]);
        for idx in selected {
            series[idx] += delta;
        }
    }

    pub fn provenance(&self) -> &[Provenance] {
        &self.provenance
    }

    /// Content fingerprint of the numeric content (provenance excluded).
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        for span in &self.blocks.spans {
            span.id.hash(&mut h);
            span.start_month.hash(&mut h);
            span.end_month.hash(&mut h);
        }
        for (key, rates) in &self.rates {
            key.hash(&mut h);
            for r in rates {
                r.to_bits().hash(&mut h);
            }
        }
        h.finish()
    }
}
