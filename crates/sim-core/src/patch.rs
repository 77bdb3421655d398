//! Override documents as explicit patches.
//!
//! A patch is either `Set(path, value)` or `Merge(path, subtree)`. Both go
//! through [`apply_patches`], the single reducer:
//!
//! - objects merge key by key; keys absent from the base are ignored, except
//!   metadata keys on a `{value, ...}` record;
//! - arrays, strings and booleans replace the base leaf;
//! - a bare number aimed at a `{value, ...}` record sets its `value`;
//! - numeric leaves move at most `max_change_fraction` from their previous
//!   value (clamped, logged and reported);
//! - any other shape mismatch leaves the base untouched and is reported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A single override operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    Set { path: Vec<String>, value: Value },
    Merge { path: Vec<String>, subtree: Value },
}

impl Patch {
    /// A whole deep-merge override document, merged at the root.
    pub fn document(doc: Value) -> Self {
        Patch::Merge {
            path: vec![],
            subtree: doc,
        }
    }

    /// `Set` from a dotted path, e.g. `"demand.chat.year1"`.
    pub fn set(dotted: &str, value: Value) -> Self {
        Patch::Set {
            path: split_path(dotted),
            value,
        }
    }

    /// `Merge` from a dotted path.
    pub fn merge(dotted: &str, subtree: Value) -> Self {
        Patch::Merge {
            path: split_path(dotted),
            subtree,
        }
    }
}

fn split_path(dotted: &str) -> Vec<String> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bound on how far a numeric leaf may move in one pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundPolicy {
    /// Maximum relative change, e.g. 0.25 for ±25%. Unbounded when absent.
    pub max_change_fraction: Option<f64>,
}

impl BoundPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Non-finite fractions leave the policy unbounded.
    pub fn max_change(fraction: f64) -> Self {
        Self {
            max_change_fraction: fraction.is_finite().then(|| fraction.abs()),
        }
    }

    /// Clamp `requested` around `previous`. Zero previous values are not bounded.
    pub fn bound(&self, previous: f64, requested: f64) -> f64 {
        match self.max_change_fraction {
            Some(f) if f.is_finite() && previous != 0.0 && previous.is_finite() => {
                let span = previous.abs() * f.abs();
                requested.max(previous - span).min(previous + span)
            }
            _ => requested,
        }
    }
}

/// A numeric leaf that was clamped by the bound policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClampRecord {
    pub path: String,
    pub previous: f64,
    pub requested: f64,
    pub applied: f64,
}

/// A leaf that was ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub path: String,
    pub reason: String,
}

/// Outcome of applying patches.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchReport {
    pub applied: usize,
    pub clamped: Vec<ClampRecord>,
    pub rejected: Vec<Rejection>,
}

impl PatchReport {
    pub fn is_clean(&self) -> bool {
        self.clamped.is_empty() && self.rejected.is_empty()
    }

    /// Fold another report into this one.
    pub fn extend(&mut self, other: PatchReport) {
        self.applied += other.applied;
        self.clamped.extend(other.clamped);
        self.rejected.extend(other.rejected);
    }

    fn reject(&mut self, path: &[String], reason: &str) {
        let path = join(path);
        warn!(%path, reason, "override leaf ignored");
        self.rejected.push(Rejection {
            path,
            reason: reason.to_string(),
        });
    }
}

fn join(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    /// An object carrying a numeric `value` plus metadata.
    Record,
}

fn shape(v: &Value) -> Shape {
    match v {
        Value::Null => Shape::Null,
        Value::Bool(_) => Shape::Bool,
        Value::Number(_) => Shape::Number,
        Value::String(_) => Shape::String,
        Value::Array(_) => Shape::Array,
        Value::Object(m) => {
            if m.get("value").map_or(false, Value::is_number) {
                Shape::Record
            } else {
                Shape::Object
            }
        }
    }
}

/// Apply patches in order to a copy of `base`.
pub fn apply_patches(base: &Value, patches: &[Patch], policy: &BoundPolicy) -> (Value, PatchReport) {
    let mut out = base.clone();
    let mut report = PatchReport::default();
    for patch in patches {
        let (path, incoming, merge) = match patch {
            Patch::Set { path, value } => (path, value, false),
            Patch::Merge { path, subtree } => (path, subtree, true),
        };
        let mut cursor = path.clone();
        match lookup_mut(&mut out, path) {
            Some(target) if merge && incoming.is_object() => {
                merge_object(target, incoming, &mut cursor, policy, &mut report)
            }
            Some(target) => replace_leaf(target, incoming, &mut cursor, policy, &mut report),
            None => report.reject(path, "path not present in base"),
        }
    }
    (out, report)
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path {
        cur = match cur {
            Value::Object(m) => m.get_mut(seg)?,
            Value::Array(a) => a.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn merge_object(
    target: &mut Value,
    incoming: &Value,
    path: &mut Vec<String>,
    policy: &BoundPolicy,
    report: &mut PatchReport,
) {
    let Some(entries) = incoming.as_object() else {
        report.reject(path, "expected an object");
        return;
    };
    let is_record = shape(target) == Shape::Record;
    let Some(base) = target.as_object_mut() else {
        report.reject(path, "base is not an object");
        return;
    };
    for (key, value) in entries {
        path.push(key.clone());
        match base.get_mut(key) {
            Some(child) => replace_leaf(child, value, path, policy, report),
            None if is_record && !value.is_null() => {
                base.insert(key.clone(), value.clone());
                report.applied += 1;
            }
            None => report.reject(path, "key not present in base"),
        }
        path.pop();
    }
}

fn replace_leaf(
    target: &mut Value,
    incoming: &Value,
    path: &mut Vec<String>,
    policy: &BoundPolicy,
    report: &mut PatchReport,
) {
    match (shape(target), shape(incoming)) {
        (_, Shape::Null) => report.reject(path, "null override"),
        (Shape::Number, Shape::Number) => set_number(target, incoming, path, policy, report),
        (Shape::Record, Shape::Number) => {
            if let Some(inner) = target.get_mut("value") {
                path.push("value".to_string());
                set_number(inner, incoming, path, policy, report);
                path.pop();
            }
        }
        (Shape::Number, Shape::Record) => {
            let mut record: Map<String, Value> = incoming.as_object().cloned().unwrap_or_default();
            let mut value = target.clone();
            path.push("value".to_string());
            if let Some(requested) = record.get("value") {
                set_number(&mut value, requested, path, policy, report);
            }
            path.pop();
            record.insert("value".to_string(), value);
            *target = Value::Object(record);
        }
        (Shape::Record | Shape::Object, Shape::Record | Shape::Object) => {
            merge_object(target, incoming, path, policy, report)
        }
        (Shape::Array, Shape::Array) | (Shape::String, Shape::String) | (Shape::Bool, Shape::Bool) => {
            *target = incoming.clone();
            report.applied += 1;
        }
        _ => report.reject(path, "shape does not match base"),
    }
}

fn set_number(
    target: &mut Value,
    incoming: &Value,
    path: &[String],
    policy: &BoundPolicy,
    report: &mut PatchReport,
) {
    let (Some(previous), Some(requested)) = (target.as_f64(), incoming.as_f64()) else {
        report.reject(path, "not a finite number");
        return;
    };
    if !requested.is_finite() {
        report.reject(path, "not a finite number");
        return;
    }
    let applied = policy.bound(previous, requested);
    if applied != requested {
        let p = join(path);
        warn!(path = %p, previous, requested, applied, "override clamped to bound");
        report.clamped.push(ClampRecord {
            path: p,
            previous,
            requested,
            applied,
        });
    }
    // Integers stay integers so typed documents still deserialize.
    *target = match (target.is_u64(), applied.fract() == 0.0 && applied >= 0.0) {
        (true, true) if applied <= u64::MAX as f64 => Value::from(applied as u64),
        _ => Value::from(applied),
    };
    report.applied += 1;
}
