//! Post-run detection of shortages, gluts and bottlenecks.

use crate::result::{
    Bottleneck, GlutClass, GlutEvent, ShortageEvent, SimulationResult, Summary,
};
use sim_core::{AnalysisParams, Catalog, NodeId, NodeKind};
use std::cmp::Ordering;
use tracing::info;

/// A maximal run of consecutive months satisfying a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub len: usize,
}

/// Runs of at least `min_len` months. A run still open at the end is closed there.
pub fn runs(series: &[f64], pred: impl Fn(f64) -> bool, min_len: usize) -> Vec<Run> {
    let min_len = min_len.max(1);
    let mut out = vec![];
    let mut open: Option<usize> = None;
    for (m, &v) in series.iter().enumerate() {
        match (pred(v), open) {
            (true, None) => open = Some(m),
            (false, Some(start)) => {
                if m - start >= min_len {
                    out.push(Run { start, len: m - start });
                }
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        if series.len() - start >= min_len {
            out.push(Run {
                start,
                len: series.len() - start,
            });
        }
    }
    out
}

/// `flags[m] = 1` iff the `persistence` months ending at `m` all satisfy `pred`.
pub fn persistence_flags(series: &[f64], pred: impl Fn(f64) -> bool, persistence: usize) -> Vec<u8> {
    let persistence = persistence.max(1);
    let mut streak = 0usize;
    series
        .iter()
        .map(|&v| {
            streak = if pred(v) { streak + 1 } else { 0 };
            u8::from(streak >= persistence)
        })
        .collect()
}

pub fn shortage_events(node_id: &NodeId, tightness: &[f64], p: &AnalysisParams) -> Vec<ShortageEvent> {
    runs(tightness, |t| t > p.shortage_threshold, p.persistence_months as usize)
        .into_iter()
        .map(|r| {
            let peak = tightness[r.start..r.start + r.len]
                .iter()
                .copied()
                .fold(f64::MIN, f64::max);
            ShortageEvent {
                node_id: node_id.clone(),
                start_month: r.start as u32,
                duration_months: r.len as u32,
                peak_tightness: peak,
                severity: peak * r.len as f64,
            }
        })
        .collect()
}

/// Soft gluts below `glut_threshold` and hard gluts below `hard_glut_threshold`.
pub fn glut_events(node_id: &NodeId, tightness: &[f64], p: &AnalysisParams) -> Vec<GlutEvent> {
    let classes = [
        (GlutClass::Soft, p.glut_threshold, p.persistence_months),
        (GlutClass::Hard, p.hard_glut_threshold, p.hard_glut_persistence_months),
    ];
    let mut out = vec![];
    for (class, threshold, persistence) in classes {
        for r in runs(tightness, |t| t < threshold, persistence as usize) {
            let trough = tightness[r.start..r.start + r.len]
                .iter()
                .copied()
                .fold(f64::MAX, f64::min);
            out.push(GlutEvent {
                node_id: node_id.clone(),
                class,
                start_month: r.start as u32,
                duration_months: r.len as u32,
                trough_tightness: trough,
                severity: (1.0 - trough) * r.len as f64,
            });
        }
    }
    out
}

/// `avg * shortage_months * (1 + children * avg / 10)`.
pub fn bottleneck_score(avg_tightness: f64, shortage_months: u32, children: u32) -> f64 {
    avg_tightness * shortage_months as f64 * (1.0 + children as f64 * avg_tightness / 10.0)
}

fn by_severity(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// Fill flags and the ranked summary of a finished run.
pub fn analyze(result: &mut SimulationResult, catalog: &Catalog, p: &AnalysisParams) {
    let mut shortages = vec![];
    let mut gluts = vec![];
    let mut bottlenecks = vec![];
    for series in result.nodes.iter_mut() {
        let n = series.tightness.len();
        if series.kind == NodeKind::WorkloadDriver {
            series.shortage = vec![0; n];
            series.glut = vec![0; n];
            continue;
        }
        let t = &series.tightness;
        series.shortage = persistence_flags(t, |v| v > p.shortage_threshold, p.persistence_months as usize);
        series.glut = persistence_flags(t, |v| v < p.glut_threshold, p.persistence_months as usize);

        let node_shortages = shortage_events(&series.node_id, t, p);
        let shortage_months: u32 = node_shortages.iter().map(|e| e.duration_months).sum();
        let finite: Vec<f64> = t.iter().copied().filter(|v| v.is_finite()).collect();
        let avg = if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        let children = catalog.children_of(&series.node_id).len() as u32;
        let score = bottleneck_score(avg, shortage_months, children);
        if score > 0.0 {
            bottlenecks.push(Bottleneck {
                node_id: series.node_id.clone(),
                score,
                avg_tightness: avg,
                shortage_months,
                downstream_children: children,
            });
        }
        gluts.extend(glut_events(&series.node_id, t, p));
        shortages.extend(node_shortages);
    }

    shortages.sort_by(|a: &ShortageEvent, b| {
        by_severity(a.severity, b.severity)
            .then_with(|| a.node_id.cmp(&b.node_id))
            .then(a.start_month.cmp(&b.start_month))
    });
    gluts.sort_by(|a: &GlutEvent, b| {
        by_severity(a.severity, b.severity)
            .then_with(|| a.node_id.cmp(&b.node_id))
            .then(a.start_month.cmp(&b.start_month))
    });
    bottlenecks.sort_by(|a: &Bottleneck, b| {
        by_severity(a.score, b.score).then_with(|| a.node_id.cmp(&b.node_id))
    });
    info!(
        shortages = shortages.len(),
        gluts = gluts.len(),
        bottlenecks = bottlenecks.len(),
        "analysis complete"
    );
    shortages.truncate(p.top_n);
    gluts.truncate(p.top_n);
    bottlenecks.truncate(p.top_n);
    result.summary = Summary {
        shortages,
        gluts,
        bottlenecks,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn runs_close_at_horizon_end() {
        let s = [1.2, 1.2, 1.0, 1.2, 1.2, 1.2, 1.0, 1.2, 1.2, 1.2];
        let r = runs(&s, |t| t > 1.05, 3);
        assert_eq!(r, vec![Run { start: 3, len: 3 }, Run { start: 7, len: 3 }]);
    }

    #[test]
    fn flags_skip_first_months_of_a_run() {
        let s = [1.2, 1.2, 1.2, 1.2, 1.0, 1.2];
        assert_eq!(persistence_flags(&s, |t| t > 1.05, 3), vec![0, 0, 1, 1, 0, 0]);
    }

    #[test]
    fn shortage_event_severity() {
        let id = NodeId::new("hbm");
        let s = [1.0, 1.1, 1.4, 1.2, 1.0];
        let e = shortage_events(&id, &s, &AnalysisParams::default());
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].start_month, 1);
        assert_eq!(e[0].duration_months, 3);
        assert!((e[0].severity - 4.2).abs() < 1e-12);
    }

    #[test]
    fn hard_gluts_recorded_separately() {
        let id = NodeId::new("dram");
        let s = [0.9, 0.7, 0.7, 0.9, 1.0];
        let e = glut_events(&id, &s, &AnalysisParams::default());
        assert_eq!(e.len(), 2);
        assert_eq!(e[0].class, GlutClass::Soft);
        assert_eq!(e[0].duration_months, 4);
        assert!((e[0].severity - 1.2).abs() < 1e-12);
        assert_eq!(e[1].class, GlutClass::Hard);
        assert_eq!(e[1].start_month, 1);
        assert!((e[1].severity - 0.6).abs() < 1e-12);
    }

    #[test]
    fn score_grows_with_children() {
        assert_eq!(bottleneck_score(1.2, 0, 5), 0.0);
        assert!(bottleneck_score(1.2, 10, 3) > bottleneck_score(1.2, 10, 0));
    }

    proptest! {
        #[test]
        fn flag_implies_persistent_run(s in proptest::collection::vec(0.5f64..1.5, 1..100), p in 1usize..6) {
            let flags = persistence_flags(&s, |t| t > 1.05, p);
            for (m, f) in flags.iter().enumerate() {
                if *f == 1 {
                    prop_assert!(m + 1 >= p);
                    prop_assert!(s[m + 1 - p..=m].iter().all(|t| *t > 1.05));
                }
            }
        }

        #[test]
        fn runs_meet_min_length(s in proptest::collection::vec(0.5f64..1.5, 0..100), p in 1usize..6) {
            for r in runs(&s, |t| t > 1.05, p) {
                prop_assert!(r.len >= p);
                prop_assert!(s[r.start..r.start + r.len].iter().all(|t| *t > 1.05));
            }
        }
    }
}
