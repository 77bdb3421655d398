//! Endogenous capacity expansion driven by a smoothed plan signal.

use crate::capacity::DynamicExpansion;
use crate::state::NodeState;
use sim_core::{Node, TriggerParams};

/// Plan signal of a month: demand over producible supply.
pub fn plan_signal(demand: f64, supply_potential: f64, eps: f64) -> f64 {
    demand / (supply_potential + eps)
}

/// Mean of the last `window` values; `None` until the window is full.
pub fn trailing_average(history: &[f64], window: usize) -> Option<f64> {
    if window == 0 || history.len() < window {
        return None;
    }
    let tail = &history[history.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Evaluate the trigger for a node after its month has been recorded.
///
/// Fires when the trailing average of `plan_history` exceeds the node's
/// threshold and the cooldown since the previous trigger has elapsed. The
/// increment is a fraction of current capacity, effective after the node's
/// debottleneck lead time.
pub fn evaluate(
    state: &mut NodeState,
    node: &Node,
    primary: bool,
    capacity: f64,
    month: u32,
    params: &TriggerParams,
) -> Option<DynamicExpansion> {
    let threshold = if primary {
        params.primary_threshold
    } else {
        params.threshold
    };
    let avg = trailing_average(&state.plan_history, params.window_months as usize)?;
    if avg.is_nan() || avg <= threshold {
        return None;
    }
    if let Some(last) = state.last_expansion_month {
        if month.saturating_sub(last) < params.cooldown_months {
            return None;
        }
    }
    let magnitude = params.increment_fraction * capacity;
    if !(magnitude.is_finite() && magnitude > 0.0) {
        return None;
    }
    let expansion = DynamicExpansion {
        decided_month: month,
        effective_month: month + node.lead_time_debottleneck_months,
        magnitude,
        ramp_months: params.ramp_months,
    };
    state.dynamic_expansions.push(expansion.clone());
    state.last_expansion_month = Some(month);
    Some(expansion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::NodeKind;

    fn setup(history: &[f64]) -> (NodeState, Node) {
        let node = Node::new("n", "N", "u", "g", NodeKind::DerivedFlow).lead_time(9);
        let mut state = NodeState::new(&node, 240);
        state.plan_history.extend_from_slice(history);
        (state, node)
    }

    #[test]
    fn needs_a_full_window() {
        let (mut s, n) = setup(&[2.0; 5]);
        assert_eq!(evaluate(&mut s, &n, false, 100.0, 4, &TriggerParams::default()), None);
    }

    #[test]
    fn fires_with_lead_time_and_fractional_increment() {
        let (mut s, n) = setup(&[1.2; 6]);
        let e = evaluate(&mut s, &n, false, 100.0, 5, &TriggerParams::default()).unwrap();
        assert_eq!(e.effective_month, 14);
        assert!((e.magnitude - 20.0).abs() < 1e-12);
        assert_eq!(s.last_expansion_month, Some(5));
        assert_eq!(s.dynamic_expansions.len(), 1);
    }

    #[test]
    fn primary_threshold_is_lower() {
        let p = TriggerParams::default();
        let (mut s, n) = setup(&[1.12; 6]);
        assert!(evaluate(&mut s, &n, false, 100.0, 5, &p).is_none());
        assert!(evaluate(&mut s, &n, true, 100.0, 5, &p).is_some());
    }

    #[test]
    fn cooldown_blocks_repeat_triggers() {
        let p = TriggerParams::default();
        let (mut s, n) = setup(&[2.0; 30]);
        assert!(evaluate(&mut s, &n, false, 100.0, 6, &p).is_some());
        assert!(evaluate(&mut s, &n, false, 100.0, 17, &p).is_none());
        assert!(evaluate(&mut s, &n, false, 100.0, 18, &p).is_some());
    }

    #[test]
    fn zero_capacity_never_fires() {
        let (mut s, n) = setup(&[5.0; 6]);
        assert!(evaluate(&mut s, &n, false, 0.0, 5, &TriggerParams::default()).is_none());
    }

    proptest! {
        #[test]
        fn triggers_respect_cooldown(values in proptest::collection::vec(0.0f64..3.0, 1..120)) {
            let p = TriggerParams::default();
            let node = Node::new("n", "N", "u", "g", NodeKind::DerivedFlow);
            let mut s = NodeState::new(&node, 240);
            let mut fired = vec![];
            for (m, v) in values.iter().enumerate() {
                s.plan_history.push(*v);
                if evaluate(&mut s, &node, false, 100.0, m as u32, &p).is_some() {
                    fired.push(m as u32);
                }
            }
            prop_assert!(fired.windows(2).all(|w| w[1] - w[0] >= p.cooldown_months));
        }
    }
}
