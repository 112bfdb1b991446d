// Gremlin Axis Nodes
// Merge, split and response curve transforms on normalized axis values

use super::NodeCx;
use crate::device::EventValue;
use crate::engine::effect::{Effect, Effects, EvalResult, EvaluationError};
use crate::profile::{MergeAxisConfig, MergeOperator, ResponseCurveConfig, Slot, SplitAxisConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeState {
    /// Last successfully computed output
    pub last: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitState {
    /// Side that received the previous value
    pub side: Option<Slot>,
}

/// Combine two axis readings
pub fn combine(operator: MergeOperator, weights: [f64; 2], a: f64, b: f64) -> Result<f64, EvaluationError> {
    let value = match operator {
        MergeOperator::SumClamped => a + b,
        MergeOperator::Average => (a + b) / 2.0,
        MergeOperator::MaxMagnitude => {
            if b.abs() > a.abs() {
                b
            } else {
                a
            }
        }
        MergeOperator::Minimum => a.min(b),
        MergeOperator::Maximum => a.max(b),
        MergeOperator::Weighted => {
            let total = weights[0] + weights[1];
            if total.abs() < f64::EPSILON {
                return Err(EvaluationError::DegenerateOperator {
                    operator: operator.to_string(),
                    reason: "weights sum to zero".to_string(),
                });
            }
            (weights[0] * a + weights[1] * b) / total
        }
    };
    Ok(value.clamp(-1.0, 1.0))
}

pub(super) fn merge(config: &MergeAxisConfig, state: &mut MergeState, cx: &mut NodeCx) -> EvalResult {
    let a = cx.inputs.axis(&config.first);
    let b = cx.inputs.axis(&config.second);
    let value = combine(config.operator, config.weights, a, b)?;
    let mut effects = Effects::new();
    state.last = Some(value);
    effects.push(Effect::activate(Slot::Actions, EventValue::Axis(value)));
    Ok(effects)
}

/// Map an axis value onto the half it falls in, rescaled to [-1, 1]
pub fn split_value(split: f64, value: f64) -> (Slot, f64) {
    if value > split {
        let span = 1.0 - split;
        let scaled = if span > 0.0 { -1.0 + 2.0 * (value - split) / span } else { 1.0 };
        (Slot::Upper, scaled.clamp(-1.0, 1.0))
    } else {
        let span = split + 1.0;
        let scaled = if span > 0.0 { -1.0 + 2.0 * (split - value) / span } else { 1.0 };
        (Slot::Lower, scaled.clamp(-1.0, 1.0))
    }
}

pub(super) fn split(config: &SplitAxisConfig, state: &mut SplitState, value: EventValue) -> EvalResult {
    let Some(v) = value.as_axis() else {
        return Err(EvaluationError::KindMismatch {
            node: "split-axis",
            got: value.kind(),
        });
    };
    let mut effects = Effects::new();
    let (side, scaled) = split_value(config.split, v);
    if let Some(previous) = state.side {
        if previous != side {
            effects.push(Effect::activate(previous, EventValue::Axis(-1.0)));
        }
    }
    state.side = Some(side);
    effects.push(Effect::activate(side, EventValue::Axis(scaled)));
    Ok(effects)
}

/// Deadzone followed by piecewise-linear interpolation
pub fn apply_curve(config: &ResponseCurveConfig, value: f64) -> Result<f64, EvaluationError> {
    let shaped = apply_deadzone(config.deadzone, value);
    let points = &config.points;
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Ok(shaped);
    };
    if shaped <= first[0] {
        return Ok(first[1]);
    }
    if shaped >= last[0] {
        return Ok(last[1]);
    }
    for pair in points.windows(2) {
        let (p, q) = (pair[0], pair[1]);
        let dx = q[0] - p[0];
        if dx <= 0.0 {
            return Err(EvaluationError::DegenerateRange(format!(
                "control points at x={} and x={} are not increasing",
                p[0], q[0]
            )));
        }
        if shaped <= q[0] {
            return Ok(p[1] + (shaped - p[0]) * (q[1] - p[1]) / dx);
        }
    }
    Ok(last[1])
}

fn apply_deadzone(deadzone: [f64; 4], value: f64) -> f64 {
    let [low, center_low, center_high, high] = deadzone;
    if value <= low {
        -1.0
    } else if value < center_low {
        -1.0 + (value - low) / (center_low - low)
    } else if value <= center_high {
        0.0
    } else if value < high {
        (value - center_high) / (high - center_high)
    } else {
        1.0
    }
}

pub(super) fn curve(config: &ResponseCurveConfig, value: EventValue) -> EvalResult {
    let mut effects = Effects::new();
    match value {
        EventValue::Axis(v) => {
            let out = apply_curve(config, v)?;
            effects.push(Effect::activate(Slot::Actions, EventValue::Axis(out)));
        }
        _ => {
            log::trace!("Response curve forwards {} value unchanged", value.kind());
            effects.push(Effect::PassThrough);
        }
    }
    Ok(effects)
}
