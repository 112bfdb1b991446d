// Gremlin Output Nodes
// Value conversion onto virtual or intermediate inputs and keyboard keys

use std::time::Instant;

use super::{pressed, NodeCx};
use crate::device::{DeviceId, EventValue, HatDirection, InputAddr, InputKind, InputRef};
use crate::engine::effect::{Effect, Effects, EvalResult, EvaluationError};
use crate::profile::{AxisMode, MapToKeyboardConfig, MapToOutputConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputState {
    /// A button or hat target is away from rest
    pub engaged: bool,
    /// Relative mode: current velocity, integrated value and last integration time
    pub velocity: f64,
    pub value: f64,
    pub last_tick: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardState {
    pub held: bool,
}

/// Convert a source value to the kind of the target input
pub fn convert(value: EventValue, target: InputKind, invert: bool) -> Result<EventValue, EvaluationError> {
    let mismatch = || EvaluationError::KindMismatch {
        node: "map-to-output",
        got: value.kind(),
    };
    let converted = match (value, target) {
        (EventValue::Axis(v), InputKind::Axis) => EventValue::Axis(if invert { -v } else { v }),
        (EventValue::Button(_) | EventValue::Hat(_), InputKind::Button) => {
            EventValue::Button(value.is_pressed() != invert)
        }
        (EventValue::Button(_), InputKind::Axis) => {
            let on = value.is_pressed() != invert;
            EventValue::Axis(if on { 1.0 } else { -1.0 })
        }
        (EventValue::Hat(direction), InputKind::Hat) => {
            if invert {
                let (x, y) = direction.components();
                EventValue::Hat(HatDirection::from_components(-x, -y))
            } else {
                value
            }
        }
        _ => return Err(mismatch()),
    };
    Ok(converted)
}

pub(super) fn map_to_output(
    config: &MapToOutputConfig,
    state: &mut OutputState,
    value: EventValue,
    cx: &mut NodeCx,
) -> EvalResult {
    let mut effects = Effects::new();
    let target = config.target();

    if config.axis_mode == AxisMode::Relative && target.input.kind == InputKind::Axis {
        let Some(v) = value.as_axis() else {
            return Err(EvaluationError::KindMismatch {
                node: "map-to-output",
                got: value.kind(),
            });
        };
        if let Some(out) = integrate(config, state, cx.now) {
            effects.push(Effect::output(target, EventValue::Axis(out)));
        }
        state.velocity = if config.invert { -v } else { v };
        if state.velocity != 0.0 && state.last_tick.is_none() {
            state.last_tick = Some(cx.now);
            cx.schedule_in(cx.settings.relative_tick);
        }
        return Ok(effects);
    }

    let out = convert(value, target.input.kind, config.invert)?;
    if target.input.kind != InputKind::Axis {
        state.engaged = out.is_pressed();
    }
    effects.push(Effect::output(target, out));
    Ok(effects)
}

/// Advance the integrated value to `now`; returns it if it moved
fn integrate(config: &MapToOutputConfig, state: &mut OutputState, now: Instant) -> Option<f64> {
    let last = state.last_tick?;
    let dt = now.saturating_duration_since(last).as_secs_f64();
    state.last_tick = Some(now);
    let next = (state.value + state.velocity * config.scaling * dt).clamp(-1.0, 1.0);
    if next == state.value {
        return None;
    }
    state.value = next;
    Some(next)
}

pub(super) fn relative_tick(config: &MapToOutputConfig, state: &mut OutputState, cx: &mut NodeCx) -> EvalResult {
    let mut effects = Effects::new();
    if let Some(out) = integrate(config, state, cx.now) {
        effects.push(Effect::output(config.target(), EventValue::Axis(out)));
    }
    if state.velocity != 0.0 {
        cx.schedule_in(cx.settings.relative_tick);
    } else {
        state.last_tick = None;
    }
    Ok(effects)
}

pub(super) fn release_held(config: &MapToOutputConfig, state: &OutputState) -> Effects {
    let mut effects = Effects::new();
    if state.engaged {
        let target = config.target();
        let rest = EventValue::rest(target.input.kind);
        effects.push(Effect::output(target, rest));
    }
    effects
}

fn key_addr(code: u16) -> InputAddr {
    InputAddr::new(DeviceId::keyboard(), InputRef::button(code))
}

pub(super) fn map_to_keyboard(config: &MapToKeyboardConfig, state: &mut KeyboardState, value: EventValue) -> EvalResult {
    let mut effects = Effects::new();
    let down = pressed("map-to-keyboard", &value)?;
    if down && !state.held {
        state.held = true;
        for key in &config.keys {
            effects.push(Effect::output(key_addr(key.code()), EventValue::Button(true)));
        }
    } else if !down && state.held {
        effects = release_keys(config, state);
        state.held = false;
    }
    Ok(effects)
}

pub(super) fn release_keys(config: &MapToKeyboardConfig, state: &KeyboardState) -> Effects {
    let mut effects = Effects::new();
    if state.held {
        for key in config.keys.iter().rev() {
            effects.push(Effect::output(key_addr(key.code()), EventValue::Button(false)));
        }
    }
    effects
}
