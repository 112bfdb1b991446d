// Gremlin Timing Nodes
// Short/long press and single/double tap discrimination

use std::time::Duration;

use super::{pressed, NodeCx};
use crate::device::EventValue;
use crate::engine::effect::{Effect, Effects, EvalResult};
use crate::profile::{DoubleTapConfig, LongActivation, Slot, TapMode, TempoConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TempoPhase {
    #[default]
    Idle,
    /// Pressed, threshold not reached yet
    Waiting,
    /// Long press already delivered, release pending
    LongActive,
    /// Threshold passed, long press delivered on release
    LongReady,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempoState {
    pub phase: TempoPhase,
}

pub(super) fn tempo(config: &TempoConfig, state: &mut TempoState, value: EventValue, cx: &mut NodeCx) -> EvalResult {
    let mut effects = Effects::new();
    if pressed("tempo", &value)? {
        if state.phase == TempoPhase::Idle {
            state.phase = TempoPhase::Waiting;
            cx.schedule_in(Duration::from_millis(config.threshold_ms));
        }
        return Ok(effects);
    }

    match state.phase {
        TempoPhase::Waiting => {
            cx.cancel_timer();
            effects.push(Effect::press(Slot::Short, true));
            effects.push(Effect::press(Slot::Short, false));
        }
        TempoPhase::LongActive => effects.push(Effect::press(Slot::Long, false)),
        TempoPhase::LongReady => {
            effects.push(Effect::press(Slot::Long, true));
            effects.push(Effect::press(Slot::Long, false));
        }
        TempoPhase::Idle => {}
    }
    state.phase = TempoPhase::Idle;
    Ok(effects)
}

pub(super) fn tempo_expired(config: &TempoConfig, state: &mut TempoState) -> EvalResult {
    let mut effects = Effects::new();
    if state.phase == TempoPhase::Waiting {
        match config.activate_on {
            LongActivation::Press => {
                state.phase = TempoPhase::LongActive;
                effects.push(Effect::press(Slot::Long, true));
            }
            LongActivation::Release => state.phase = TempoPhase::LongReady,
        }
    }
    Ok(effects)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TapPhase {
    #[default]
    Idle,
    /// Exclusive: first tap seen, outcome undecided
    Pending { held: bool },
    /// Combined: single already delivered, second tap still possible
    Window { held: bool },
    SingleHeld,
    DoubleHeld,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapState {
    pub phase: TapPhase,
}

pub(super) fn double_tap(
    config: &DoubleTapConfig,
    state: &mut TapState,
    value: EventValue,
    cx: &mut NodeCx,
) -> EvalResult {
    let mut effects = Effects::new();
    let window = Duration::from_millis(config.threshold_ms);
    let is_press = pressed("double-tap", &value)?;

    state.phase = match (config.mode, state.phase, is_press) {
        (TapMode::Exclusive, TapPhase::Idle, true) => {
            cx.schedule_in(window);
            TapPhase::Pending { held: true }
        }
        (TapMode::Exclusive, TapPhase::Pending { .. }, true) => {
            cx.cancel_timer();
            effects.push(Effect::press(Slot::Double, true));
            TapPhase::DoubleHeld
        }
        (TapMode::Exclusive, TapPhase::Pending { held: true }, false) => TapPhase::Pending { held: false },

        (TapMode::Combined, TapPhase::Idle, true) => {
            cx.schedule_in(window);
            effects.push(Effect::press(Slot::Single, true));
            TapPhase::Window { held: true }
        }
        (TapMode::Combined, TapPhase::Window { .. }, true) => {
            cx.cancel_timer();
            effects.push(Effect::press(Slot::Single, true));
            effects.push(Effect::press(Slot::Double, true));
            TapPhase::DoubleHeld
        }
        (TapMode::Combined, TapPhase::Window { held: true }, false) => {
            effects.push(Effect::press(Slot::Single, false));
            TapPhase::Window { held: false }
        }

        (_, TapPhase::SingleHeld, false) => {
            effects.push(Effect::press(Slot::Single, false));
            TapPhase::Idle
        }
        (TapMode::Exclusive, TapPhase::DoubleHeld, false) => {
            effects.push(Effect::press(Slot::Double, false));
            TapPhase::Idle
        }
        (TapMode::Combined, TapPhase::DoubleHeld, false) => {
            effects.push(Effect::press(Slot::Single, false));
            effects.push(Effect::press(Slot::Double, false));
            TapPhase::Idle
        }
        (_, phase, _) => phase,
    };
    Ok(effects)
}

pub(super) fn tap_expired(config: &DoubleTapConfig, state: &mut TapState) -> EvalResult {
    let mut effects = Effects::new();
    state.phase = match (config.mode, state.phase) {
        (TapMode::Exclusive, TapPhase::Pending { held }) => {
            effects.push(Effect::press(Slot::Single, true));
            if held {
                TapPhase::SingleHeld
            } else {
                effects.push(Effect::press(Slot::Single, false));
                TapPhase::Idle
            }
        }
        (TapMode::Combined, TapPhase::Window { held: true }) => TapPhase::SingleHeld,
        (TapMode::Combined, TapPhase::Window { held: false }) => TapPhase::Idle,
        (_, phase) => phase,
    };
    Ok(effects)
}
