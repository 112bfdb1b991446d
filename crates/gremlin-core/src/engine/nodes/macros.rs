// Gremlin Macro Node
// Timed playback of recorded steps under once, repeat, toggle or hold policies

use std::time::Duration;

use super::{pressed, NodeCx};
use crate::device::{DeviceId, EventValue, InputAddr, InputRef};
use crate::engine::effect::{Effect, Effects, EvalResult};
use crate::profile::{MacroConfig, MacroEvent, MacroPolicy};

/// Smallest gap between two passes of a looping macro
const MIN_RESTART: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroState {
    pub playing: bool,
    /// Next step to play
    pub cursor: usize,
    /// Passes left for the repeat policy
    pub remaining: u32,
}

/// Outputs one step produces
pub fn step_effects(event: &MacroEvent) -> Effects {
    let mut effects = Effects::new();
    match event {
        MacroEvent::Key { key, pressed } => effects.push(Effect::output(
            InputAddr::new(DeviceId::keyboard(), InputRef::button(key.code())),
            EventValue::Button(*pressed),
        )),
        MacroEvent::MouseButton { mouse_button, pressed } => effects.push(Effect::output(
            InputAddr::new(DeviceId::mouse(), InputRef::button(*mouse_button)),
            EventValue::Button(*pressed),
        )),
        MacroEvent::MouseMotion { mouse_motion: [dx, dy] } => {
            for (index, delta) in [(1, *dx), (2, *dy)] {
                if delta != 0 {
                    effects.push(Effect::output(
                        InputAddr::new(DeviceId::mouse(), InputRef::axis(index)),
                        EventValue::Axis(delta as f64),
                    ));
                }
            }
        }
        MacroEvent::Output { device, input, value } => {
            effects.push(Effect::output(InputAddr::new(device.clone(), *input), *value))
        }
        MacroEvent::Delay { .. } => {}
    }
    effects
}

pub(super) fn evaluate(config: &MacroConfig, state: &mut MacroState, value: EventValue, cx: &mut NodeCx) -> EvalResult {
    let down = pressed("macro", &value)?;
    match (config.policy, down) {
        (MacroPolicy::Once | MacroPolicy::Repeat, true) => {
            if state.playing {
                return Ok(Effects::new());
            }
            Ok(start(config, state, cx))
        }
        (MacroPolicy::Toggle, true) => {
            if state.playing {
                stop(state, cx);
                Ok(Effects::new())
            } else {
                Ok(start(config, state, cx))
            }
        }
        (MacroPolicy::Hold, true) => Ok(start(config, state, cx)),
        (MacroPolicy::Hold, false) => {
            stop(state, cx);
            Ok(Effects::new())
        }
        _ => Ok(Effects::new()),
    }
}

pub(super) fn on_timer(config: &MacroConfig, state: &mut MacroState, cx: &mut NodeCx) -> EvalResult {
    if !state.playing {
        return Ok(Effects::new());
    }
    Ok(advance(config, state, cx))
}

fn start(config: &MacroConfig, state: &mut MacroState, cx: &mut NodeCx) -> Effects {
    state.playing = true;
    state.cursor = 0;
    state.remaining = match config.policy {
        MacroPolicy::Repeat => config.count.max(1),
        _ => 1,
    };
    log::debug!("Macro '{}' started ({:?})", cx.action, config.policy);
    advance(config, state, cx)
}

fn stop(state: &mut MacroState, cx: &mut NodeCx) {
    if state.playing {
        log::debug!("Macro '{}' stopped", cx.action);
    }
    state.playing = false;
    state.cursor = 0;
    cx.cancel_timer();
}

/// Play steps until the next wait, then arm the timer for it
fn advance(config: &MacroConfig, state: &mut MacroState, cx: &mut NodeCx) -> Effects {
    let floor = cx.settings.macro_min_delay;
    let mut effects = Effects::new();
    loop {
        let Some(event) = config.events.get(state.cursor) else {
            state.cursor = 0;
            let again = match config.policy {
                MacroPolicy::Once => false,
                MacroPolicy::Repeat => {
                    state.remaining = state.remaining.saturating_sub(1);
                    state.remaining > 0
                }
                MacroPolicy::Toggle | MacroPolicy::Hold => true,
            };
            if again {
                let gap = Duration::from_millis(config.repeat_delay_ms).max(floor).max(MIN_RESTART);
                cx.schedule_in(gap);
            } else {
                state.playing = false;
                log::debug!("Macro '{}' finished", cx.action);
            }
            return effects;
        };
        state.cursor += 1;

        if let Some(delay) = event.delay() {
            cx.schedule_in(delay.max(floor));
            return effects;
        }
        effects.extend(step_effects(event));

        match config.events.get(state.cursor) {
            Some(next) if next.delay().is_none() => {
                cx.schedule_in(floor);
                return effects;
            }
            _ => continue,
        }
    }
}
