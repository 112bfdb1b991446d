// Gremlin Chain Node
// Cycles through child sequences, one per press

use std::time::Duration;

use super::NodeCx;
use crate::device::EventValue;
use crate::engine::effect::{Effect, Effects, EvalResult};
use crate::profile::{ChainConfig, ChainTimeout, Slot};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    pub index: usize,
    pub held: bool,
}

pub(super) fn evaluate(config: &ChainConfig, state: &mut ChainState, value: EventValue, cx: &mut NodeCx) -> EvalResult {
    let mut effects = Effects::new();
    let count = config.sequences.len();
    if count == 0 {
        return Ok(effects);
    }
    state.index %= count;
    let current = Slot::Sequence(state.index);

    if let EventValue::Axis(_) = value {
        effects.push(Effect::activate(current, value));
        return Ok(effects);
    }

    let pressed = value.is_pressed();
    if pressed && !state.held {
        state.held = true;
        cx.cancel_timer();
        effects.push(Effect::activate(current, value));
        if let (ChainTimeout::Advance, Some(ms)) = (config.on_timeout, config.timeout_ms) {
            cx.schedule_in(Duration::from_millis(ms));
        }
    } else if !pressed && state.held {
        state.held = false;
        effects.push(Effect::activate(current, value));
        state.index = (state.index + 1) % count;
        match (config.on_timeout, config.timeout_ms) {
            (ChainTimeout::Reset, Some(ms)) => {
                cx.schedule_in(Duration::from_millis(ms));
            }
            (ChainTimeout::Advance, _) => {
                cx.cancel_timer();
            }
            _ => {}
        }
    }
    Ok(effects)
}

pub(super) fn on_timer(config: &ChainConfig, state: &mut ChainState, cx: &mut NodeCx) -> EvalResult {
    let mut effects = Effects::new();
    let count = config.sequences.len();
    if count == 0 {
        return Ok(effects);
    }
    match config.on_timeout {
        ChainTimeout::Reset => {
            if !state.held && state.index != 0 {
                log::debug!("Chain '{}' timed out, back to the first sequence", cx.action);
                state.index = 0;
            }
        }
        ChainTimeout::Advance => {
            if state.held {
                let from = state.index % count;
                let to = (from + 1) % count;
                effects.push(Effect::press(Slot::Sequence(from), false));
                effects.push(Effect::press(Slot::Sequence(to), true));
                state.index = to;
                if let Some(ms) = config.timeout_ms {
                    cx.schedule_in(Duration::from_millis(ms.max(1)));
                }
            }
        }
    }
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::profile::ActionId;

    fn chain(timeout_ms: Option<u64>, on_timeout: ChainTimeout) -> ChainConfig {
        ChainConfig {
            sequences: vec![vec![ActionId::new("a")], vec![ActionId::new("b")], vec![ActionId::new("c")]],
            timeout_ms,
            on_timeout,
        }
    }

    fn tap(config: &ChainConfig, state: &mut ChainState, h: &mut Harness, at: u64) -> Vec<Effect> {
        let mut out = Vec::new();
        let mut cx = Harness::at(at, h);
        out.extend(evaluate(config, state, EventValue::Button(true), &mut cx).unwrap());
        let mut cx = Harness::at(at + 5, h);
        out.extend(evaluate(config, state, EventValue::Button(false), &mut cx).unwrap());
        out
    }

    #[test]
    fn test_cycles_and_wraps() {
        let config = chain(None, ChainTimeout::Reset);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        let mut seen = Vec::new();
        for i in 0..4 {
            let effects = tap(&config, &mut state, &mut h, i * 100);
            seen.push(effects[0].clone());
        }
        assert_eq!(
            seen,
            vec![
                press(Slot::Sequence(0), true),
                press(Slot::Sequence(1), true),
                press(Slot::Sequence(2), true),
                press(Slot::Sequence(0), true),
            ]
        );
    }

    #[test]
    fn test_release_goes_to_the_sequence_that_was_pressed() {
        let config = chain(None, ChainTimeout::Reset);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        let effects = tap(&config, &mut state, &mut h, 0);
        assert_eq!(effects, vec![press(Slot::Sequence(0), true), press(Slot::Sequence(0), false)]);
        assert_eq!(state.index, 1);
    }

    #[test]
    fn test_reset_timeout_returns_to_start() {
        let config = chain(Some(500), ChainTimeout::Reset);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        tap(&config, &mut state, &mut h, 0);
        assert_eq!(h.deadline_ms(), Some(505));

        let mut cx = Harness::at(505, &mut h);
        assert!(on_timer(&config, &mut state, &mut cx).unwrap().is_empty());
        assert_eq!(state.index, 0);
    }

    #[test]
    fn test_press_before_timeout_cancels_reset() {
        let config = chain(Some(500), ChainTimeout::Reset);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        tap(&config, &mut state, &mut h, 0);
        let mut cx = Harness::at(100, &mut h);
        let effects = evaluate(&config, &mut state, EventValue::Button(true), &mut cx).unwrap();
        assert_eq!(effects.as_slice(), &[press(Slot::Sequence(1), true)]);
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn test_advance_timeout_steps_while_held() {
        let config = chain(Some(200), ChainTimeout::Advance);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        let mut cx = Harness::at(0, &mut h);
        evaluate(&config, &mut state, EventValue::Button(true), &mut cx).unwrap();
        assert_eq!(h.deadline_ms(), Some(200));

        let mut cx = Harness::at(200, &mut h);
        let effects = on_timer(&config, &mut state, &mut cx).unwrap();
        assert_eq!(
            effects.as_slice(),
            &[press(Slot::Sequence(0), false), press(Slot::Sequence(1), true)]
        );
        assert_eq!(h.deadline_ms(), Some(400));

        let mut cx = Harness::at(250, &mut h);
        let released = evaluate(&config, &mut state, EventValue::Button(false), &mut cx).unwrap();
        assert_eq!(released.as_slice(), &[press(Slot::Sequence(1), false)]);
        assert_eq!(state.index, 2);
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn test_axis_values_do_not_advance() {
        let config = chain(None, ChainTimeout::Reset);
        let mut state = ChainState::default();
        let mut h = Harness::new();
        let mut cx = Harness::at(0, &mut h);
        let effects = evaluate(&config, &mut state, EventValue::Axis(0.4), &mut cx).unwrap();
        assert_eq!(effects.as_slice(), &[Effect::activate(Slot::Sequence(0), EventValue::Axis(0.4))]);
        assert_eq!(state.index, 0);
    }
}
