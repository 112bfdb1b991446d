// Gremlin Node State Machines
// Closed dispatch over action kinds: evaluate, timer expiry and teardown

mod axis;
mod chain;
mod macros;
mod output;
mod timing;

use std::time::{Duration, Instant};

pub use axis::{apply_curve, combine, split_value, MergeState, SplitState};
pub use chain::ChainState;
pub use macros::MacroState;
pub use output::{KeyboardState, OutputState};
pub use timing::{TapPhase, TapState, TempoPhase, TempoState};

use super::context::ActivationContext;
use super::effect::{Effect, Effects, EvalResult, EvaluationError};
use super::scheduler::Scheduler;
use crate::device::{EventValue, InputAddr, InputKind, InputStates};
use crate::profile::{ActionId, ActionNode, ConditionScope, Scalar, Slot};
use crate::script::VariableRegistry;
use crate::settings::Settings;
use crate::synth::VirtualButton;

/// Runtime state of one node in one activation context
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Stateless,
    Root(VirtualButton),
    /// Slot that received the press still awaiting its release
    Condition(Option<Slot>),
    Chain(ChainState),
    Tempo(TempoState),
    DoubleTap(TapState),
    Merge(MergeState),
    Split(SplitState),
    Output(OutputState),
    Keyboard(KeyboardState),
    Macro(MacroState),
}

impl NodeState {
    pub fn for_node(node: &ActionNode) -> Self {
        match node {
            ActionNode::Root(_) => NodeState::Root(VirtualButton::new()),
            ActionNode::Chain(_) => NodeState::Chain(ChainState::default()),
            ActionNode::Tempo(_) => NodeState::Tempo(TempoState::default()),
            ActionNode::DoubleTap(_) => NodeState::DoubleTap(TapState::default()),
            ActionNode::MergeAxis(_) => NodeState::Merge(MergeState::default()),
            ActionNode::SplitAxis(_) => NodeState::Split(SplitState::default()),
            ActionNode::MapToOutput(_) => NodeState::Output(OutputState::default()),
            ActionNode::MapToKeyboard(_) => NodeState::Keyboard(KeyboardState::default()),
            ActionNode::Macro(_) => NodeState::Macro(MacroState::default()),
            ActionNode::Condition(_) => NodeState::Condition(None),
            ActionNode::ResponseCurve(_)
            | ActionNode::ChangeMode(_)
            | ActionNode::Reference(_) => NodeState::Stateless,
        }
    }

    /// Whether this state belongs to a node of this kind
    pub fn fits(&self, node: &ActionNode) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&NodeState::for_node(node))
    }
}

/// Everything a node may touch besides its own state
pub struct NodeCx<'a> {
    pub action: &'a ActionId,
    pub context: ActivationContext,
    /// Event timestamp, or the deadline of the firing timer
    pub now: Instant,
    pub settings: &'a Settings,
    pub scheduler: &'a mut Scheduler,
    pub inputs: &'a InputStates,
    pub mode: &'a str,
    pub variables: &'a VariableRegistry,
}

impl NodeCx<'_> {
    /// Arm this node's timer, replacing any pending one
    pub fn schedule_in(&mut self, delay: Duration) -> Instant {
        let deadline = self.now + delay;
        self.scheduler.schedule(self.action, self.context, deadline);
        deadline
    }

    pub fn cancel_timer(&mut self) -> bool {
        self.scheduler.cancel(self.action, self.context.id)
    }
}

struct Scope<'a> {
    inputs: &'a InputStates,
    active: bool,
    mode: &'a str,
    variables: &'a VariableRegistry,
}

impl ConditionScope for Scope<'_> {
    fn input(&self, addr: &InputAddr) -> EventValue {
        self.inputs.value_or_rest(addr)
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn mode(&self) -> &str {
        self.mode
    }

    fn variable(&self, name: &str) -> Option<Scalar> {
        self.variables.scalar(name)
    }
}

/// Button-like reading of a value; axes are rejected
pub(crate) fn pressed(node: &'static str, value: &EventValue) -> Result<bool, EvaluationError> {
    match value {
        EventValue::Axis(_) => Err(EvaluationError::KindMismatch {
            node,
            got: InputKind::Axis,
        }),
        other => Ok(other.is_pressed()),
    }
}

/// React to a value arriving at a node
pub fn evaluate(node: &ActionNode, state: &mut NodeState, value: EventValue, cx: &mut NodeCx) -> EvalResult {
    let mut effects = Effects::new();
    match (node, state) {
        (ActionNode::Root(c), NodeState::Root(button)) => match &c.behavior {
            Some(policy) => {
                if let Some(edge) = button.update(policy, &value) {
                    effects.push(Effect::activate(Slot::Actions, edge.value()));
                }
            }
            None => effects.push(Effect::PassThrough),
        },
        (ActionNode::Condition(c), NodeState::Condition(held)) => {
            let scope = Scope {
                inputs: cx.inputs,
                active: value.is_pressed(),
                mode: cx.mode,
                variables: cx.variables,
            };
            let route = || if c.expression.evaluate(&scope) { Slot::True } else { Slot::False };
            // A press and its release always reach the same branch
            let slot = match value {
                EventValue::Axis(_) => route(),
                _ if value.is_pressed() => *held.get_or_insert_with(route),
                _ => held.take().unwrap_or_else(route),
            };
            log::trace!("Condition '{}' routed to {}", c.expression, slot);
            effects.push(Effect::activate(slot, value));
        }
        (ActionNode::Chain(c), NodeState::Chain(s)) => return chain::evaluate(c, s, value, cx),
        (ActionNode::Tempo(c), NodeState::Tempo(s)) => return timing::tempo(c, s, value, cx),
        (ActionNode::DoubleTap(c), NodeState::DoubleTap(s)) => return timing::double_tap(c, s, value, cx),
        (ActionNode::MergeAxis(c), NodeState::Merge(s)) => return axis::merge(c, s, cx),
        (ActionNode::SplitAxis(c), NodeState::Split(s)) => return axis::split(c, s, value),
        (ActionNode::ResponseCurve(c), NodeState::Stateless) => return axis::curve(c, value),
        (ActionNode::MapToOutput(c), NodeState::Output(s)) => return output::map_to_output(c, s, value, cx),
        (ActionNode::MapToKeyboard(c), NodeState::Keyboard(s)) => return output::map_to_keyboard(c, s, value),
        (ActionNode::Macro(c), NodeState::Macro(s)) => return macros::evaluate(c, s, value, cx),
        (ActionNode::ChangeMode(c), NodeState::Stateless) => {
            if pressed("change-mode", &value)? {
                effects.push(Effect::SwitchMode {
                    mode: c.mode.clone(),
                    temporary: c.temporary,
                });
            }
        }
        _ => {}
    }
    Ok(effects)
}

/// React to this node's timer coming due
pub fn on_timer(node: &ActionNode, state: &mut NodeState, cx: &mut NodeCx) -> EvalResult {
    match (node, state) {
        (ActionNode::Chain(c), NodeState::Chain(s)) => chain::on_timer(c, s, cx),
        (ActionNode::Tempo(c), NodeState::Tempo(s)) => timing::tempo_expired(c, s),
        (ActionNode::DoubleTap(c), NodeState::DoubleTap(s)) => timing::tap_expired(c, s),
        (ActionNode::MapToOutput(c), NodeState::Output(s)) => output::relative_tick(c, s, cx),
        (ActionNode::Macro(c), NodeState::Macro(s)) => macros::on_timer(c, s, cx),
        _ => Ok(Effects::new()),
    }
}

/// Effects that return held outputs to rest when a context goes away
pub fn teardown(node: &ActionNode, state: &NodeState) -> Effects {
    match (node, state) {
        (ActionNode::MapToOutput(c), NodeState::Output(s)) => output::release_held(c, s),
        (ActionNode::MapToKeyboard(c), NodeState::Keyboard(s)) => output::release_keys(c, s),
        _ => Effects::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::context::ContextId;

    /// Owned pieces a NodeCx borrows from
    pub struct Harness {
        pub action: ActionId,
        pub settings: Settings,
        pub scheduler: Scheduler,
        pub inputs: InputStates,
        pub variables: VariableRegistry,
        pub mode: String,
        pub t0: Instant,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                action: ActionId::new("node"),
                settings: Settings::new(),
                scheduler: Scheduler::new(),
                inputs: InputStates::new(),
                variables: VariableRegistry::new(),
                mode: "Default".to_string(),
                t0: Instant::now(),
            }
        }

        pub fn at(ms: u64, h: &mut Harness) -> NodeCx<'_> {
            NodeCx {
                action: &h.action,
                context: ActivationContext {
                    id: ContextId(1),
                    generation: 0,
                },
                now: h.t0 + Duration::from_millis(ms),
                settings: &h.settings,
                scheduler: &mut h.scheduler,
                inputs: &h.inputs,
                mode: &h.mode,
                variables: &h.variables,
            }
        }

        pub fn deadline_ms(&self) -> Option<u64> {
            self.scheduler
                .next_deadline()
                .map(|d| d.duration_since(self.t0).as_millis() as u64)
        }
    }

    pub fn press(slot: Slot, pressed: bool) -> Effect {
        Effect::press(slot, pressed)
    }
}
