// Gremlin Action Nodes
// Closed set of action kinds with their configuration and named child slots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};

use super::condition::Expression;
use crate::device::{DeviceId, EventValue, InputAddr, InputRef};
use crate::key::Key;
use crate::synth::ActivationPolicy;

/// Library identifier of an action node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Named child slot of an action node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Actions,
    Sequence(usize),
    True,
    False,
    Short,
    Long,
    Single,
    Double,
    Lower,
    Upper,
}

/// A library entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionNode {
    Root(RootConfig),
    Chain(ChainConfig),
    Condition(ConditionConfig),
    Tempo(TempoConfig),
    DoubleTap(DoubleTapConfig),
    MergeAxis(MergeAxisConfig),
    SplitAxis(SplitAxisConfig),
    ResponseCurve(ResponseCurveConfig),
    MapToOutput(MapToOutputConfig),
    MapToKeyboard(MapToKeyboardConfig),
    Macro(MacroConfig),
    ChangeMode(ChangeModeConfig),
    Reference(ReferenceConfig),
}

/// Entry point of one independent action sequence bound to an input
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub actions: Vec<ActionId>,
    /// Request button semantics on an axis or hat input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<ActivationPolicy>,
}

/// What a chain does when its timeout elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainTimeout {
    /// Go back to the first sequence
    #[default]
    Reset,
    /// Move on to the next sequence
    Advance,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub sequences: Vec<Vec<ActionId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_timeout: ChainTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub expression: Expression,
    #[serde(rename = "true", default)]
    pub when_true: Vec<ActionId>,
    #[serde(rename = "false", default)]
    pub when_false: Vec<ActionId>,
}

/// When the long action of a tempo node fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LongActivation {
    /// As soon as the threshold elapses while held
    #[default]
    Press,
    /// On release after the threshold elapsed
    Release,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoConfig {
    pub threshold_ms: u64,
    #[serde(default)]
    pub activate_on: LongActivation,
    #[serde(default)]
    pub short: Vec<ActionId>,
    #[serde(default)]
    pub long: Vec<ActionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TapMode {
    /// Exactly one of single/double per activation
    #[default]
    Exclusive,
    /// Single on every press, double in addition
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleTapConfig {
    pub threshold_ms: u64,
    #[serde(default)]
    pub mode: TapMode,
    #[serde(default)]
    pub single: Vec<ActionId>,
    #[serde(default)]
    pub double: Vec<ActionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MergeOperator {
    SumClamped,
    Average,
    MaxMagnitude,
    Minimum,
    Maximum,
    Weighted,
}

fn default_weights() -> [f64; 2] {
    [1.0, 1.0]
}

fn is_default_weights(w: &[f64; 2]) -> bool {
    *w == default_weights()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeAxisConfig {
    pub first: InputAddr,
    pub second: InputAddr,
    pub operator: MergeOperator,
    /// Only used by the weighted operator
    #[serde(default = "default_weights", skip_serializing_if = "is_default_weights")]
    pub weights: [f64; 2],
    #[serde(default)]
    pub actions: Vec<ActionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAxisConfig {
    pub split: f64,
    #[serde(default)]
    pub lower: Vec<ActionId>,
    #[serde(default)]
    pub upper: Vec<ActionId>,
}

fn default_curve() -> Vec<[f64; 2]> {
    vec![[-1.0, -1.0], [1.0, 1.0]]
}

fn default_deadzone() -> [f64; 4] {
    [-1.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurveConfig {
    /// Control points sorted by x, spanning [-1, 1]
    #[serde(default = "default_curve")]
    pub points: Vec<[f64; 2]>,
    /// low outer, low inner, high inner, high outer
    #[serde(default = "default_deadzone")]
    pub deadzone: [f64; 4],
    #[serde(default)]
    pub actions: Vec<ActionId>,
}

impl Default for ResponseCurveConfig {
    fn default() -> Self {
        Self {
            points: default_curve(),
            deadzone: default_deadzone(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AxisMode {
    #[default]
    Absolute,
    /// Deflection is a velocity integrated into the output
    Relative,
}

fn default_scaling() -> f64 {
    1.0
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapToOutputConfig {
    pub device: DeviceId,
    pub input: InputRef,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(default)]
    pub axis_mode: AxisMode,
    /// Output units per second at full deflection (relative mode)
    #[serde(default = "default_scaling")]
    pub scaling: f64,
}

impl MapToOutputConfig {
    pub fn target(&self) -> InputAddr {
        InputAddr::new(self.device.clone(), self.input)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapToKeyboardConfig {
    pub keys: Vec<Key>,
}

/// One recorded macro step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MacroEvent {
    Key { key: Key, pressed: bool },
    MouseButton { mouse_button: u16, pressed: bool },
    MouseMotion { mouse_motion: [i32; 2] },
    Output { device: DeviceId, input: InputRef, value: EventValue },
    Delay { delay_ms: u64 },
}

impl MacroEvent {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            MacroEvent::Delay { delay_ms } => Some(Duration::from_millis(*delay_ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacroPolicy {
    /// Play once per press
    #[default]
    Once,
    /// Play `count` times per press
    Repeat,
    /// Loop until pressed again
    Toggle,
    /// Loop while held; release stops immediately
    Hold,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroConfig {
    pub events: Vec<MacroEvent>,
    #[serde(default)]
    pub policy: MacroPolicy,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub repeat_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeModeConfig {
    pub mode: String,
    /// Revert to the previous mode when the triggering input is released
    #[serde(default, skip_serializing_if = "is_false")]
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub target: ActionId,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Actions => f.write_str("actions"),
            Slot::Sequence(i) => write!(f, "sequence-{}", i),
            Slot::True => f.write_str("true"),
            Slot::False => f.write_str("false"),
            Slot::Short => f.write_str("short"),
            Slot::Long => f.write_str("long"),
            Slot::Single => f.write_str("single"),
            Slot::Double => f.write_str("double"),
            Slot::Lower => f.write_str("lower"),
            Slot::Upper => f.write_str("upper"),
        }
    }
}

const EMPTY: &[ActionId] = &[];

impl ActionNode {
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    /// Child ids held in one slot; unknown slots are empty
    pub fn slot(&self, slot: Slot) -> &[ActionId] {
        match (self, slot) {
            (ActionNode::Root(c), Slot::Actions) => &c.actions,
            (ActionNode::MergeAxis(c), Slot::Actions) => &c.actions,
            (ActionNode::ResponseCurve(c), Slot::Actions) => &c.actions,
            (ActionNode::Chain(c), Slot::Sequence(i)) => c.sequences.get(i).map(Vec::as_slice).unwrap_or(EMPTY),
            (ActionNode::Condition(c), Slot::True) => &c.when_true,
            (ActionNode::Condition(c), Slot::False) => &c.when_false,
            (ActionNode::Tempo(c), Slot::Short) => &c.short,
            (ActionNode::Tempo(c), Slot::Long) => &c.long,
            (ActionNode::DoubleTap(c), Slot::Single) => &c.single,
            (ActionNode::DoubleTap(c), Slot::Double) => &c.double,
            (ActionNode::SplitAxis(c), Slot::Lower) => &c.lower,
            (ActionNode::SplitAxis(c), Slot::Upper) => &c.upper,
            _ => EMPTY,
        }
    }

    /// All slots in declaration order
    pub fn slots(&self) -> Vec<(Slot, &[ActionId])> {
        match self {
            ActionNode::Root(c) => vec![(Slot::Actions, c.actions.as_slice())],
            ActionNode::MergeAxis(c) => vec![(Slot::Actions, c.actions.as_slice())],
            ActionNode::ResponseCurve(c) => vec![(Slot::Actions, c.actions.as_slice())],
            ActionNode::Chain(c) => c
                .sequences
                .iter()
                .enumerate()
                .map(|(i, s)| (Slot::Sequence(i), s.as_slice()))
                .collect(),
            ActionNode::Condition(c) => vec![(Slot::True, c.when_true.as_slice()), (Slot::False, c.when_false.as_slice())],
            ActionNode::Tempo(c) => vec![(Slot::Short, c.short.as_slice()), (Slot::Long, c.long.as_slice())],
            ActionNode::DoubleTap(c) => vec![(Slot::Single, c.single.as_slice()), (Slot::Double, c.double.as_slice())],
            ActionNode::SplitAxis(c) => vec![(Slot::Lower, c.lower.as_slice()), (Slot::Upper, c.upper.as_slice())],
            ActionNode::MapToOutput(_)
            | ActionNode::MapToKeyboard(_)
            | ActionNode::Macro(_)
            | ActionNode::ChangeMode(_)
            | ActionNode::Reference(_) => Vec::new(),
        }
    }

    /// Every outgoing edge: slot children plus a reference target
    pub fn children(&self) -> Vec<&ActionId> {
        match self {
            ActionNode::Reference(r) => vec![&r.target],
            _ => self.slots().into_iter().flat_map(|(_, ids)| ids.iter()).collect(),
        }
    }

    /// Rewrite every outgoing edge in place
    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut ActionId)) {
        let lists: Vec<&mut Vec<ActionId>> = match self {
            ActionNode::Root(c) => vec![&mut c.actions],
            ActionNode::MergeAxis(c) => vec![&mut c.actions],
            ActionNode::ResponseCurve(c) => vec![&mut c.actions],
            ActionNode::Chain(c) => c.sequences.iter_mut().collect(),
            ActionNode::Condition(c) => vec![&mut c.when_true, &mut c.when_false],
            ActionNode::Tempo(c) => vec![&mut c.short, &mut c.long],
            ActionNode::DoubleTap(c) => vec![&mut c.single, &mut c.double],
            ActionNode::SplitAxis(c) => vec![&mut c.lower, &mut c.upper],
            ActionNode::Reference(r) => {
                f(&mut r.target);
                return;
            }
            ActionNode::MapToOutput(_)
            | ActionNode::MapToKeyboard(_)
            | ActionNode::Macro(_)
            | ActionNode::ChangeMode(_) => Vec::new(),
        };
        for list in lists {
            list.iter_mut().for_each(&mut f);
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ActionNode::Root(_))
    }

    pub fn root(actions: Vec<ActionId>) -> Self {
        ActionNode::Root(RootConfig {
            actions,
            behavior: None,
        })
    }

    pub fn reference(target: impl Into<ActionId>) -> Self {
        ActionNode::Reference(ReferenceConfig { target: target.into() })
    }

    pub fn map_to(device: impl Into<DeviceId>, input: InputRef) -> Self {
        ActionNode::MapToOutput(MapToOutputConfig {
            device: device.into(),
            input,
            invert: false,
            axis_mode: AxisMode::Absolute,
            scaling: default_scaling(),
        })
    }
}
