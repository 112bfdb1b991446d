// Gremlin Node Effects
// Result space of a node evaluation

use smallvec::SmallVec;

use crate::device::{EventValue, InputAddr, InputKind};
use crate::profile::Slot;

/// One consequence of evaluating a node
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write a value to an intermediate or virtual device
    Output { target: InputAddr, value: EventValue },
    /// Feed a value to every child of one slot
    Activate { slot: Slot, value: EventValue },
    /// Forward the incoming value unchanged to every slot
    PassThrough,
    /// Change the current mode once the walk finishes
    SwitchMode { mode: String, temporary: bool },
}

impl Effect {
    pub fn activate(slot: Slot, value: EventValue) -> Self {
        Effect::Activate { slot, value }
    }

    pub fn press(slot: Slot, pressed: bool) -> Self {
        Effect::Activate {
            slot,
            value: EventValue::Button(pressed),
        }
    }

    pub fn output(target: InputAddr, value: EventValue) -> Self {
        Effect::Output { target, value }
    }
}

/// Effects of one evaluation; empty means no effect
pub type Effects = SmallVec<[Effect; 4]>;

/// Recoverable evaluation failure.
///
/// Never aborts the surrounding walk: the node's output stays at its
/// previous value and the error is logged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Operator '{operator}' is degenerate: {reason}")]
    DegenerateOperator { operator: String, reason: String },

    #[error("Degenerate range: {0}")]
    DegenerateRange(String),

    #[error("{node} cannot handle a {got} value")]
    KindMismatch { node: &'static str, got: InputKind },
}

pub type EvalResult = Result<Effects, EvaluationError>;
