// Gremlin Runtime Arena
// Per-activation node state keyed by (action, context)

use std::collections::HashMap;

use super::context::ContextId;
use super::nodes::NodeState;
use crate::profile::{ActionId, ActionNode};

/// Runtime state lives outside the library so a shared node keeps
/// separate state for every binding that reaches it.
#[derive(Debug, Default)]
pub struct RuntimeArena {
    states: HashMap<(ActionId, ContextId), NodeState>,
}

impl RuntimeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a node in a context, created or replaced to fit the node's kind
    pub fn state_mut(&mut self, action: &ActionId, context: ContextId, node: &ActionNode) -> &mut NodeState {
        let state = self
            .states
            .entry((action.clone(), context))
            .or_insert_with(|| NodeState::for_node(node));
        if !state.fits(node) {
            log::debug!("Action '{}' changed kind, resetting its state in {}", action, context);
            *state = NodeState::for_node(node);
        }
        state
    }

    pub fn get(&self, action: &ActionId, context: ContextId) -> Option<&NodeState> {
        self.states.get(&(action.clone(), context))
    }

    /// Drop every state of one context, returning them for teardown
    pub fn remove_context(&mut self, context: ContextId) -> Vec<(ActionId, NodeState)> {
        let keys: Vec<(ActionId, ContextId)> = self.states.keys().filter(|(_, c)| *c == context).cloned().collect();
        let mut removed: Vec<(ActionId, NodeState)> = keys
            .into_iter()
            .filter_map(|key| self.states.remove(&key).map(|state| (key.0, state)))
            .collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        removed
    }

    pub fn remove_action(&mut self, action: &ActionId) -> usize {
        let before = self.states.len();
        self.states.retain(|(id, _), _| id != action);
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
