// Gremlin Action Library
// Id-addressed storage of action nodes, reference resolution and deep duplication

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use super::action::{ActionId, ActionNode};
use super::ProfileError;

/// Every action node of a profile, keyed by id.
///
/// Other structures refer to nodes only through their ids, so a node can be
/// shared by any number of bindings and parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Library {
    actions: IndexMap<ActionId, ActionNode>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ActionId>, node: ActionNode) -> Option<ActionNode> {
        self.actions.insert(id.into(), node)
    }

    pub fn get(&self, id: &ActionId) -> Option<&ActionNode> {
        self.actions.get(id)
    }

    pub fn get_mut(&mut self, id: &ActionId) -> Option<&mut ActionNode> {
        self.actions.get_mut(id)
    }

    pub fn remove(&mut self, id: &ActionId) -> Option<ActionNode> {
        self.actions.shift_remove(id)
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.actions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ActionId> {
        self.actions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActionId, &ActionNode)> {
        self.actions.iter()
    }

    /// Follow reference nodes to the concrete node they stand for.
    ///
    /// Returns the id whose runtime state the caller should use alongside
    /// the node. Broken or cyclic reference chains yield `None`.
    pub fn resolve(&self, id: &ActionId) -> Option<(&ActionId, &ActionNode)> {
        let mut current = self.actions.get_key_value(id)?;
        for _ in 0..=self.actions.len() {
            match current.1 {
                ActionNode::Reference(r) => current = self.actions.get_key_value(&r.target)?,
                _ => return Some(current),
            }
        }
        None
    }

    /// Slot children of the node `id` resolves to
    pub fn children<'a>(&'a self, id: &ActionId) -> Vec<&'a ActionId> {
        match self.resolve(id) {
            Some((_, node)) => node.children(),
            None => Vec::new(),
        }
    }

    /// Fresh id derived from `prefix` that is not yet in use
    pub fn next_id(&self, prefix: &str) -> ActionId {
        let base = ActionId::new(prefix);
        if !self.contains(&base) {
            return base;
        }
        (1..)
            .map(|n| ActionId::new(format!("{}-{}", prefix, n)))
            .find(|id| !self.contains(id))
            .unwrap_or(base)
    }

    /// Deep-copy the subtree rooted at `id` into fresh library entries.
    ///
    /// A reference at the top is resolved first, so duplicating a reference
    /// copies what it points to. References nested inside the subtree stay
    /// references to their original targets. Returns the new root id.
    pub fn duplicate(&mut self, id: &ActionId) -> Result<ActionId, ProfileError> {
        let (source, _) = self
            .resolve(id)
            .ok_or_else(|| ProfileError::MissingAction(id.to_string()))?;
        let source = source.clone();

        // Collect the subtree without descending through references
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![source.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let node = self
                .get(&current)
                .ok_or_else(|| ProfileError::MissingAction(current.to_string()))?;
            for child in node.children().into_iter().rev() {
                if !matches!(self.get(child), Some(ActionNode::Reference(_))) {
                    stack.push(child.clone());
                }
            }
            order.push(current);
        }

        let mut renamed: HashMap<ActionId, ActionId> = HashMap::new();
        for old in &order {
            let new = self.next_id(&format!("{}-copy", old));
            // Reserve so later next_id calls skip it
            self.actions.insert(new.clone(), ActionNode::root(Vec::new()));
            renamed.insert(old.clone(), new);
        }

        for old in &order {
            let mut node = self
                .get(old)
                .cloned()
                .ok_or_else(|| ProfileError::MissingAction(old.to_string()))?;
            node.for_each_child_mut(|child| {
                if let Some(new) = renamed.get(child) {
                    *child = new.clone();
                }
            });
            if let Some(new) = renamed.get(old) {
                self.actions.insert(new.clone(), node);
            }
        }

        log::debug!("Duplicated '{}' into {} new action(s)", source, order.len());
        renamed
            .get(&source)
            .cloned()
            .ok_or_else(|| ProfileError::MissingAction(source.to_string()))
    }

    /// Every id reachable from `id`, including itself
    pub fn reachable(&self, id: &ActionId) -> HashSet<ActionId> {
        let mut seen = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.get(&current) {
                stack.extend(node.children().into_iter().cloned());
            }
        }
        seen
    }

    /// Reject any node reachable from itself through slots or references
    pub fn check_acyclic(&self) -> Result<(), ProfileError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&ActionId, Mark> = HashMap::new();
        for start in self.actions.keys() {
            if marks.contains_key(start) {
                continue;
            }
            // Iterative DFS: (node, next child index)
            let mut stack: Vec<(&ActionId, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Visiting);
            while let Some((current, index)) = stack.pop() {
                let children = self.get(current).map(|n| n.children()).unwrap_or_default();
                if let Some(child) = children.get(index) {
                    stack.push((current, index + 1));
                    match marks.get(child) {
                        Some(Mark::Visiting) => {
                            return Err(ProfileError::CyclicActions(child.to_string()));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            if let Some((key, _)) = self.actions.get_key_value(*child) {
                                marks.insert(key, Mark::Visiting);
                                stack.push((key, 0));
                            }
                        }
                    }
                } else {
                    marks.insert(current, Mark::Done);
                }
            }
        }
        Ok(())
    }
}
