// Gremlin Activation Contexts
// One context per (binding, root); identifies runtime state and timers

use std::collections::HashMap;
use std::fmt;

use crate::device::{DeviceId, InputAddr, InputRef};
use crate::profile::ActionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Context id plus the generation its state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationContext {
    pub id: ContextId,
    pub generation: u64,
}

/// Binding a context was created for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub device: DeviceId,
    pub input: InputRef,
    /// Mode that owns the binding, not necessarily the current mode
    pub mode: String,
    pub root: ActionId,
}

impl ContextKey {
    pub fn addr(&self) -> InputAddr {
        InputAddr::new(self.device.clone(), self.input)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: ContextId,
    generation: u64,
}

/// Live contexts.
///
/// Ids are never reused. Destroying a context or bumping its generation
/// turns every timer scheduled under the old generation into a no-op.
#[derive(Debug, Default)]
pub struct Contexts {
    next_id: u64,
    by_key: HashMap<ContextKey, Entry>,
    keys: HashMap<ContextId, ContextKey>,
}

impl Contexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a binding root, created on first use
    pub fn get_or_create(&mut self, key: &ContextKey) -> ActivationContext {
        if let Some(entry) = self.by_key.get(key) {
            return ActivationContext {
                id: entry.id,
                generation: entry.generation,
            };
        }
        self.next_id += 1;
        let id = ContextId(self.next_id);
        log::trace!("Created {} for {}.{}@{} root '{}'", id, key.device, key.input, key.mode, key.root);
        self.by_key.insert(key.clone(), Entry { id, generation: 0 });
        self.keys.insert(id, key.clone());
        ActivationContext { id, generation: 0 }
    }

    pub fn lookup(&self, id: ContextId) -> Option<ActivationContext> {
        let key = self.keys.get(&id)?;
        self.by_key.get(key).map(|e| ActivationContext {
            id: e.id,
            generation: e.generation,
        })
    }

    pub fn key(&self, id: ContextId) -> Option<&ContextKey> {
        self.keys.get(&id)
    }

    /// True if `context` is alive and still in the given generation
    pub fn is_current(&self, context: ContextId, generation: u64) -> bool {
        self.lookup(context).map_or(false, |c| c.generation == generation)
    }

    /// Start a new generation; returns it
    pub fn bump(&mut self, id: ContextId) -> Option<u64> {
        let key = self.keys.get(&id)?;
        let entry = self.by_key.get_mut(key)?;
        entry.generation += 1;
        Some(entry.generation)
    }

    pub fn destroy(&mut self, id: ContextId) -> Option<ContextKey> {
        let key = self.keys.remove(&id)?;
        self.by_key.remove(&key);
        log::trace!("Destroyed {}", id);
        Some(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &ContextKey)> {
        self.keys.iter().map(|(id, key)| (*id, key))
    }

    pub fn ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.keys.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(root: &str) -> ContextKey {
        ContextKey {
            device: DeviceId::new("stick"),
            input: InputRef::button(1),
            mode: "Default".to_string(),
            root: ActionId::new(root),
        }
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let mut c = Contexts::new();
        let a = c.get_or_create(&key("r1"));
        let b = c.get_or_create(&key("r1"));
        let other = c.get_or_create(&key("r2"));
        assert_eq!(a, b);
        assert_ne!(a.id, other.id);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_bump_makes_old_generation_stale() {
        let mut c = Contexts::new();
        let ctx = c.get_or_create(&key("r1"));
        assert!(c.is_current(ctx.id, 0));
        assert_eq!(c.bump(ctx.id), Some(1));
        assert!(!c.is_current(ctx.id, 0));
        assert!(c.is_current(ctx.id, 1));
    }

    #[test]
    fn test_destroyed_context_is_never_current_and_ids_not_reused() {
        let mut c = Contexts::new();
        let first = c.get_or_create(&key("r1"));
        c.destroy(first.id);
        assert!(!c.is_current(first.id, 0));
        let again = c.get_or_create(&key("r1"));
        assert_ne!(first.id, again.id);
    }
}
