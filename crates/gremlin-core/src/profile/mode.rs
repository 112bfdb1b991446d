// Gremlin Modes
// Named binding partitions with single-parent inheritance

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ProfileError;

/// A mode and its optional parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// All modes of a profile, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeTree {
    modes: IndexMap<String, Option<String>>,
}

impl ModeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a mode
    pub fn add(&mut self, name: impl Into<String>, parent: Option<&str>) {
        self.modes.insert(name.into(), parent.map(str::to_string));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.modes.shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modes.contains_key(name)
    }

    pub fn parent(&self, name: &str) -> Option<&str> {
        self.modes.get(name).and_then(|p| p.as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Mode> + '_ {
        self.modes.iter().map(|(name, parent)| Mode {
            name: name.clone(),
            parent: parent.clone(),
        })
    }

    /// `mode` followed by its ancestors, nearest first.
    ///
    /// Stops at an unknown parent, and at the first repeat should the tree
    /// contain a cycle that validation has not rejected yet.
    pub fn ancestors<'a>(&'a self, mode: &'a str) -> Vec<&'a str> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(mode);
        while let Some(name) = current {
            if !self.contains(name) || !seen.insert(name) {
                break;
            }
            chain.push(name);
            current = self.parent(name);
        }
        chain
    }

    /// True if `ancestor` is `mode` or one of its ancestors
    pub fn inherits_from(&self, mode: &str, ancestor: &str) -> bool {
        self.ancestors(mode).contains(&ancestor)
    }

    /// Every parent exists and no inheritance chain loops
    pub fn validate(&self) -> Result<(), ProfileError> {
        for (name, parent) in &self.modes {
            if let Some(parent) = parent {
                if !self.contains(parent) {
                    return Err(ProfileError::MissingMode(parent.clone()));
                }
            }
            let mut seen = HashSet::new();
            let mut current = Some(name.as_str());
            while let Some(n) = current {
                if !seen.insert(n) {
                    return Err(ProfileError::CyclicModes(name.clone()));
                }
                current = self.parent(n);
            }
        }
        Ok(())
    }
}
