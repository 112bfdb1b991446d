// Gremlin Input Bindings
// (device, input, mode) -> ordered list of independent action roots

use indexmap::IndexMap;
use std::fmt;

use super::action::ActionId;
use crate::device::{DeviceId, InputAddr, InputRef};

/// Where a binding lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub device: DeviceId,
    pub input: InputRef,
    pub mode: String,
}

impl BindingKey {
    pub fn new(device: impl Into<DeviceId>, input: InputRef, mode: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            input,
            mode: mode.into(),
        }
    }

    pub fn addr(&self) -> InputAddr {
        InputAddr::new(self.device.clone(), self.input)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.device, self.input, self.mode)
    }
}

/// All bindings of a profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: IndexMap<BindingKey, Vec<ActionId>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roots of a binding; an empty list removes it
    pub fn set(&mut self, key: BindingKey, roots: Vec<ActionId>) -> Option<Vec<ActionId>> {
        if roots.is_empty() {
            return self.entries.shift_remove(&key);
        }
        self.entries.insert(key, roots)
    }

    /// Append one root to a binding
    pub fn push(&mut self, key: BindingKey, root: ActionId) {
        self.entries.entry(key).or_default().push(root);
    }

    pub fn get(&self, key: &BindingKey) -> &[ActionId] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Roots bound to an input in exactly this mode
    pub fn roots(&self, device: &DeviceId, input: InputRef, mode: &str) -> &[ActionId] {
        self.entries
            .iter()
            .find(|(k, _)| &k.device == device && k.input == input && k.mode == mode)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn remove(&mut self, key: &BindingKey) -> Option<Vec<ActionId>> {
        self.entries.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BindingKey, &Vec<ActionId>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BindingKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct inputs that have a binding in any mode
    pub fn bound_inputs(&self) -> Vec<InputAddr> {
        let mut out: Vec<InputAddr> = Vec::new();
        for key in self.entries.keys() {
            let addr = key.addr();
            if !out.contains(&addr) {
                out.push(addr);
            }
        }
        out
    }

    /// Drop roots failing `keep`; bindings left empty are removed
    pub fn retain_roots(&mut self, mut keep: impl FnMut(&ActionId) -> bool) {
        for roots in self.entries.values_mut() {
            roots.retain(|r| keep(r));
        }
        self.entries.retain(|_, roots| !roots.is_empty());
    }
}
