// Gremlin Mode Resolver
// Nearest-ancestor binding lookup with a per (device, input, mode) cache

use std::collections::HashMap;

use crate::device::{DeviceId, InputRef};
use crate::profile::{ActionId, Profile};

/// Outcome of resolving one input in one mode
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolution {
    /// Mode whose binding won; `None` when nothing is bound up the chain
    pub mode: Option<String>,
    pub roots: Vec<ActionId>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

type CacheKey = (DeviceId, InputRef, String);

#[derive(Debug, Default)]
pub struct ModeResolver {
    cache: HashMap<CacheKey, Resolution>,
}

impl ModeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roots for an input in `mode`.
    ///
    /// Walks from `mode` towards the root of its inheritance chain and
    /// returns the first non-empty binding. Farther ancestors are never
    /// merged in.
    pub fn resolve(&mut self, profile: &Profile, device: &DeviceId, input: InputRef, mode: &str) -> &Resolution {
        let key = (device.clone(), input, mode.to_string());
        self.cache
            .entry(key)
            .or_insert_with(|| Self::walk(profile, device, input, mode))
    }

    /// Uncached lookup
    pub fn walk(profile: &Profile, device: &DeviceId, input: InputRef, mode: &str) -> Resolution {
        for ancestor in profile.modes().ancestors(mode) {
            let roots = profile.bindings_for(device, input, ancestor);
            if !roots.is_empty() {
                return Resolution {
                    mode: Some(ancestor.to_string()),
                    roots: roots.to_vec(),
                };
            }
        }
        Resolution::default()
    }

    /// Drop cached results for one input in every mode
    pub fn invalidate_input(&mut self, device: &DeviceId, input: InputRef) {
        let before = self.cache.len();
        self.cache.retain(|(d, i, _), _| !(d == device && *i == input));
        log::trace!(
            "Resolver: dropped {} cached entry(ies) for {}.{}",
            before - self.cache.len(),
            device,
            input
        );
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
