// Gremlin Input State Cache
// Latest value of every readable input, used by conditions and merges

use std::collections::HashMap;

use super::{DeviceId, EventValue, InputAddr, InputKind, InputRef};

/// Last seen value per input
#[derive(Debug, Default, Clone)]
pub struct InputStates {
    values: HashMap<InputAddr, EventValue>,
}

impl InputStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sample, returning whether it differs from the previous one
    pub fn update(&mut self, addr: InputAddr, value: EventValue) -> bool {
        match self.values.insert(addr, value) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    pub fn get(&self, addr: &InputAddr) -> Option<EventValue> {
        self.values.get(addr).copied()
    }

    /// Value of an input, or the kind's rest value if never seen
    pub fn value_or_rest(&self, addr: &InputAddr) -> EventValue {
        self.get(addr).unwrap_or_else(|| EventValue::rest(addr.input.kind))
    }

    pub fn axis(&self, addr: &InputAddr) -> f64 {
        self.get(addr).and_then(|v| v.as_axis()).unwrap_or(0.0)
    }

    pub fn is_pressed(&self, addr: &InputAddr) -> bool {
        self.get(addr).map(|v| v.is_pressed()).unwrap_or(false)
    }

    /// Forget everything a device reported, e.g. after it disconnected
    pub fn clear_device(&mut self, device: &DeviceId) {
        self.values.retain(|addr, _| &addr.device != device);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Inputs of one kind currently known for a device
    pub fn inputs_of(&self, device: &DeviceId, kind: InputKind) -> Vec<InputRef> {
        let mut inputs: Vec<InputRef> = self
            .values
            .keys()
            .filter(|addr| &addr.device == device && addr.input.kind == kind)
            .map(|addr| addr.input)
            .collect();
        inputs.sort();
        inputs
    }
}
