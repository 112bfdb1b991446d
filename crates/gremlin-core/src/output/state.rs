// Gremlin Pressed Output State
// Tracks held buttons and off-center hats so they can be returned to rest

use std::collections::HashSet;

use crate::device::{DeviceId, EventValue, InputAddr, InputKind};

/// Outputs currently away from their rest value
#[derive(Debug, Clone, Default)]
pub struct PressedOutputs {
    held: HashSet<InputAddr>,
}

impl PressedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a written value
    pub fn record(&mut self, addr: &InputAddr, value: EventValue) {
        if addr.input.kind == InputKind::Axis {
            return;
        }
        if value.is_pressed() {
            self.held.insert(addr.clone());
        } else {
            self.held.remove(addr);
        }
    }

    pub fn is_held(&self, addr: &InputAddr) -> bool {
        self.held.contains(addr)
    }

    /// Remove and return a device's held outputs with their rest values
    pub fn drain_device(&mut self, device: &DeviceId) -> Vec<(InputAddr, EventValue)> {
        let mut drained: Vec<InputAddr> = self.held.iter().filter(|a| &a.device == device).cloned().collect();
        drained.sort();
        for addr in &drained {
            self.held.remove(addr);
        }
        drained
            .into_iter()
            .map(|addr| {
                let rest = EventValue::rest(addr.input.kind);
                (addr, rest)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HatDirection, InputRef};

    #[test]
    fn test_press_release_tracking() {
        let mut state = PressedOutputs::new();
        let b = InputAddr::new("vjoy", InputRef::button(1));
        state.record(&b, EventValue::Button(true));
        assert!(state.is_held(&b));
        state.record(&b, EventValue::Button(false));
        assert!(state.is_empty());
    }

    #[test]
    fn test_axes_are_not_tracked() {
        let mut state = PressedOutputs::new();
        state.record(&InputAddr::new("vjoy", InputRef::axis(1)), EventValue::Axis(1.0));
        assert!(state.is_empty());
    }

    #[test]
    fn test_drain_device_only() {
        let mut state = PressedOutputs::new();
        state.record(&InputAddr::new("vjoy", InputRef::hat(1)), EventValue::Hat(HatDirection::West));
        state.record(&InputAddr::new("keyboard", InputRef::button(30)), EventValue::Button(true));
        let drained = state.drain_device(&DeviceId::new("vjoy"));
        assert_eq!(
            drained,
            vec![(InputAddr::new("vjoy", InputRef::hat(1)), EventValue::Hat(HatDirection::Center))]
        );
        assert_eq!(state.len(), 1);
    }
}
