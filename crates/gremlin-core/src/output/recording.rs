// Gremlin Recording Sink
// In-memory output backend for dry runs and tests

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use super::{OutputError, OutputSink, SinkSpec};
use crate::device::{DeviceId, EventValue, InputAddr};

#[derive(Debug, Default)]
struct Recording {
    writes: Vec<(InputAddr, EventValue)>,
    acquired: Vec<DeviceId>,
    unavailable: HashSet<DeviceId>,
    echo: bool,
}

/// Sink that records every write.
///
/// Clones share the same recording, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log every write at info level
    pub fn echoing() -> Self {
        let sink = Self::new();
        sink.inner.lock().echo = true;
        sink
    }

    pub fn writes(&self) -> Vec<(InputAddr, EventValue)> {
        self.inner.lock().writes.clone()
    }

    /// Drain recorded writes
    pub fn take(&self) -> Vec<(InputAddr, EventValue)> {
        std::mem::take(&mut self.inner.lock().writes)
    }

    /// Values written to one input, oldest first
    pub fn values_of(&self, addr: &InputAddr) -> Vec<EventValue> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn acquired(&self) -> Vec<DeviceId> {
        self.inner.lock().acquired.clone()
    }

    /// Simulate a device owned by another process
    pub fn mark_unavailable(&self, device: &str) {
        self.inner.lock().unavailable.insert(DeviceId::new(device));
    }

    pub fn mark_available(&self, device: &str) {
        self.inner.lock().unavailable.remove(&DeviceId::new(device));
    }
}

impl OutputSink for RecordingSink {
    fn acquire(&mut self, device: &DeviceId, _spec: &SinkSpec) -> Result<(), OutputError> {
        let mut rec = self.inner.lock();
        if rec.unavailable.contains(device) {
            return Err(OutputError::DeviceUnavailable(device.to_string()));
        }
        if !rec.acquired.contains(device) {
            rec.acquired.push(device.clone());
        }
        Ok(())
    }

    fn write(&mut self, addr: &InputAddr, value: EventValue) -> Result<(), OutputError> {
        let mut rec = self.inner.lock();
        if rec.unavailable.contains(&addr.device) {
            return Err(OutputError::DeviceUnavailable(addr.device.to_string()));
        }
        if !rec.acquired.contains(&addr.device) {
            return Err(OutputError::NotAcquired(addr.device.to_string()));
        }
        if rec.echo {
            log::info!("{} = {}", addr, value);
        }
        rec.writes.push((addr.clone(), value));
        Ok(())
    }

    fn release(&mut self, device: &DeviceId) {
        self.inner.lock().acquired.retain(|d| d != device);
    }
}
