// Gremlin Output Layer
// Applies action effects to intermediate and virtual devices

mod recording;
mod state;

#[cfg(feature = "pure-rust")]
mod uinput;

use std::collections::{HashMap, HashSet};

use crate::device::{DeviceId, DeviceKind, EventValue, InputAddr, InputKind};
use crate::profile::{DeviceDecl, Profile};

pub use recording::RecordingSink;
pub use state::PressedOutputs;

#[cfg(feature = "pure-rust")]
pub use uinput::{UinputSink, AXIS_MAX, AXIS_MIN};

/// Errors raised by output sinks
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Output device not acquired: {0}")]
    NotAcquired(String),

    #[error("Unsupported output {0}")]
    UnsupportedInput(String),

    #[error("Failed to write event: {0}")]
    WriteError(String),

    #[error("Failed to create virtual device: {0}")]
    DeviceCreation(String),
}

/// Shape of an OS-visible output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkSpec {
    Joystick { axes: u16, buttons: u16, hats: u16 },
    Keyboard,
    Mouse,
}

impl SinkSpec {
    /// Spec for a built-in or declared virtual device
    pub fn for_device(device: &DeviceId, decl: Option<&DeviceDecl>) -> Option<Self> {
        if device == &DeviceId::keyboard() {
            return Some(SinkSpec::Keyboard);
        }
        if device == &DeviceId::mouse() {
            return Some(SinkSpec::Mouse);
        }
        match decl {
            Some(DeviceDecl::Virtual { axes, buttons, hats }) => Some(SinkSpec::Joystick {
                axes: *axes,
                buttons: *buttons,
                hats: *hats,
            }),
            _ => None,
        }
    }
}

/// Backend that owns OS-visible virtual devices
pub trait OutputSink: Send {
    fn acquire(&mut self, device: &DeviceId, spec: &SinkSpec) -> Result<(), OutputError>;
    fn write(&mut self, addr: &InputAddr, value: EventValue) -> Result<(), OutputError>;
    fn release(&mut self, device: &DeviceId);
}

/// What happened to one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Delivered to a virtual device
    Sent,
    /// Stored on an intermediate device; feed it back as an input event
    Feedback,
    /// Same value as last time
    Unchanged,
    /// Target unknown, unavailable or not writable
    Skipped,
}

/// Owns the sink and every value written through it.
///
/// Virtual devices are acquired on activation (built-in keyboard and mouse
/// lazily on first use) and released on deactivation. A device that fails
/// to acquire or write is marked unavailable and skipped until retried;
/// the last value intended for each of its inputs is sent once it is back.
pub struct OutputWriter {
    sink: Box<dyn OutputSink>,
    kinds: HashMap<DeviceId, DeviceKind>,
    specs: HashMap<DeviceId, SinkSpec>,
    acquired: HashSet<DeviceId>,
    unavailable: HashSet<DeviceId>,
    values: HashMap<InputAddr, EventValue>,
    /// Intended while the device was unavailable
    pending: HashMap<InputAddr, EventValue>,
    pressed: PressedOutputs,
}

impl OutputWriter {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        let mut writer = Self {
            sink,
            kinds: HashMap::new(),
            specs: HashMap::new(),
            acquired: HashSet::new(),
            unavailable: HashSet::new(),
            values: HashMap::new(),
            pending: HashMap::new(),
            pressed: PressedOutputs::new(),
        };
        for builtin in [DeviceId::keyboard(), DeviceId::mouse()] {
            if let Some(spec) = SinkSpec::for_device(&builtin, None) {
                writer.kinds.insert(builtin.clone(), DeviceKind::Virtual);
                writer.specs.insert(builtin, spec);
            }
        }
        writer
    }

    /// Take over the output devices a profile declares
    pub fn configure(&mut self, profile: &Profile) {
        let declared: HashSet<&DeviceId> = profile.devices().keys().collect();
        let dropped: Vec<DeviceId> = self
            .kinds
            .keys()
            .filter(|d| !d.is_builtin() && !declared.contains(d))
            .cloned()
            .collect();
        for device in dropped {
            self.release_device(&device);
            self.kinds.remove(&device);
            self.specs.remove(&device);
        }

        for (id, decl) in profile.devices() {
            let kind = decl.kind();
            if kind == DeviceKind::Physical {
                continue;
            }
            self.kinds.insert(id.clone(), kind);
            if let Some(spec) = SinkSpec::for_device(id, Some(decl)) {
                if self.specs.get(id) != Some(&spec) && self.acquired.contains(id) {
                    // Shape changed: rebuild the device
                    self.release_device(id);
                }
                self.specs.insert(id.clone(), spec);
                self.ensure_acquired(id);
            }
        }
    }

    fn ensure_acquired(&mut self, device: &DeviceId) -> bool {
        if self.acquired.contains(device) {
            return true;
        }
        if self.unavailable.contains(device) {
            return false;
        }
        let Some(spec) = self.specs.get(device).copied() else {
            return false;
        };
        match self.sink.acquire(device, &spec) {
            Ok(()) => {
                log::debug!("Acquired output device '{}'", device);
                self.acquired.insert(device.clone());
                true
            }
            Err(e) => {
                log::warn!("Output device '{}' unavailable: {}", device, e);
                self.unavailable.insert(device.clone());
                false
            }
        }
    }

    /// Write one value; the outcome tells the engine whether to feed it back
    pub fn write(&mut self, addr: &InputAddr, value: EventValue) -> WriteOutcome {
        let Some(kind) = self.kinds.get(&addr.device).copied() else {
            log::warn!("Write to undeclared device {}", addr);
            return WriteOutcome::Skipped;
        };

        let relative = addr.device == DeviceId::mouse() && addr.input.kind == InputKind::Axis;
        if relative {
            if value.as_axis() == Some(0.0) {
                return WriteOutcome::Unchanged;
            }
        } else if self.values.get(addr) == Some(&value) {
            self.pending.remove(addr);
            return WriteOutcome::Unchanged;
        }

        match kind {
            DeviceKind::Physical => WriteOutcome::Skipped,
            DeviceKind::Intermediate => {
                self.values.insert(addr.clone(), value);
                WriteOutcome::Feedback
            }
            DeviceKind::Virtual => {
                if !self.ensure_acquired(&addr.device) {
                    log::trace!("Skipping write to unavailable {}", addr);
                    if !relative {
                        self.pending.insert(addr.clone(), value);
                    }
                    return WriteOutcome::Skipped;
                }
                match self.sink.write(addr, value) {
                    Ok(()) => {
                        if !relative {
                            self.pending.remove(addr);
                            self.values.insert(addr.clone(), value);
                            self.pressed.record(addr, value);
                        }
                        WriteOutcome::Sent
                    }
                    Err(e) => {
                        log::warn!("Write to {} failed, marking device unavailable: {}", addr, e);
                        self.acquired.remove(&addr.device);
                        self.unavailable.insert(addr.device.clone());
                        if !relative {
                            self.pending.insert(addr.clone(), value);
                        }
                        WriteOutcome::Skipped
                    }
                }
            }
        }
    }

    /// Last value delivered to an input
    pub fn value(&self, addr: &InputAddr) -> Option<EventValue> {
        self.values.get(addr).copied()
    }

    /// Value waiting for an unavailable device to come back
    pub fn pending(&self, addr: &InputAddr) -> Option<EventValue> {
        self.pending.get(addr).copied()
    }

    pub fn is_available(&self, device: &DeviceId) -> bool {
        !self.unavailable.contains(device)
    }

    /// Clear the unavailable mark and try to acquire again.
    ///
    /// On success the values intended meanwhile are sent, so the device
    /// catches up with what the profile holds.
    pub fn retry(&mut self, device: &DeviceId) -> bool {
        self.unavailable.remove(device);
        if !self.ensure_acquired(device) {
            return false;
        }
        let mut missed: Vec<(InputAddr, EventValue)> = self
            .pending
            .iter()
            .filter(|(addr, _)| &addr.device == device)
            .map(|(addr, value)| (addr.clone(), *value))
            .collect();
        missed.sort_by_key(|(addr, _)| addr.input);
        for (addr, value) in missed {
            self.pending.remove(&addr);
            self.write(&addr, value);
        }
        self.acquired.contains(device)
    }

    /// Return held buttons, keys and hats of a device to rest, then release it
    fn release_device(&mut self, device: &DeviceId) {
        if self.acquired.contains(device) {
            for (addr, rest) in self.pressed.drain_device(device) {
                if let Err(e) = self.sink.write(&addr, rest) {
                    log::debug!("Could not reset {} on release: {}", addr, e);
                }
            }
            self.sink.release(device);
            self.acquired.remove(device);
            log::debug!("Released output device '{}'", device);
        }
        self.values.retain(|addr, _| &addr.device != device);
        self.pending.retain(|addr, _| &addr.device != device);
        self.unavailable.remove(device);
    }

    /// Release everything; nothing is left held or acquired
    pub fn release_all(&mut self) {
        let devices: Vec<DeviceId> = self.kinds.keys().cloned().collect();
        for device in devices {
            self.release_device(&device);
        }
        self.values.clear();
    }

    pub fn acquired_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.acquired.iter()
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        self.release_all();
    }
}
