// Gremlin uinput Output Layer
// Virtual joystick, keyboard and mouse devices backed by evdev uinput

use std::collections::HashMap;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, AbsoluteAxisType, AttributeSet, EventType, InputEvent, Key, RelativeAxisType, UinputAbsSetup};

use super::{OutputError, OutputSink, SinkSpec};
use crate::device::{DeviceId, EventValue, InputAddr, InputKind};

/// Joystick axis value range
pub const AXIS_MIN: i32 = -32767;
pub const AXIS_MAX: i32 = 32767;

/// Absolute axis codes in output order (axis:1 is ABS_X)
const JOYSTICK_AXES: [AbsoluteAxisType; 8] = [
    AbsoluteAxisType::ABS_X,
    AbsoluteAxisType::ABS_Y,
    AbsoluteAxisType::ABS_Z,
    AbsoluteAxisType::ABS_RX,
    AbsoluteAxisType::ABS_RY,
    AbsoluteAxisType::ABS_RZ,
    AbsoluteAxisType::ABS_THROTTLE,
    AbsoluteAxisType::ABS_RUDDER,
];

const MAX_HATS: u16 = 4;

// BTN_JOYSTICK block holds 16 buttons; the rest go to BTN_TRIGGER_HAPPY
const BTN_JOYSTICK: u16 = 0x120;
const BTN_TRIGGER_HAPPY: u16 = 0x2c0;
const MAX_BUTTONS: u16 = 16 + 40;

const BTN_MOUSE: u16 = 0x110;

fn button_code(index: u16) -> Option<u16> {
    match index {
        1..=16 => Some(BTN_JOYSTICK + index - 1),
        17..=MAX_BUTTONS => Some(BTN_TRIGGER_HAPPY + index - 17),
        _ => None,
    }
}

fn hat_codes(index: u16) -> Option<(u16, u16)> {
    if index == 0 || index > MAX_HATS {
        return None;
    }
    let x = AbsoluteAxisType::ABS_HAT0X.0 + 2 * (index - 1);
    Some((x, x + 1))
}

fn axis_to_raw(value: f64) -> i32 {
    ((value.clamp(-1.0, 1.0)) * AXIS_MAX as f64).round() as i32
}

fn syn() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

struct UinputDevice {
    device: VirtualDevice,
    spec: SinkSpec,
}

/// Sink that creates one uinput device per acquired output device
pub struct UinputSink {
    name_prefix: String,
    devices: HashMap<DeviceId, UinputDevice>,
}

impl UinputSink {
    pub fn new(name_prefix: &str) -> Self {
        Self {
            name_prefix: name_prefix.to_string(),
            devices: HashMap::new(),
        }
    }

    fn build(&self, device: &DeviceId, spec: &SinkSpec) -> Result<VirtualDevice, std::io::Error> {
        let name = format!("{} {}", self.name_prefix, device);
        let mut builder = VirtualDeviceBuilder::new()?.name(&name);

        match *spec {
            SinkSpec::Joystick { axes, buttons, hats } => {
                let mut keys = AttributeSet::<Key>::new();
                for index in 1..=buttons.min(MAX_BUTTONS) {
                    if let Some(code) = button_code(index) {
                        keys.insert(Key::new(code));
                    }
                }
                if keys.iter().next().is_some() {
                    builder = builder.with_keys(&keys)?;
                }
                for code in JOYSTICK_AXES.iter().take(axes as usize) {
                    let setup = UinputAbsSetup::new(*code, AbsInfo::new(0, AXIS_MIN, AXIS_MAX, 0, 0, 1));
                    builder = builder.with_absolute_axis(&setup)?;
                }
                for index in 1..=hats.min(MAX_HATS) {
                    if let Some((x, y)) = hat_codes(index) {
                        for code in [x, y] {
                            let setup = UinputAbsSetup::new(AbsoluteAxisType(code), AbsInfo::new(0, -1, 1, 0, 0, 1));
                            builder = builder.with_absolute_axis(&setup)?;
                        }
                    }
                }
            }
            SinkSpec::Keyboard => {
                let mut keys = AttributeSet::<Key>::new();
                for code in 1..256u16 {
                    keys.insert(Key::new(code));
                }
                builder = builder.with_keys(&keys)?;
            }
            SinkSpec::Mouse => {
                let mut keys = AttributeSet::<Key>::new();
                for offset in 0..5 {
                    keys.insert(Key::new(BTN_MOUSE + offset));
                }
                let mut rel = AttributeSet::<RelativeAxisType>::new();
                rel.insert(RelativeAxisType::REL_X);
                rel.insert(RelativeAxisType::REL_Y);
                builder = builder.with_keys(&keys)?.with_relative_axes(&rel)?;
            }
        }
        builder.build()
    }
}

/// Translate one write into evdev events for a device shape
fn encode(spec: &SinkSpec, addr: &InputAddr, value: EventValue) -> Result<Vec<InputEvent>, OutputError> {
    let unsupported = || OutputError::UnsupportedInput(addr.to_string());
    let index = addr.input.index;

    let events = match (spec, addr.input.kind, value) {
        (SinkSpec::Joystick { axes, .. }, InputKind::Axis, EventValue::Axis(v)) => {
            if index == 0 || index > *axes {
                return Err(unsupported());
            }
            let code = JOYSTICK_AXES.get(index as usize - 1).ok_or_else(unsupported)?;
            vec![InputEvent::new(EventType::ABSOLUTE, code.0, axis_to_raw(v))]
        }
        (SinkSpec::Joystick { buttons, .. }, InputKind::Button, EventValue::Button(b)) => {
            if index > *buttons {
                return Err(unsupported());
            }
            let code = button_code(index).ok_or_else(unsupported)?;
            vec![InputEvent::new(EventType::KEY, code, b as i32)]
        }
        (SinkSpec::Joystick { hats, .. }, InputKind::Hat, EventValue::Hat(d)) => {
            if index > *hats {
                return Err(unsupported());
            }
            let (x_code, y_code) = hat_codes(index).ok_or_else(unsupported)?;
            let (x, y) = d.components();
            vec![
                InputEvent::new(EventType::ABSOLUTE, x_code, x),
                InputEvent::new(EventType::ABSOLUTE, y_code, y),
            ]
        }
        (SinkSpec::Keyboard, InputKind::Button, EventValue::Button(b)) => {
            if index == 0 || index > 255 {
                return Err(unsupported());
            }
            vec![InputEvent::new(EventType::KEY, index, b as i32)]
        }
        (SinkSpec::Mouse, InputKind::Button, EventValue::Button(b)) => {
            if !(1..=5).contains(&index) {
                return Err(unsupported());
            }
            vec![InputEvent::new(EventType::KEY, BTN_MOUSE + index - 1, b as i32)]
        }
        (SinkSpec::Mouse, InputKind::Axis, EventValue::Axis(delta)) => {
            let code = match index {
                1 => RelativeAxisType::REL_X,
                2 => RelativeAxisType::REL_Y,
                _ => return Err(unsupported()),
            };
            vec![InputEvent::new(EventType::RELATIVE, code.0, delta.round() as i32)]
        }
        _ => return Err(unsupported()),
    };
    Ok(events)
}

impl OutputSink for UinputSink {
    fn acquire(&mut self, device: &DeviceId, spec: &SinkSpec) -> Result<(), OutputError> {
        if self.devices.contains_key(device) {
            return Ok(());
        }
        let built = self.build(device, spec).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound => {
                OutputError::DeviceUnavailable(format!("{}: {}", device, e))
            }
            _ => OutputError::DeviceCreation(e.to_string()),
        })?;
        log::info!("Created virtual device '{} {}'", self.name_prefix, device);
        self.devices.insert(
            device.clone(),
            UinputDevice {
                device: built,
                spec: *spec,
            },
        );
        Ok(())
    }

    fn write(&mut self, addr: &InputAddr, value: EventValue) -> Result<(), OutputError> {
        let target = self
            .devices
            .get_mut(&addr.device)
            .ok_or_else(|| OutputError::NotAcquired(addr.device.to_string()))?;
        let mut events = encode(&target.spec, addr, value)?;
        // SYN event is required for the kernel to process the batch
        events.push(syn());
        target
            .device
            .emit(&events)
            .map_err(|e| OutputError::WriteError(e.to_string()))
    }

    fn release(&mut self, device: &DeviceId) {
        if self.devices.remove(device).is_some() {
            log::debug!("Destroyed virtual device for '{}'", device);
        }
    }
}
