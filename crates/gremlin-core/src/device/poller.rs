// Gremlin Device Poller
// One reader thread per declared physical device, feeding normalized samples to the engine queue

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use evdev::{AbsoluteAxisType, Device, InputEventKind};

use super::filter::is_virtual_device;
use super::{
    normalize_axis, DeviceError, DeviceId, DeviceMatcher, EventQueue, EventValue, HatDirection, InputEvent, InputRef,
    QueuedEvent,
};

/// Delay between attempts to reopen a lost device
const REOPEN_INTERVAL: Duration = Duration::from_secs(1);

const ABS_HAT0X: u16 = 0x10;
const ABS_HAT3Y: u16 = 0x17;
/// First key code that is not a keyboard key (BTN_MISC)
const BTN_MISC: u16 = 0x100;

/// Device information for listing devices
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub path: String,
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
}

/// Every readable event device except our own virtual outputs
pub fn list_devices(virtual_prefix: &str) -> Vec<DeviceInfo> {
    let mut infos: Vec<DeviceInfo> = evdev::enumerate()
        .filter_map(|(path, device)| {
            let name = device.name().unwrap_or("Unknown").to_string();
            if is_virtual_device(&name, virtual_prefix) {
                return None;
            }
            let layout = InputLayout::of(&device);
            Some(DeviceInfo {
                name,
                path: path.to_string_lossy().into_owned(),
                axes: layout.axes.len(),
                buttons: layout.buttons.len(),
                hats: layout.hats.len(),
            })
        })
        .collect();
    infos.sort_by(|a, b| a.path.cmp(&b.path));
    infos
}

/// Mapping from evdev codes to profile input indices.
///
/// Axes and hats are numbered from 1 in code order. Keyboards keep their
/// key code as button index; other devices number buttons from 1.
#[derive(Debug, Clone, Default)]
struct InputLayout {
    axes: BTreeMap<u16, (u16, i32, i32)>,
    buttons: BTreeMap<u16, u16>,
    hats: BTreeMap<u16, u16>,
}

impl InputLayout {
    fn of(device: &Device) -> Self {
        let mut layout = InputLayout::default();

        if let Some(keys) = device.supported_keys() {
            let codes: Vec<u16> = keys.iter().map(|k| k.code()).collect();
            let keyboard = codes.iter().any(|c| *c < BTN_MISC);
            for (i, code) in codes.iter().enumerate() {
                let index = if keyboard { *code } else { i as u16 + 1 };
                layout.buttons.insert(*code, index);
            }
        }

        if let Some(axes) = device.supported_absolute_axes() {
            let ranges = device.get_abs_state().ok();
            let mut next_axis = 1;
            let mut next_hat = 1;
            for axis in axes.iter() {
                let code = axis.0;
                if (ABS_HAT0X..=ABS_HAT3Y).contains(&code) {
                    let hat = (code - ABS_HAT0X) / 2;
                    if !layout.hats.contains_key(&hat) {
                        layout.hats.insert(hat, next_hat);
                        next_hat += 1;
                    }
                    continue;
                }
                let (min, max) = ranges
                    .as_ref()
                    .and_then(|r| r.get(code as usize))
                    .map(|info| (info.minimum, info.maximum))
                    .unwrap_or((-32768, 32767));
                layout.axes.insert(code, (next_axis, min, max));
                next_axis += 1;
            }
        }
        layout
    }
}

/// Turns raw evdev events of one device into profile samples
#[derive(Debug, Default)]
struct Translator {
    layout: InputLayout,
    /// Last x/y component per hat
    hat_state: BTreeMap<u16, (i32, i32)>,
}

impl Translator {
    fn new(layout: InputLayout) -> Self {
        Self {
            layout,
            hat_state: BTreeMap::new(),
        }
    }

    fn translate(&mut self, event: &evdev::InputEvent) -> Option<(InputRef, EventValue)> {
        match event.kind() {
            InputEventKind::Key(key) => {
                // 2 is autorepeat
                if event.value() == 2 {
                    return None;
                }
                let index = *self.layout.buttons.get(&key.code())?;
                Some((InputRef::button(index), EventValue::Button(event.value() != 0)))
            }
            InputEventKind::AbsAxis(AbsoluteAxisType(code)) if (ABS_HAT0X..=ABS_HAT3Y).contains(&code) => {
                let hat = (code - ABS_HAT0X) / 2;
                let index = *self.layout.hats.get(&hat)?;
                let state = self.hat_state.entry(hat).or_insert((0, 0));
                if (code - ABS_HAT0X) % 2 == 0 {
                    state.0 = event.value().signum();
                } else {
                    state.1 = event.value().signum();
                }
                let direction = HatDirection::from_components(state.0, state.1);
                Some((InputRef::hat(index), EventValue::Hat(direction)))
            }
            InputEventKind::AbsAxis(AbsoluteAxisType(code)) => {
                let (index, min, max) = *self.layout.axes.get(&code)?;
                Some((InputRef::axis(index), EventValue::Axis(normalize_axis(event.value(), min, max))))
            }
            _ => None,
        }
    }
}

fn open_matching(matcher: &DeviceMatcher, virtual_prefix: &str) -> Option<(String, Device)> {
    evdev::enumerate().find_map(|(path, device)| {
        let name = device.name().unwrap_or("Unknown").to_string();
        let path = path.to_string_lossy().into_owned();
        if is_virtual_device(&name, virtual_prefix) || !matcher.matches(&name, &path) {
            return None;
        }
        Some((format!("{} ({})", name, path), device))
    })
}

/// Reader threads for every declared physical device.
///
/// Threads never touch engine state: they only push onto the queue. A
/// device that fails to read is reported unavailable and reopened later.
pub struct JoystickPoller {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl JoystickPoller {
    pub fn spawn(
        devices: Vec<(DeviceId, DeviceMatcher)>,
        queue: EventQueue,
        grab: bool,
        virtual_prefix: &str,
    ) -> Result<Self, DeviceError> {
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::new();
        for (id, matcher) in devices {
            let reader = Reader {
                id: id.clone(),
                matcher,
                queue: queue.clone(),
                grab,
                virtual_prefix: virtual_prefix.to_string(),
                running: Arc::clone(&running),
            };
            let handle = thread::Builder::new()
                .name(format!("gremlin-{}", id))
                .spawn(move || reader.run())?;
            handles.push(handle);
        }
        log::info!("Polling {} physical device(s)", handles.len());
        Ok(Self { running, handles })
    }

    pub fn device_count(&self) -> usize {
        self.handles.len()
    }

    /// Ask every reader to stop after its next wake-up
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for JoystickPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Reader {
    id: DeviceId,
    matcher: DeviceMatcher,
    queue: EventQueue,
    grab: bool,
    virtual_prefix: String,
    running: Arc<AtomicBool>,
}

impl Reader {
    fn run(self) {
        let mut reported_missing = false;
        let mut lost = false;
        while self.running.load(Ordering::SeqCst) {
            let Some((label, mut device)) = open_matching(&self.matcher, &self.virtual_prefix) else {
                if !reported_missing {
                    log::warn!("Device '{}' not found, retrying", self.id);
                    self.report(false);
                    reported_missing = true;
                }
                thread::sleep(REOPEN_INTERVAL);
                continue;
            };
            if self.grab {
                // A previous instance may have died holding the grab
                let _ = device.ungrab();
                if let Err(e) = device.grab() {
                    log::warn!("Could not grab '{}': {}", label, e);
                }
            }
            log::info!("Device '{}' bound to {}", self.id, label);
            if reported_missing || lost {
                self.report(true);
            }
            reported_missing = false;

            let mut translator = Translator::new(InputLayout::of(&device));
            lost = !self.read(&mut device, &mut translator);
            if self.grab {
                let _ = device.ungrab();
            }
            if lost {
                self.report(false);
                thread::sleep(REOPEN_INTERVAL);
            }
        }
    }

    /// Read until stopped (true) or the device fails (false)
    fn read(&self, device: &mut Device, translator: &mut Translator) -> bool {
        while self.running.load(Ordering::SeqCst) {
            let events = match device.fetch_events() {
                Ok(events) => events,
                Err(e) => {
                    log::warn!("Read from '{}' failed: {}", self.id, e);
                    return false;
                }
            };
            let now = Instant::now();
            for event in events {
                if let Some((input, value)) = translator.translate(&event) {
                    self.queue
                        .push_input(InputEvent::new(self.id.clone(), input, value, now));
                }
            }
        }
        true
    }

    fn report(&self, available: bool) {
        self.queue.push(QueuedEvent::DeviceStatus {
            device: self.id.clone(),
            available,
        });
    }
}
