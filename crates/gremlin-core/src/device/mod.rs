// Gremlin Device Abstraction
// Uniform addressing of physical, intermediate and virtual devices

pub mod filter;
pub mod queue;
pub mod state;

#[cfg(feature = "pure-rust")]
pub mod poller;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use strum_macros::{Display, EnumString, IntoStaticStr};

pub use filter::DeviceMatcher;
pub use queue::{EventQueue, QueuedEvent};
pub use state::InputStates;

/// Built-in keyboard sink. Button index is the Linux key code.
pub const KEYBOARD_DEVICE: &str = "keyboard";

/// Built-in mouse sink. Buttons 1..=5, axes 1/2 are relative x/y motion.
pub const MOUSE_DEVICE: &str = "mouse";

/// Errors raised by the device layer
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event device error: {0}")]
    Evdev(String),

    #[error("Invalid input address: {0}")]
    InvalidAddress(String),
}

/// Profile-level identifier of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn keyboard() -> Self {
        Self::new(KEYBOARD_DEVICE)
    }

    pub fn mouse() -> Self {
        Self::new(MOUSE_DEVICE)
    }

    /// True for the implicit keyboard and mouse sinks
    pub fn is_builtin(&self) -> bool {
        self.0 == KEYBOARD_DEVICE || self.0 == MOUSE_DEVICE
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Role a device plays in the routing graph
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Read-only source
    Physical,
    /// Read-write, internal to the engine
    Intermediate,
    /// Write-only sink exposed to the OS
    Virtual,
}

impl DeviceKind {
    pub fn is_readable(self) -> bool {
        matches!(self, DeviceKind::Physical | DeviceKind::Intermediate)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, DeviceKind::Intermediate | DeviceKind::Virtual)
    }
}

/// Input class shared by every device kind
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Axis,
    Button,
    Hat,
}

/// An input on a device, e.g. `axis:1` or `button:12`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputRef {
    pub kind: InputKind,
    pub index: u16,
}

impl InputRef {
    pub const fn new(kind: InputKind, index: u16) -> Self {
        Self { kind, index }
    }

    pub const fn axis(index: u16) -> Self {
        Self::new(InputKind::Axis, index)
    }

    pub const fn button(index: u16) -> Self {
        Self::new(InputKind::Button, index)
    }

    pub const fn hat(index: u16) -> Self {
        Self::new(InputKind::Hat, index)
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

impl FromStr for InputRef {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, index) = s
            .split_once(':')
            .ok_or_else(|| DeviceError::InvalidAddress(s.to_string()))?;
        let kind = InputKind::from_str(kind.trim())
            .map_err(|_| DeviceError::InvalidAddress(s.to_string()))?;
        let index = index
            .trim()
            .parse::<u16>()
            .map_err(|_| DeviceError::InvalidAddress(s.to_string()))?;
        Ok(Self { kind, index })
    }
}

impl TryFrom<String> for InputRef {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InputRef> for String {
    fn from(value: InputRef) -> Self {
        value.to_string()
    }
}

/// Fully qualified input: device plus input
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputAddr {
    pub device: DeviceId,
    pub input: InputRef,
}

impl InputAddr {
    pub fn new(device: impl Into<DeviceId>, input: InputRef) -> Self {
        Self {
            device: device.into(),
            input,
        }
    }
}

impl fmt::Display for InputAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.input)
    }
}

impl FromStr for InputAddr {
    type Err = DeviceError;

    /// Parses `device.kind:index`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device, input) = s
            .rsplit_once('.')
            .ok_or_else(|| DeviceError::InvalidAddress(s.to_string()))?;
        if device.is_empty() {
            return Err(DeviceError::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(device, input.parse()?))
    }
}

/// Hat switch position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum HatDirection {
    #[default]
    Center,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl HatDirection {
    pub fn is_centered(self) -> bool {
        self == HatDirection::Center
    }

    /// Build a direction from evdev style x/y components (-1, 0, 1; y down)
    pub fn from_components(x: i32, y: i32) -> Self {
        match (x.signum(), y.signum()) {
            (0, -1) => HatDirection::North,
            (1, -1) => HatDirection::NorthEast,
            (1, 0) => HatDirection::East,
            (1, 1) => HatDirection::SouthEast,
            (0, 1) => HatDirection::South,
            (-1, 1) => HatDirection::SouthWest,
            (-1, 0) => HatDirection::West,
            (-1, -1) => HatDirection::NorthWest,
            _ => HatDirection::Center,
        }
    }

    /// Inverse of `from_components`
    pub fn components(self) -> (i32, i32) {
        match self {
            HatDirection::Center => (0, 0),
            HatDirection::North => (0, -1),
            HatDirection::NorthEast => (1, -1),
            HatDirection::East => (1, 0),
            HatDirection::SouthEast => (1, 1),
            HatDirection::South => (0, 1),
            HatDirection::SouthWest => (-1, 1),
            HatDirection::West => (-1, 0),
            HatDirection::NorthWest => (-1, -1),
        }
    }

    /// A diagonal contains both of its cardinal directions
    pub fn contains(self, other: HatDirection) -> bool {
        if self == other {
            return true;
        }
        if other.is_centered() {
            return false;
        }
        let (sx, sy) = self.components();
        let (ox, oy) = other.components();
        (ox == 0 || ox == sx) && (oy == 0 || oy == sy)
    }
}

/// Normalized sample value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Button(bool),
    Axis(f64),
    Hat(HatDirection),
}

impl EventValue {
    pub fn kind(&self) -> InputKind {
        match self {
            EventValue::Axis(_) => InputKind::Axis,
            EventValue::Button(_) => InputKind::Button,
            EventValue::Hat(_) => InputKind::Hat,
        }
    }

    /// Button-like reading: buttons as-is, hats when off-center, axes never
    pub fn is_pressed(&self) -> bool {
        match self {
            EventValue::Button(pressed) => *pressed,
            EventValue::Hat(direction) => !direction.is_centered(),
            EventValue::Axis(_) => false,
        }
    }

    pub fn as_axis(&self) -> Option<f64> {
        match self {
            EventValue::Axis(v) => Some(*v),
            _ => None,
        }
    }

    /// Neutral value of a given input kind
    pub fn rest(kind: InputKind) -> Self {
        match kind {
            InputKind::Axis => EventValue::Axis(0.0),
            InputKind::Button => EventValue::Button(false),
            InputKind::Hat => EventValue::Hat(HatDirection::Center),
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Axis(v) => write!(f, "{:.4}", v),
            EventValue::Button(b) => write!(f, "{}", if *b { "pressed" } else { "released" }),
            EventValue::Hat(d) => write!(f, "{}", d),
        }
    }
}

/// One normalized device sample
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub device: DeviceId,
    pub input: InputRef,
    pub value: EventValue,
    pub timestamp: Instant,
}

impl InputEvent {
    pub fn new(device: impl Into<DeviceId>, input: InputRef, value: EventValue, timestamp: Instant) -> Self {
        Self {
            device: device.into(),
            input,
            value,
            timestamp,
        }
    }

    pub fn addr(&self) -> InputAddr {
        InputAddr::new(self.device.clone(), self.input)
    }
}

/// Scale a raw absolute reading into [-1, 1]
pub fn normalize_axis(raw: i32, minimum: i32, maximum: i32) -> f64 {
    if maximum <= minimum {
        return 0.0;
    }
    let span = (maximum - minimum) as f64;
    let v = 2.0 * (raw - minimum) as f64 / span - 1.0;
    v.clamp(-1.0, 1.0)
}
