// Gremlin Scripting Boundary
// Typed variable slots and activation callbacks offered to an embedded script host

use indexmap::IndexMap;
use std::fmt;

use crate::device::{DeviceKind, EventValue, InputAddr, InputEvent, InputKind};
use crate::key::Key;
use crate::profile::{ModeTree, Profile, Scalar};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Variable '{name}' expects a {expected} value")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Variable '{name}' value {value} outside [{min}, {max}]")]
    OutOfRange { name: String, value: String, min: String, max: String },

    #[error("Variable '{name}' has no option '{value}'")]
    InvalidOption { name: String, value: String },

    #[error("Variable '{name}' does not accept {input}")]
    InvalidInputKind { name: String, input: String },

    #[error("Variable '{0}' is already registered")]
    Duplicate(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),
}

/// Declared type of a script variable
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    Bool,
    Float { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    /// A key combination
    Keyboard,
    Mode,
    Selection { options: Vec<String> },
    String,
    PhysicalInput { kinds: Vec<InputKind> },
    VirtualInput { kinds: Vec<InputKind> },
}

impl VariableKind {
    fn value_name(&self) -> &'static str {
        match self {
            VariableKind::Bool => "bool",
            VariableKind::Float { .. } => "float",
            VariableKind::Integer { .. } => "integer",
            VariableKind::Keyboard => "keyboard",
            VariableKind::Mode => "mode",
            VariableKind::Selection { .. } => "selection",
            VariableKind::String => "string",
            VariableKind::PhysicalInput { .. } | VariableKind::VirtualInput { .. } => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Bool(bool),
    Float(f64),
    Integer(i64),
    Keys(Vec<Key>),
    Text(String),
    Input(InputAddr),
}

impl VariableValue {
    /// View used by condition expressions
    pub fn to_scalar(&self) -> Scalar {
        match self {
            VariableValue::Bool(b) => Scalar::Bool(*b),
            VariableValue::Float(v) => Scalar::Number(*v),
            VariableValue::Integer(v) => Scalar::Number(*v as f64),
            VariableValue::Text(s) => Scalar::Text(s.clone()),
            VariableValue::Keys(_) | VariableValue::Input(_) => Scalar::Text(self.to_string()),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Bool(b) => write!(f, "{}", b),
            VariableValue::Float(v) => write!(f, "{}", v),
            VariableValue::Integer(v) => write!(f, "{}", v),
            VariableValue::Keys(keys) => {
                let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                f.write_str(&names.join("+"))
            }
            VariableValue::Text(s) => f.write_str(s),
            VariableValue::Input(addr) => write!(f, "{}", addr),
        }
    }
}

#[derive(Debug, Clone)]
struct Variable {
    kind: VariableKind,
    value: VariableValue,
}

/// Check a value against a kind, without profile context
fn check_value(name: &str, kind: &VariableKind, value: &VariableValue) -> Result<(), ScriptError> {
    let mismatch = || ScriptError::TypeMismatch {
        name: name.to_string(),
        expected: kind.value_name(),
    };
    match (kind, value) {
        (VariableKind::Bool, VariableValue::Bool(_)) => Ok(()),
        (VariableKind::Float { min, max }, VariableValue::Float(v)) => {
            if v.is_finite() && v >= min && v <= max {
                Ok(())
            } else {
                Err(ScriptError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                })
            }
        }
        (VariableKind::Integer { min, max }, VariableValue::Integer(v)) => {
            if v >= min && v <= max {
                Ok(())
            } else {
                Err(ScriptError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                })
            }
        }
        (VariableKind::Keyboard, VariableValue::Keys(_)) => Ok(()),
        (VariableKind::Mode, VariableValue::Text(_)) => Ok(()),
        (VariableKind::String, VariableValue::Text(_)) => Ok(()),
        (VariableKind::Selection { options }, VariableValue::Text(s)) => {
            if options.contains(s) {
                Ok(())
            } else {
                Err(ScriptError::InvalidOption {
                    name: name.to_string(),
                    value: s.clone(),
                })
            }
        }
        (VariableKind::PhysicalInput { kinds }, VariableValue::Input(addr))
        | (VariableKind::VirtualInput { kinds }, VariableValue::Input(addr)) => {
            if kinds.contains(&addr.input.kind) {
                Ok(())
            } else {
                Err(ScriptError::InvalidInputKind {
                    name: name.to_string(),
                    input: addr.to_string(),
                })
            }
        }
        _ => Err(mismatch()),
    }
}

/// Checks that need the active profile: mode names and device roles
fn check_against_profile(
    name: &str,
    kind: &VariableKind,
    value: &VariableValue,
    profile: &Profile,
) -> Result<(), ScriptError> {
    match (kind, value) {
        (VariableKind::Mode, VariableValue::Text(mode)) => {
            if profile.modes().contains(mode) {
                Ok(())
            } else {
                Err(ScriptError::UnknownMode(mode.clone()))
            }
        }
        (VariableKind::PhysicalInput { .. }, VariableValue::Input(addr)) => {
            match profile.device_kind(&addr.device) {
                Some(DeviceKind::Physical) => Ok(()),
                _ => Err(ScriptError::InvalidInputKind {
                    name: name.to_string(),
                    input: addr.to_string(),
                }),
            }
        }
        (VariableKind::VirtualInput { .. }, VariableValue::Input(addr)) => {
            match profile.device_kind(&addr.device) {
                Some(k) if k.is_writable() => Ok(()),
                _ => Err(ScriptError::InvalidInputKind {
                    name: name.to_string(),
                    input: addr.to_string(),
                }),
            }
        }
        _ => Ok(()),
    }
}

/// Typed variables a script host declares
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    vars: IndexMap<String, Variable>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable with its default value
    pub fn register(&mut self, name: &str, kind: VariableKind, default: VariableValue) -> Result<(), ScriptError> {
        if self.vars.contains_key(name) {
            return Err(ScriptError::Duplicate(name.to_string()));
        }
        check_value(name, &kind, &default)?;
        log::debug!("Registered script variable '{}' ({})", name, kind.value_name());
        self.vars.insert(name.to_string(), Variable { kind, value: default });
        Ok(())
    }

    /// Assign a value; with a profile, mode names and device roles are checked too
    pub fn set(&mut self, name: &str, value: VariableValue, profile: Option<&Profile>) -> Result<(), ScriptError> {
        let var = self
            .vars
            .get_mut(name)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))?;
        check_value(name, &var.kind, &value)?;
        if let Some(profile) = profile {
            check_against_profile(name, &var.kind, &value, profile)?;
        }
        var.value = value;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.vars.get(name).map(|v| &v.value)
    }

    pub fn kind(&self, name: &str) -> Option<&VariableKind> {
        self.vars.get(name).map(|v| &v.kind)
    }

    pub fn scalar(&self, name: &str) -> Option<Scalar> {
        self.get(name).map(VariableValue::to_scalar)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Requests a callback makes of the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutput {
    writes: Vec<(InputAddr, EventValue)>,
    mode: Option<String>,
}

impl ScriptOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output write; applied after the action walk of the event
    pub fn write(&mut self, addr: InputAddr, value: EventValue) {
        self.writes.push((addr, value));
    }

    /// Request a mode switch; the last request wins
    pub fn switch_mode(&mut self, mode: &str) {
        self.mode = Some(mode.to_string());
    }

    pub fn writes(&self) -> &[(InputAddr, EventValue)] {
        &self.writes
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.mode.is_none()
    }

    fn merge(&mut self, other: ScriptOutput) {
        self.writes.extend(other.writes);
        if other.mode.is_some() {
            self.mode = other.mode;
        }
    }
}

pub type ActivationCallback = Box<dyn FnMut(&InputEvent, &mut ScriptOutput) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Which events of a watched input reach a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackTrigger {
    /// Button presses, off-center hat positions and axis motion
    Activation,
    /// Every new value, releases included
    Change,
}

impl CallbackTrigger {
    fn accepts(self, value: &EventValue) -> bool {
        match self {
            CallbackTrigger::Activation => value.is_pressed() || value.kind() == InputKind::Axis,
            CallbackTrigger::Change => true,
        }
    }
}

struct Registration {
    id: CallbackId,
    addr: InputAddr,
    mode: Option<String>,
    trigger: CallbackTrigger,
    callback: ActivationCallback,
}

/// Callbacks fired when a watched input produces an event.
///
/// A callback registered for a mode also fires in modes that inherit from it.
/// `on_activation` callbacks skip releases; `on_change` ones see every value.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: u64,
    entries: Vec<Registration>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.entries.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_activation(&mut self, addr: InputAddr, mode: Option<&str>, callback: ActivationCallback) -> CallbackId {
        self.register(addr, mode, CallbackTrigger::Activation, callback)
    }

    pub fn on_change(&mut self, addr: InputAddr, mode: Option<&str>, callback: ActivationCallback) -> CallbackId {
        self.register(addr, mode, CallbackTrigger::Change, callback)
    }

    pub fn register(
        &mut self,
        addr: InputAddr,
        mode: Option<&str>,
        trigger: CallbackTrigger,
        callback: ActivationCallback,
    ) -> CallbackId {
        self.next_id += 1;
        let id = CallbackId(self.next_id);
        self.entries.push(Registration {
            id,
            addr,
            mode: mode.map(str::to_string),
            trigger,
            callback,
        });
        id
    }

    pub fn unregister(&mut self, id: CallbackId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        self.entries.len() != before
    }

    /// Run every callback watching the event's input in the current mode
    pub fn fire(&mut self, event: &InputEvent, current_mode: &str, modes: &ModeTree) -> ScriptOutput {
        let mut output = ScriptOutput::new();
        let addr = event.addr();
        for entry in self.entries.iter_mut() {
            if entry.addr != addr || !entry.trigger.accepts(&event.value) {
                continue;
            }
            let in_mode = entry
                .mode
                .as_deref()
                .map_or(true, |m| modes.inherits_from(current_mode, m));
            if !in_mode {
                continue;
            }
            let mut local = ScriptOutput::new();
            (entry.callback)(event, &mut local);
            output.merge(local);
        }
        output
    }

    pub fn watches(&self, addr: &InputAddr) -> bool {
        self.entries.iter().any(|r| &r.addr == addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
