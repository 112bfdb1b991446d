// Gremlin Profile Model
// Library, modes, bindings and device declarations; pure data plus integrity checks

pub mod action;
pub mod binding;
pub mod condition;
pub mod library;
pub mod mode;
pub mod persist;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use action::{
    ActionId, ActionNode, AxisMode, ChainConfig, ChainTimeout, ChangeModeConfig, ConditionConfig,
    DoubleTapConfig, LongActivation, MacroConfig, MacroEvent, MacroPolicy, MapToKeyboardConfig,
    MapToOutputConfig, MergeAxisConfig, MergeOperator, ReferenceConfig, ResponseCurveConfig,
    RootConfig, Slot, SplitAxisConfig, TapMode, TempoConfig,
};
pub use binding::{BindingKey, Bindings};
pub use condition::{ConditionError, ConditionScope, Expression, Scalar};
pub use library::Library;
pub use mode::{Mode, ModeTree};

use crate::device::{DeviceId, DeviceKind, DeviceMatcher, InputAddr, InputKind, InputRef};

/// Longest accepted tempo, double-tap or chain window (milliseconds)
pub const MAX_WINDOW_MS: u64 = 10_000;

/// Profile integrity errors; a profile with any of these is never activated
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Missing action: {0}")]
    MissingAction(String),

    #[error("Missing mode: {0}")]
    MissingMode(String),

    #[error("Cyclic mode inheritance involving '{0}'")]
    CyclicModes(String),

    #[error("Action '{0}' is reachable from itself")]
    CyclicActions(String),

    #[error("Action '{action}' is misconfigured: {reason}")]
    InvalidConfig { action: String, reason: String },

    #[error("Binding root '{0}' is not a root action")]
    NotARoot(String),

    #[error("Duplicate binding: {0}")]
    DuplicateBinding(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device '{device}' is misconfigured: {reason}")]
    InvalidDevice { device: String, reason: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Declared device and its role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceDecl {
    Physical {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Intermediate,
    Virtual {
        #[serde(default)]
        axes: u16,
        #[serde(default)]
        buttons: u16,
        #[serde(default)]
        hats: u16,
    },
}

impl DeviceDecl {
    pub fn physical_named(name: &str) -> Self {
        DeviceDecl::Physical {
            name: Some(name.to_string()),
            path: None,
            pattern: None,
        }
    }

    pub fn virtual_joystick(axes: u16, buttons: u16, hats: u16) -> Self {
        DeviceDecl::Virtual { axes, buttons, hats }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceDecl::Physical { .. } => DeviceKind::Physical,
            DeviceDecl::Intermediate => DeviceKind::Intermediate,
            DeviceDecl::Virtual { .. } => DeviceKind::Virtual,
        }
    }

    /// Number of inputs of a kind on a virtual device; unbounded otherwise
    pub fn capacity(&self, kind: InputKind) -> Option<u16> {
        match self {
            DeviceDecl::Virtual { axes, buttons, hats } => Some(match kind {
                InputKind::Axis => *axes,
                InputKind::Button => *buttons,
                InputKind::Hat => *hats,
            }),
            _ => None,
        }
    }

    /// Matcher for a physical device
    pub fn matcher(&self) -> Option<Result<DeviceMatcher, regex::Error>> {
        match self {
            DeviceDecl::Physical { name, path, pattern } => Some(DeviceMatcher::new(
                name.as_deref(),
                path.as_deref(),
                pattern.as_deref(),
            )),
            _ => None,
        }
    }
}

/// Edit notification used for targeted invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChange {
    ActionChanged(ActionId),
    ActionRemoved(ActionId),
    BindingChanged(BindingKey),
    ModesChanged,
    DevicesChanged,
}

/// Top-level container
#[derive(Debug, Clone)]
pub struct Profile {
    library: Library,
    modes: ModeTree,
    bindings: Bindings,
    devices: IndexMap<DeviceId, DeviceDecl>,
    start_mode: String,
    changes: Vec<ProfileChange>,
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.library == other.library
            && self.modes == other.modes
            && self.bindings == other.bindings
            && self.devices == other.devices
            && self.start_mode == other.start_mode
    }
}

impl Profile {
    /// Empty profile with a single parentless start mode
    pub fn new(start_mode: &str) -> Self {
        let mut modes = ModeTree::new();
        modes.add(start_mode, None);
        Self {
            library: Library::new(),
            modes,
            bindings: Bindings::new(),
            devices: IndexMap::new(),
            start_mode: start_mode.to_string(),
            changes: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        library: Library,
        modes: ModeTree,
        bindings: Bindings,
        devices: IndexMap<DeviceId, DeviceDecl>,
        start_mode: String,
    ) -> Self {
        Self {
            library,
            modes,
            bindings,
            devices,
            start_mode,
            changes: Vec::new(),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn modes(&self) -> &ModeTree {
        &self.modes
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn devices(&self) -> &IndexMap<DeviceId, DeviceDecl> {
        &self.devices
    }

    pub fn start_mode(&self) -> &str {
        &self.start_mode
    }

    pub fn action(&self, id: &ActionId) -> Option<&ActionNode> {
        self.library.get(id)
    }

    /// Roots bound to an input in exactly `mode`, without inheritance
    pub fn bindings_for(&self, device: &DeviceId, input: InputRef, mode: &str) -> &[ActionId] {
        self.bindings.roots(device, input, mode)
    }

    /// Kind of a declared or built-in device
    pub fn device_kind(&self, device: &DeviceId) -> Option<DeviceKind> {
        if device.is_builtin() {
            return Some(DeviceKind::Virtual);
        }
        self.devices.get(device).map(DeviceDecl::kind)
    }

    // ---- editing -------------------------------------------------------

    pub fn set_action(&mut self, id: impl Into<ActionId>, node: ActionNode) {
        let id = id.into();
        self.library.insert(id.clone(), node);
        self.changes.push(ProfileChange::ActionChanged(id));
    }

    pub fn remove_action(&mut self, id: &ActionId) -> Option<ActionNode> {
        let removed = self.library.remove(id);
        if removed.is_some() {
            self.changes.push(ProfileChange::ActionRemoved(id.clone()));
        }
        removed
    }

    /// Deep-copy an action subtree; returns the new root id
    pub fn duplicate_action(&mut self, id: &ActionId) -> Result<ActionId, ProfileError> {
        let before: HashSet<ActionId> = self.library.ids().cloned().collect();
        let copy = self.library.duplicate(id)?;
        let added: Vec<ActionId> = self
            .library
            .ids()
            .filter(|i| !before.contains(*i))
            .cloned()
            .collect();
        self.changes
            .extend(added.into_iter().map(ProfileChange::ActionChanged));
        Ok(copy)
    }

    /// Replace the roots bound to (device, input, mode)
    pub fn bind(&mut self, key: BindingKey, roots: Vec<ActionId>) {
        self.bindings.set(key.clone(), roots);
        self.changes.push(ProfileChange::BindingChanged(key));
    }

    /// Append one root to a binding
    pub fn add_binding(&mut self, key: BindingKey, root: impl Into<ActionId>) {
        self.bindings.push(key.clone(), root.into());
        self.changes.push(ProfileChange::BindingChanged(key));
    }

    pub fn unbind(&mut self, key: &BindingKey) {
        if self.bindings.remove(key).is_some() {
            self.changes.push(ProfileChange::BindingChanged(key.clone()));
        }
    }

    pub fn add_mode(&mut self, name: &str, parent: Option<&str>) {
        self.modes.add(name, parent);
        self.changes.push(ProfileChange::ModesChanged);
    }

    pub fn remove_mode(&mut self, name: &str) {
        if self.modes.remove(name) {
            self.changes.push(ProfileChange::ModesChanged);
        }
    }

    pub fn set_start_mode(&mut self, name: &str) {
        self.start_mode = name.to_string();
        self.changes.push(ProfileChange::ModesChanged);
    }

    pub fn add_device(&mut self, id: impl Into<DeviceId>, decl: DeviceDecl) {
        self.devices.insert(id.into(), decl);
        self.changes.push(ProfileChange::DevicesChanged);
    }

    /// Drain recorded edit notifications
    pub fn take_changes(&mut self) -> Vec<ProfileChange> {
        std::mem::take(&mut self.changes)
    }

    // ---- integrity -----------------------------------------------------

    /// Check every integrity rule; the first violation is returned
    pub fn validate(&self) -> Result<(), ProfileError> {
        if !self.modes.contains(&self.start_mode) {
            return Err(ProfileError::MissingMode(self.start_mode.clone()));
        }
        self.modes.validate()?;
        self.validate_devices()?;

        for (id, node) in self.library.iter() {
            for child in node.children() {
                if !self.library.contains(child) {
                    return Err(ProfileError::MissingAction(format!("{} (referenced by {})", child, id)));
                }
            }
        }
        self.library.check_acyclic()?;

        for (id, node) in self.library.iter() {
            self.validate_action(id, node)?;
        }

        for (key, roots) in self.bindings.iter() {
            if !self.modes.contains(&key.mode) {
                return Err(ProfileError::MissingMode(key.mode.clone()));
            }
            self.expect_readable(&key.device, &key.device.to_string())?;
            for root in roots {
                match self.library.resolve(root) {
                    None => return Err(ProfileError::MissingAction(root.to_string())),
                    Some((_, node)) if !node.is_root() => {
                        return Err(ProfileError::NotARoot(root.to_string()));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn validate_devices(&self) -> Result<(), ProfileError> {
        for (id, decl) in &self.devices {
            let invalid = |reason: &str| ProfileError::InvalidDevice {
                device: id.to_string(),
                reason: reason.to_string(),
            };
            if id.is_builtin() {
                return Err(invalid("name is reserved for a built-in device"));
            }
            if let DeviceDecl::Physical { name, path, pattern } = decl {
                if name.is_none() && path.is_none() && pattern.is_none() {
                    return Err(invalid("physical device needs a name, path or pattern"));
                }
            }
            if let Some(Err(e)) = decl.matcher() {
                return Err(invalid(&format!("bad pattern: {}", e)));
            }
        }
        Ok(())
    }

    fn expect_readable(&self, device: &DeviceId, what: &str) -> Result<(), ProfileError> {
        match self.device_kind(device) {
            None => Err(ProfileError::UnknownDevice(device.to_string())),
            Some(kind) if !kind.is_readable() => Err(ProfileError::InvalidDevice {
                device: device.to_string(),
                reason: format!("{} device cannot be read from ({})", kind, what),
            }),
            Some(_) => Ok(()),
        }
    }

    fn expect_writable(&self, action: &ActionId, addr: &InputAddr) -> Result<(), ProfileError> {
        let invalid = |reason: String| ProfileError::InvalidConfig {
            action: action.to_string(),
            reason,
        };
        let kind = self
            .device_kind(&addr.device)
            .ok_or_else(|| ProfileError::UnknownDevice(addr.device.to_string()))?;
        if !kind.is_writable() {
            return Err(invalid(format!("{} is not an output device", addr.device)));
        }
        if let Some(capacity) = self.devices.get(&addr.device).and_then(|d| d.capacity(addr.input.kind)) {
            if addr.input.index == 0 || addr.input.index > capacity {
                return Err(invalid(format!(
                    "{} exceeds the {} {} input(s) of {}",
                    addr.input, capacity, addr.input.kind, addr.device
                )));
            }
        }
        Ok(())
    }

    fn validate_action(&self, id: &ActionId, node: &ActionNode) -> Result<(), ProfileError> {
        let invalid = |reason: String| ProfileError::InvalidConfig {
            action: id.to_string(),
            reason,
        };
        let window = |ms: u64, what: &str| {
            if ms == 0 || ms > MAX_WINDOW_MS {
                Err(invalid(format!("{} {}ms outside 1..={}ms", what, ms, MAX_WINDOW_MS)))
            } else {
                Ok(())
            }
        };

        match node {
            ActionNode::Root(c) => {
                if let Some(policy) = &c.behavior {
                    policy.validate().map_err(invalid)?;
                }
            }
            ActionNode::Chain(c) => {
                if let Some(ms) = c.timeout_ms {
                    window(ms, "timeout")?;
                }
            }
            ActionNode::Condition(c) => {
                for addr in c.expression.inputs() {
                    self.expect_readable(&addr.device, &format!("condition of {}", id))?;
                }
            }
            ActionNode::Tempo(c) => window(c.threshold_ms, "threshold")?,
            ActionNode::DoubleTap(c) => window(c.threshold_ms, "threshold")?,
            ActionNode::MergeAxis(c) => {
                for addr in [&c.first, &c.second] {
                    self.expect_readable(&addr.device, &format!("merge input of {}", id))?;
                    if addr.input.kind != InputKind::Axis {
                        return Err(invalid(format!("merge input {} is not an axis", addr)));
                    }
                }
                if !c.weights.iter().all(|w| w.is_finite()) {
                    return Err(invalid("weights must be finite".to_string()));
                }
            }
            ActionNode::SplitAxis(c) => {
                if !(c.split.is_finite() && c.split > -1.0 && c.split < 1.0) {
                    return Err(invalid(format!("split point {} outside (-1, 1)", c.split)));
                }
            }
            ActionNode::ResponseCurve(c) => validate_curve(c).map_err(invalid)?,
            ActionNode::MapToOutput(c) => {
                self.expect_writable(id, &c.target())?;
                if !c.scaling.is_finite() {
                    return Err(invalid("scaling must be finite".to_string()));
                }
                if c.axis_mode == AxisMode::Relative && c.input.kind != InputKind::Axis {
                    return Err(invalid("relative mode needs an axis output".to_string()));
                }
            }
            ActionNode::MapToKeyboard(_) => {}
            ActionNode::Macro(c) => {
                if c.policy == MacroPolicy::Repeat && c.count == 0 {
                    return Err(invalid("repeat count must be at least 1".to_string()));
                }
                for event in &c.events {
                    if let MacroEvent::Output { device, input, .. } = event {
                        self.expect_writable(id, &InputAddr::new(device.clone(), *input))?;
                    }
                    if let MacroEvent::MouseButton { mouse_button, .. } = event {
                        if !(1..=5).contains(mouse_button) {
                            return Err(invalid(format!("mouse button {} outside 1..=5", mouse_button)));
                        }
                    }
                }
            }
            ActionNode::ChangeMode(c) => {
                if !self.modes.contains(&c.mode) {
                    return Err(ProfileError::MissingMode(c.mode.clone()));
                }
            }
            ActionNode::Reference(_) => {}
        }
        Ok(())
    }
}

fn validate_curve(c: &ResponseCurveConfig) -> Result<(), String> {
    let unit = |v: f64| v.is_finite() && (-1.0..=1.0).contains(&v);
    if c.points.len() < 2 {
        return Err("curve needs at least two points".to_string());
    }
    if !c.points.iter().all(|[x, y]| unit(*x) && unit(*y)) {
        return Err("curve points must lie in [-1, 1]".to_string());
    }
    if c.points.windows(2).any(|w| w[0][0] >= w[1][0]) {
        return Err("curve points must be strictly increasing in x".to_string());
    }
    if !c.deadzone.iter().all(|v| unit(*v)) || c.deadzone.windows(2).any(|w| w[0] > w[1]) {
        return Err("deadzone must be ordered within [-1, 1]".to_string());
    }
    Ok(())
}

/// Convenience for building input refs in profiles and tests
pub fn input(kind: InputKind, index: u16) -> InputRef {
    InputRef::new(kind, index)
}
