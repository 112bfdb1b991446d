// Gremlin Profile Persistence - TOML with Serde
// Loads and saves profiles; ids are preserved across a round trip

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{ActionId, ActionNode, BindingKey, Bindings, DeviceDecl, Library, Mode, ModeTree, Profile, ProfileError};
use crate::device::{DeviceId, InputRef};

/// Root TOML table of a profile document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileToml {
    /// Mode active right after activation; defaults to the first mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_mode: Option<String>,

    #[serde(default)]
    pub mode: Vec<Mode>,

    #[serde(default)]
    pub devices: IndexMap<DeviceId, DeviceDecl>,

    #[serde(default)]
    pub actions: IndexMap<ActionId, ActionNode>,

    #[serde(default)]
    pub binding: Vec<BindingToml>,
}

/// One `[[binding]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingToml {
    pub device: DeviceId,
    pub input: InputRef,
    pub mode: String,
    pub actions: Vec<ActionId>,
}

impl ProfileToml {
    /// Convert the parsed document into a validated profile
    fn to_profile(&self) -> Result<Profile, ProfileError> {
        let mut modes = ModeTree::new();
        for mode in &self.mode {
            if modes.contains(&mode.name) {
                return Err(ProfileError::InvalidConfig {
                    action: mode.name.clone(),
                    reason: "mode declared twice".to_string(),
                });
            }
            modes.add(mode.name.clone(), mode.parent.as_deref());
        }

        let start_mode = match &self.start_mode {
            Some(name) => name.clone(),
            None => modes
                .names()
                .next()
                .map(str::to_string)
                .ok_or_else(|| ProfileError::MissingMode("<no modes declared>".to_string()))?,
        };

        let mut library = Library::new();
        for (id, node) in &self.actions {
            library.insert(id.clone(), node.clone());
        }

        let mut bindings = Bindings::new();
        for entry in &self.binding {
            let key = BindingKey::new(entry.device.clone(), entry.input, entry.mode.clone());
            if !bindings.get(&key).is_empty() {
                return Err(ProfileError::DuplicateBinding(key.to_string()));
            }
            bindings.set(key, entry.actions.clone());
        }

        let profile = Profile::from_parts(library, modes, bindings, self.devices.clone(), start_mode);
        profile.validate()?;

        log::debug!(
            "Profile loaded: {} action(s), {} mode(s), {} binding(s), {} device(s)",
            profile.library().len(),
            profile.modes().len(),
            profile.bindings().len(),
            profile.devices().len()
        );
        Ok(profile)
    }

    fn from_profile(profile: &Profile) -> Self {
        Self {
            start_mode: Some(profile.start_mode().to_string()),
            mode: profile.modes().iter().collect(),
            devices: profile.devices().clone(),
            actions: profile
                .library()
                .iter()
                .map(|(id, node)| (id.clone(), node.clone()))
                .collect(),
            binding: profile
                .bindings()
                .iter()
                .map(|(key, roots)| BindingToml {
                    device: key.device.clone(),
                    input: key.input,
                    mode: key.mode.clone(),
                    actions: roots.clone(),
                })
                .collect(),
        }
    }
}

impl Profile {
    /// Parse and validate a profile file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a profile document
    pub fn from_toml(content: &str) -> Result<Self, ProfileError> {
        let document: ProfileToml =
            toml::from_str(content).map_err(|e| ProfileError::TomlParse(e.to_string()))?;
        document.to_profile()
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        toml::to_string(&ProfileToml::from_profile(self)).map_err(|e| ProfileError::TomlSerialize(e.to_string()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{MacroEvent, MacroPolicy, Slot, TapMode};

    const SAMPLE: &str = r#"
        start_mode = "Default"

        [[mode]]
        name = "Default"

        [[mode]]
        name = "Landing"
        parent = "Default"

        [devices.stick]
        kind = "physical"
        name = "Thrustmaster T.16000M"

        [devices.vjoy]
        kind = "virtual"
        axes = 4
        buttons = 16
        hats = 1

        [devices.bus]
        kind = "intermediate"

        [actions.root1]
        kind = "root"
        actions = ["tap"]

        [actions.tap]
        kind = "double-tap"
        threshold_ms = 300
        mode = "combined"
        single = ["out1"]
        double = ["gear"]

        [actions.out1]
        kind = "map-to-output"
        device = "vjoy"
        input = "button:1"

        [actions.gear]
        kind = "macro"
        policy = "repeat"
        count = 2
        events = [
            { key = "G", pressed = true },
            { delay_ms = 50 },
            { key = "G", pressed = false },
            { mouse_button = 1, pressed = true },
            { device = "vjoy", input = "axis:1", value = 0.5 },
        ]

        [actions.root2]
        kind = "root"
        actions = ["gear-ref"]
        behavior = { kind = "axis-above", threshold = 0.5 }

        [actions.gear-ref]
        kind = "reference"
        target = "gear"

        [[binding]]
        device = "stick"
        input = "button:1"
        mode = "Default"
        actions = ["root1"]

        [[binding]]
        device = "stick"
        input = "axis:3"
        mode = "Landing"
        actions = ["root2"]
    "#;

    #[test]
    fn test_load_sample() {
        let profile = Profile::from_toml(SAMPLE).unwrap();
        assert_eq!(profile.start_mode(), "Default");
        assert_eq!(profile.modes().parent("Landing"), Some("Default"));
        assert_eq!(profile.library().len(), 6);
        assert_eq!(profile.bindings().len(), 2);

        match profile.action(&ActionId::new("tap")) {
            Some(ActionNode::DoubleTap(c)) => {
                assert_eq!(c.mode, TapMode::Combined);
                assert_eq!(c.threshold_ms, 300);
            }
            other => panic!("unexpected {:?}", other),
        }
        match profile.action(&ActionId::new("gear")) {
            Some(ActionNode::Macro(c)) => {
                assert_eq!(c.policy, MacroPolicy::Repeat);
                assert_eq!(c.events.len(), 5);
                assert_eq!(c.events[1], MacroEvent::Delay { delay_ms: 50 });
                assert!(matches!(c.events[3], MacroEvent::MouseButton { mouse_button: 1, pressed: true }));
                assert!(matches!(c.events[4], MacroEvent::Output { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let profile = Profile::from_toml(SAMPLE).unwrap();
        let text = profile.to_toml_string().unwrap();
        let reloaded = Profile::from_toml(&text).unwrap();
        assert_eq!(profile, reloaded);

        // Reference still resolves to the shared macro
        let (target, node) = reloaded.library().resolve(&ActionId::new("gear-ref")).unwrap();
        assert_eq!(target, &ActionId::new("gear"));
        assert_eq!(node.kind_name(), "macro");
        let tap = reloaded.action(&ActionId::new("tap")).unwrap();
        assert_eq!(tap.slot(Slot::Double), &[ActionId::new("gear")]);
    }

    #[test]
    fn test_button_behavior_round_trips() {
        let text = r#"
            [[mode]]
            name = "Default"
            [actions.r]
            kind = "root"
            behavior = { kind = "button" }
        "#;
        let profile = Profile::from_toml(text).unwrap();
        match profile.action(&ActionId::new("r")) {
            Some(ActionNode::Root(c)) => assert_eq!(c.behavior, Some(crate::synth::ActivationPolicy::Button)),
            other => panic!("unexpected {:?}", other),
        }
        let reloaded = Profile::from_toml(&profile.to_toml_string().unwrap()).unwrap();
        assert_eq!(profile, reloaded);
    }

    #[test]
    fn test_start_mode_defaults_to_first_mode() {
        let text = r#"
            [[mode]]
            name = "Alpha"
            [[mode]]
            name = "Beta"
        "#;
        assert_eq!(Profile::from_toml(text).unwrap().start_mode(), "Alpha");
        assert!(matches!(Profile::from_toml(""), Err(ProfileError::MissingMode(_))));
    }

    #[test]
    fn test_missing_reference_rejected_at_load() {
        let text = r#"
            [[mode]]
            name = "Default"
            [actions.r]
            kind = "reference"
            target = "nowhere"
        "#;
        assert!(matches!(Profile::from_toml(text), Err(ProfileError::MissingAction(_))));
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let text = r#"
            [[mode]]
            name = "Default"
            [devices.stick]
            kind = "physical"
            name = "Stick"
            [actions.r]
            kind = "root"
            [[binding]]
            device = "stick"
            input = "button:1"
            mode = "Default"
            actions = ["r"]
            [[binding]]
            device = "stick"
            input = "button:1"
            mode = "Default"
            actions = ["r"]
        "#;
        assert!(matches!(Profile::from_toml(text), Err(ProfileError::DuplicateBinding(_))));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Profile::from_toml("mode = ["), Err(ProfileError::TomlParse(_))));
        let text = r#"
            [[mode]]
            name = "Default"
            [actions.x]
            kind = "teleport"
        "#;
        assert!(matches!(Profile::from_toml(text), Err(ProfileError::TomlParse(_))));
        assert!(matches!(Profile::from_toml("bogus = 1"), Err(ProfileError::TomlParse(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let profile = Profile::from_toml(SAMPLE).unwrap();
        let path = std::env::temp_dir().join(format!("gremlin-profile-{}.toml", std::process::id()));
        profile.save(&path).unwrap();
        let loaded = Profile::from_toml_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(profile, loaded);
    }
}
