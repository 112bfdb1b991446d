// Gremlin Settings Module
// Runtime tunables loaded from ~/.config/gremlin/settings.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine-wide settings.
///
/// Loaded from a TOML file (default: ~/.config/gremlin/settings.toml).
/// Every field has a default so a missing file or section is fine.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Inter-event floor for macro steps without an explicit delay
    pub macro_min_delay: Duration,

    /// Integration step of relative axis outputs
    pub relative_tick: Duration,

    /// Name prefix of created virtual devices
    pub output_device_name: String,

    /// Bound on intermediate-device feedback within one event
    pub max_feedback_depth: usize,

    /// Overrides the profile's start mode
    pub start_mode: Option<String>,

    /// Physical device filter (names or paths); empty means all declared
    pub device_filter: Vec<String>,

    /// Path to the settings file (for reload)
    source_path: Option<PathBuf>,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default, rename = "macro")]
    macros: Option<MacroSettings>,

    #[serde(default)]
    output: Option<OutputSettings>,

    #[serde(default)]
    engine: Option<EngineSettings>,

    #[serde(default)]
    devices: Option<DeviceSettings>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MacroSettings {
    #[serde(default)]
    min_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputSettings {
    #[serde(default)]
    relative_tick_ms: Option<u64>,
    #[serde(default)]
    device_name: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineSettings {
    #[serde(default)]
    max_feedback_depth: Option<usize>,
    #[serde(default)]
    start_mode: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DeviceSettings {
    #[serde(default)]
    only: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub const DEFAULT_MIN_DELAY_MS: u64 = 20;
    pub const DEFAULT_RELATIVE_TICK_MS: u64 = 10;
    pub const DEFAULT_FEEDBACK_DEPTH: usize = 8;

    pub fn new() -> Self {
        Self {
            macro_min_delay: Duration::from_millis(Self::DEFAULT_MIN_DELAY_MS),
            relative_tick: Duration::from_millis(Self::DEFAULT_RELATIVE_TICK_MS),
            output_device_name: "Gremlin (virtual)".to_string(),
            max_feedback_depth: Self::DEFAULT_FEEDBACK_DEPTH,
            start_mode: None,
            device_filter: Vec::new(),
            source_path: None,
        }
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let toml_settings: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(macros) = toml_settings.macros {
            if let Some(ms) = macros.min_delay_ms {
                if ms > 1000 {
                    return Err(SettingsError::InvalidValue(format!(
                        "macro.min_delay_ms must be at most 1000, got {}",
                        ms
                    )));
                }
                settings.macro_min_delay = Duration::from_millis(ms);
            }
        }

        if let Some(output) = toml_settings.output {
            if let Some(ms) = output.relative_tick_ms {
                if !(1..=1000).contains(&ms) {
                    return Err(SettingsError::InvalidValue(format!(
                        "output.relative_tick_ms must be within 1..=1000, got {}",
                        ms
                    )));
                }
                settings.relative_tick = Duration::from_millis(ms);
            }
            if let Some(name) = output.device_name {
                if name.trim().is_empty() {
                    return Err(SettingsError::InvalidValue("output.device_name is empty".to_string()));
                }
                settings.output_device_name = name;
            }
        }

        if let Some(engine) = toml_settings.engine {
            if let Some(depth) = engine.max_feedback_depth {
                if !(1..=64).contains(&depth) {
                    return Err(SettingsError::InvalidValue(format!(
                        "engine.max_feedback_depth must be within 1..=64, got {}",
                        depth
                    )));
                }
                settings.max_feedback_depth = depth;
            }
            settings.start_mode = engine.start_mode;
        }

        if let Some(devices) = toml_settings.devices {
            settings.device_filter = devices.only;
        }

        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gremlin").join("settings.toml"))
    }

    /// Load from default location (~/.config/gremlin/settings.toml)
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        // Return default settings if file doesn't exist
        Ok(Self::new())
    }

    /// Reload settings from the original file
    pub fn reload(&mut self) -> Result<(), SettingsError> {
        if let Some(ref path) = self.source_path {
            *self = Self::from_file(path)?;
            Ok(())
        } else {
            Err(SettingsError::InvalidValue("No source path set".to_string()))
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

/// Create default settings content for a new installation
pub fn default_settings_content() -> &'static str {
    r#"# Gremlin Settings
# Place this file at: ~/.config/gremlin/settings.toml

[macro]
# Delay between macro steps that carry no explicit delay
min_delay_ms = 20

[output]
# Integration step for relative axis outputs
relative_tick_ms = 10
device_name = "Gremlin (virtual)"

[engine]
# Maximum intermediate-device feedback depth within one event
max_feedback_depth = 8
# start_mode = "Default"

[devices]
# Only open these physical devices (names or /dev/input paths)
# only = ["Thrustmaster T.16000M"]
"#
}
