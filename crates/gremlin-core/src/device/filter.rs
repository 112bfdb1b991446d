// Gremlin Device Matching
// Binds declared physical devices to OS devices by name, path or pattern

use regex::Regex;

/// How a declared physical device is located among enumerated devices.
///
/// Matching order is path, then exact name, then regex pattern. A matcher
/// with none of the three set never matches.
#[derive(Debug, Clone)]
pub struct DeviceMatcher {
    name: Option<String>,
    path: Option<String>,
    pattern: Option<Regex>,
}

impl DeviceMatcher {
    pub fn new(
        name: Option<&str>,
        path: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.map(str::to_string),
            path: path.map(str::to_string),
            pattern: pattern.map(Regex::new).transpose()?,
        })
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            path: None,
            pattern: None,
        }
    }

    pub fn matches(&self, device_name: &str, device_path: &str) -> bool {
        if let Some(path) = &self.path {
            if path == device_path {
                return true;
            }
        }
        if let Some(name) = &self.name {
            if name == device_name {
                return true;
            }
        }
        match &self.pattern {
            Some(re) => re.is_match(device_name),
            None => false,
        }
    }
}

/// Check a device against the user's `[devices] only` filter.
///
/// An empty filter accepts everything except our own virtual devices.
pub fn matches_device_filter(
    device_name: &str,
    device_path: &str,
    filter_names: &[String],
    virtual_prefix: &str,
) -> bool {
    if !filter_names.is_empty() {
        return filter_names
            .iter()
            .any(|match_name| device_path == match_name || device_name == match_name);
    }
    !is_virtual_device(device_name, virtual_prefix)
}

/// Devices we created ourselves must never be read back as sources
pub fn is_virtual_device(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}
