//! Context configuration
//!
//! A [`ContextConfig`] can be built in code, parsed from TOML, or assembled
//! from environment variables:
//!
//! ```toml
//! device = "/dev/dri/renderD128"
//! backends = ["vulkan", "gl"]
//! power_preference = "high"
//! debug_level = "medium"
//! ```

use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::debug::DebugLevel;
use crate::error::ConfigError;

/// Environment variable overriding [`ContextConfig::device`]
pub const DEVICE_ENV: &str = "MICROCOMPUTE_DEVICE";
/// Environment variable overriding [`ContextConfig::debug_level`]
pub const DEBUG_LEVEL_ENV: &str = "MICROCOMPUTE_DEBUG_LEVEL";
/// Same variable wgpu itself honours for backend selection
pub const BACKEND_ENV: &str = "WGPU_BACKEND";

/// First DRM render node minor number
const RENDER_NODE_BASE: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    #[default]
    None,
    Low,
    High,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::None => wgpu::PowerPreference::None,
            PowerPreference::Low => wgpu::PowerPreference::LowPower,
            PowerPreference::High => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Settings used by [`crate::Context::start`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Device selector, see [`DeviceSelector::parse`]
    pub device: String,
    /// Backend names to try; empty means every backend wgpu supports here
    pub backends: Vec<String>,
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
    /// Threshold for the default stdout sink; `None` prints everything
    pub debug_level: Option<DebugLevel>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
            backends: Vec::new(),
            power_preference: PowerPreference::default(),
            force_fallback_adapter: false,
            debug_level: None,
        }
    }
}

impl ContextConfig {
    /// Config selecting a specific device with defaults for everything else
    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&source)
    }

    /// Defaults overridden by `MICROCOMPUTE_DEVICE`, `MICROCOMPUTE_DEBUG_LEVEL`
    /// and `WGPU_BACKEND`
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(device) = lookup(DEVICE_ENV) {
            self.device = device;
        }

        if let Some(level) = lookup(DEBUG_LEVEL_ENV) {
            match parse_level(&level) {
                Some(parsed) => self.debug_level = Some(parsed),
                None => log::warn!("[ContextConfig] Ignoring unknown {} '{}'", DEBUG_LEVEL_ENV, level),
            }
        }

        if let Some(backends) = lookup(BACKEND_ENV) {
            self.backends = backends
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }

        self
    }

    /// Resolve the backend names into wgpu backend flags
    pub fn backend_bits(&self) -> Result<wgpu::Backends, ConfigError> {
        if self.backends.is_empty() {
            return Ok(wgpu::Backends::all());
        }

        self.backends
            .iter()
            .try_fold(wgpu::Backends::empty(), |bits, name| {
                let backend = match name.to_lowercase().as_str() {
                    "vulkan" | "vk" => wgpu::Backends::VULKAN,
                    "gl" | "gles" | "opengl" => wgpu::Backends::GL,
                    "metal" | "mtl" => wgpu::Backends::METAL,
                    "dx12" | "d3d12" => wgpu::Backends::DX12,
                    "webgpu" | "browser" => wgpu::Backends::BROWSER_WEBGPU,
                    "primary" => wgpu::Backends::PRIMARY,
                    "secondary" => wgpu::Backends::SECONDARY,
                    _ => return Err(ConfigError::UnknownBackend(name.clone())),
                };
                Ok(bits | backend)
            })
    }

    pub fn selector(&self) -> Result<DeviceSelector, ConfigError> {
        DeviceSelector::parse(&self.device)
    }
}

fn parse_level(level: &str) -> Option<DebugLevel> {
    let level = level.trim().to_lowercase();
    let deserializer: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        level.as_str().into_deserializer();
    DebugLevel::deserialize(deserializer).ok()
}

/// Parsed form of the device string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Let wgpu pick using the power preference
    Auto,
    /// A DRM render node `renderD<N>` with `N >= 128`; `index` is its
    /// position among hardware adapters
    RenderNode { path: PathBuf, index: usize },
    /// Position in the adapter enumeration
    Index(usize),
    /// Case-insensitive substring of the adapter name
    Name(String),
}

impl DeviceSelector {
    /// Paths must name a render node; anything else under `/` is rejected
    pub fn parse(device: &str) -> Result<Self, ConfigError> {
        let device = device.trim();

        if device.is_empty() || device.eq_ignore_ascii_case("auto") {
            return Ok(DeviceSelector::Auto);
        }

        if device.starts_with('/') {
            let path = PathBuf::from(device);
            let index = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("renderD"))
                .and_then(|minor| minor.parse::<u32>().ok())
                .and_then(|minor| minor.checked_sub(RENDER_NODE_BASE))
                .ok_or_else(|| ConfigError::InvalidDevice(device.to_string()))?;
            return Ok(DeviceSelector::RenderNode {
                path,
                index: index as usize,
            });
        }

        if let Ok(index) = device.parse::<usize>() {
            return Ok(DeviceSelector::Index(index));
        }

        Ok(DeviceSelector::Name(device.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_selector_parsing() {
        assert_eq!(DeviceSelector::parse("").unwrap(), DeviceSelector::Auto);
        assert_eq!(DeviceSelector::parse("AUTO").unwrap(), DeviceSelector::Auto);
        assert_eq!(
            DeviceSelector::parse("/dev/dri/renderD129").unwrap(),
            DeviceSelector::RenderNode {
                path: PathBuf::from("/dev/dri/renderD129"),
                index: 1,
            }
        );
        assert_eq!(DeviceSelector::parse("2").unwrap(), DeviceSelector::Index(2));
        assert_eq!(
            DeviceSelector::parse("llvmpipe").unwrap(),
            DeviceSelector::Name("llvmpipe".to_string())
        );
    }

    #[test]
    fn test_non_render_node_paths_rejected() {
        for device in ["/dev/dri/card1", "/dev/dri/renderD100", "/dev/dri/renderD", "/dev/dri/renderDx"] {
            assert!(
                matches!(DeviceSelector::parse(device), Err(ConfigError::InvalidDevice(ref d)) if d == device),
                "{} should be rejected",
                device
            );
        }
        assert!(DeviceSelector::parse("/dev/dri/renderD128").is_ok());
    }

    #[test]
    fn test_level_names_parse() {
        assert_eq!(parse_level("info"), Some(DebugLevel::Info));
        assert_eq!(parse_level(" Medium "), Some(DebugLevel::Medium));
        assert_eq!(parse_level("HIGH"), Some(DebugLevel::High));
        assert_eq!(parse_level("loud"), None);

        let config = ContextConfig::default()
            .with_overrides(|key| (key == DEBUG_LEVEL_ENV).then(|| "loud".to_string()));
        assert_eq!(config.debug_level, None);
    }

    #[test]
    fn test_toml_round_trip_defaults() {
        let config = ContextConfig::from_toml_str(
            r#"
            device = "/dev/dri/renderD128"
            backends = ["vulkan", "gl"]
            power_preference = "high"
            debug_level = "medium"
            "#,
        )
        .unwrap();

        assert_eq!(config.device, "/dev/dri/renderD128");
        assert_eq!(config.power_preference, PowerPreference::High);
        assert_eq!(config.debug_level, Some(DebugLevel::Medium));
        assert!(!config.force_fallback_adapter);
        assert_eq!(
            config.backend_bits().unwrap(),
            wgpu::Backends::VULKAN | wgpu::Backends::GL
        );

        let empty = ContextConfig::from_toml_str("").unwrap();
        assert_eq!(empty, ContextConfig::default());
        assert_eq!(empty.backend_bits().unwrap(), wgpu::Backends::all());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = ContextConfig {
            backends: vec!["glide".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.backend_bits(),
            Err(ConfigError::UnknownBackend(name)) if name == "glide"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (DEVICE_ENV, "1"),
            (DEBUG_LEVEL_ENV, "HIGH"),
            (BACKEND_ENV, "vulkan, metal"),
        ]
        .into_iter()
        .collect();

        let config = ContextConfig::default()
            .with_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.selector().unwrap(), DeviceSelector::Index(1));
        assert_eq!(config.debug_level, Some(DebugLevel::High));
        assert_eq!(config.backends, vec!["vulkan", "metal"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.toml");
        std::fs::write(&path, "device = \"llvmpipe\"\nforce_fallback_adapter = true\n").unwrap();

        let config = ContextConfig::load(&path).unwrap();
        assert!(config.force_fallback_adapter);
        assert_eq!(config.selector().unwrap(), DeviceSelector::Name("llvmpipe".to_string()));

        let missing = ContextConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
