use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Top-level devrt configuration, loaded from devrt.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevrtConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Which driver implementation backs the context
    #[serde(default)]
    pub backend: Backend,
    /// Explicit path to the driver library (None = platform search)
    pub library: Option<String>,
    /// Device ordinal to create the context on
    #[serde(default)]
    pub device: i32,
    /// Flags passed to context creation
    #[serde(default)]
    pub context_flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Simulated device memory in bytes
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Driver backend selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Backend {
    /// The vendor driver library, loaded at runtime (default)
    #[default]
    #[serde(rename = "cuda")]
    Cuda,
    /// Host-memory emulation, no GPU required
    #[serde(rename = "sim")]
    Sim,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            library: None,
            device: 0,
            context_flags: 0,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl DevrtConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let config: DevrtConfig = toml::from_str(content)?;
        if config.driver.device < 0 {
            return Err(CoreError::ConfigError(format!(
                "device ordinal must be non-negative, got {}",
                config.driver.device
            )));
        }
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    ///
    /// A file that exists but cannot be read or parsed is logged at warn
    /// level before falling back.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no configuration at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("ignoring configuration at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Returns the default config file path based on platform conventions.
/// Search order:
/// 1. `DEVRT_CONFIG` environment variable
/// 2. System-wide config: `%PROGRAMDATA%\devrt\devrt.toml` (Windows) or `/etc/devrt/devrt.toml`
/// 3. Local fallback: `./devrt.toml`
pub fn default_config_path() -> String {
    if let Ok(path) = std::env::var("DEVRT_CONFIG") {
        return path;
    }
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        let system_path = format!(r"{}\devrt\devrt.toml", programdata);
        if Path::new(&system_path).exists() {
            return system_path;
        }
    }
    #[cfg(not(windows))]
    {
        let system_path = "/etc/devrt/devrt.toml";
        if Path::new(system_path).exists() {
            return system_path.to_string();
        }
    }
    "devrt.toml".to_string()
}

fn default_capacity() -> usize {
    devrt_common::DEFAULT_SIM_CAPACITY
}
