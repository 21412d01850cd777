//! Configuration for the type manager and binary resolver

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for locating native binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    /// Directories searched for binaries, in order. Empty uses the loader's
    /// default search path.
    pub search_paths: Vec<PathBuf>,
    /// Suffix of dedicated server binaries, tried first when a lookup asks
    /// for the server check
    pub server_suffix: String,
    /// Also try platform library file names (`lib<name>.so`, `<name>.dll`)
    pub platform_names: bool,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            server_suffix: "_srv".to_string(),
            platform_names: true,
        }
    }
}

/// Configuration for a [`crate::TypeManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Binary resolution settings
    pub binaries: BinaryConfig,
    /// Platform used to pick `<key>_<platform>` overrides in type documents
    pub platform: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            binaries: BinaryConfig::default(),
            platform: current_platform().to_string(),
        }
    }
}

impl ManagerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Name of the platform this crate was built for
pub fn current_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "linux"
    }
}
