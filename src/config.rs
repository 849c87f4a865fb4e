//! Bridge configuration - `bridge.toml` next to the hosting library
//!
//! Every section and field has a default, so an empty file (or no file at all)
//! yields a working development configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::logging::LogFormat;

/// File name looked up beside the hosting library
pub const CONFIG_FILE_NAME: &str = "bridge.toml";

pub const ENV_RESOURCE_PATH: &str = "EMBEDBRIDGE_RESOURCE_PATH";
pub const ENV_STRICT: &str = "EMBEDBRIDGE_STRICT";
pub const ENV_LOG: &str = "EMBEDBRIDGE_LOG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub callbacks: CallbackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program name reported to the embedded runtime
    #[serde(default = "default_program_name")]
    pub program_name: String,

    /// Directory, relative to the hosting library, holding runtime resources
    #[serde(default = "default_resource_dir")]
    pub resource_dir_name: String,

    /// Explicit resource path; wins over the library-relative one
    #[serde(default)]
    pub resource_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub no_user_site: bool,

    #[serde(default = "default_false")]
    pub no_site: bool,

    #[serde(default = "default_false")]
    pub ignore_environment: bool,

    /// Shipped build: implies `no_site` and `ignore_environment`
    #[serde(default = "default_false")]
    pub export: bool,

    /// Imported right after initialization; failure is reported, not fatal
    #[serde(default)]
    pub startup_module: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Core modules imported, in order, before the binding table is registered
    #[serde(default)]
    pub modules: Vec<String>,

    /// Wrapper type used for tags with no registered type
    #[serde(default)]
    pub default_wrapper_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Abort on callbacks outside the registration window instead of ignoring them
    #[serde(default = "default_false")]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub filter: Option<String>,

    /// Log to daily rolling files in this directory instead of stderr
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program_name: default_program_name(),
            resource_dir_name: default_resource_dir(),
            resource_path: None,
            no_user_site: true,
            no_site: false,
            ignore_environment: false,
            export: false,
            startup_module: None,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            default_wrapper_type: Some("_Wrapped".to_string()),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { strict: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Compact,
            filter: None,
            directory: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_program_name() -> String { "host".to_string() }
fn default_resource_dir() -> String { "_bridge.env".to_string() }
fn default_level() -> String { "info".to_string() }

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load `bridge.toml` from `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Preset for exported (shipped) builds: the runtime sees neither site
    /// packages nor the user's environment.
    pub fn export() -> Self {
        let mut config = Self::default();
        config.runtime.export = true;
        config.runtime.no_site = true;
        config.runtime.ignore_environment = true;
        config
    }

    /// Apply `EMBEDBRIDGE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_RESOURCE_PATH).filter(|p| !p.is_empty()) {
            self.runtime.resource_path = Some(PathBuf::from(path));
        }
        if let Some(strict) = lookup(ENV_STRICT) {
            self.callbacks.strict = matches!(strict.as_str(), "1" | "true" | "yes");
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|f| !f.is_empty()) {
            self.logging.filter = Some(filter);
        }
    }

    /// Resource path for a library loaded from `library_path`.
    ///
    /// An explicit `resource_path` wins; otherwise the resource directory
    /// sits next to the library file.
    pub fn resource_path_for(&self, library_path: &Path) -> Option<PathBuf> {
        if let Some(explicit) = &self.runtime.resource_path {
            return Some(explicit.clone());
        }

        library_path
            .parent()
            .map(|dir| dir.join(&self.runtime.resource_dir_name))
    }
}
