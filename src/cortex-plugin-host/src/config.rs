//! Plugin host configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{PluginError, Result};

/// Configuration file name inside the cortex config directory.
pub const CONFIG_FILE: &str = "plugin-host.toml";

/// Plugin host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHostConfig {
    /// Whether installed plugins are activated
    #[serde(default = "default_true")]
    pub enable_plugins: bool,

    /// Whether registry minimum versions are enforced on add/update
    #[serde(default = "default_true")]
    pub version_gating: bool,

    /// Version of the running service, compared against registry minimums
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Root of the per-plugin install directories
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Directory holding downloaded repository archives
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// JSON file backing the installed plugin list
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Curated plugin registry
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Archive download URL with `{owner}`, `{repo}` and `{branch}` placeholders
    #[serde(default = "default_archive_url_template")]
    pub archive_url_template: String,

    /// Top-level command names a plugin may not shadow
    #[serde(default)]
    pub reserved_names: HashSet<String>,

    /// External dependency installation step
    #[serde(default)]
    pub dependencies: DependencyConfig,

    /// WASM runtime limits
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// External dependency installer command.
///
/// `{manifest}` and `{dir}` in `args` are replaced with the manifest path and
/// the plugin's install directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default = "default_dependency_program")]
    pub program: String,

    #[serde(default = "default_dependency_args")]
    pub args: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            program: default_dependency_program(),
            args: default_dependency_args(),
        }
    }
}

/// Resource limits applied to every activated plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Fuel available to a plugin's `init` and `shutdown` calls
    #[serde(default = "default_fuel_limit")]
    pub fuel_limit: u64,

    /// Maximum linear memory per plugin instance
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fuel_limit: default_fuel_limit(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            enable_plugins: true,
            version_gating: true,
            service_version: default_service_version(),
            plugins_dir: default_plugins_dir(),
            cache_dir: default_cache_dir(),
            state_file: default_state_file(),
            registry_url: default_registry_url(),
            archive_url_template: default_archive_url_template(),
            reserved_names: HashSet::new(),
            dependencies: DependencyConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PluginHostConfig {
    /// Create a configuration rooted in a single directory.
    pub fn with_root(root: &Path) -> Self {
        Self {
            plugins_dir: root.join("plugins"),
            cache_dir: root.join("cache"),
            state_file: root.join("plugins.json"),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No plugin host config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.registry_url.trim().is_empty() {
            return Err(PluginError::Config("registry_url cannot be empty".into()));
        }

        for placeholder in ["{owner}", "{repo}", "{branch}"] {
            if !self.archive_url_template.contains(placeholder) {
                return Err(PluginError::Config(format!(
                    "archive_url_template is missing {placeholder}"
                )));
            }
        }

        if self.dependencies.program.trim().is_empty() {
            return Err(PluginError::Config(
                "dependencies.program cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check whether a plugin name shadows an existing command.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names.contains(name)
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("cortex").join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(".cortex").join(CONFIG_FILE))
}

fn default_plugins_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("cortex").join("plugins"))
        .unwrap_or_else(|| PathBuf::from(".cortex").join("plugins"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("cortex").join("plugins-cache"))
        .unwrap_or_else(|| PathBuf::from(".cortex").join("plugins-cache"))
}

fn default_state_file() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("cortex").join("plugins.json"))
        .unwrap_or_else(|| PathBuf::from(".cortex").join("plugins.json"))
}

fn default_registry_url() -> String {
    crate::DEFAULT_REGISTRY_URL.to_string()
}

fn default_archive_url_template() -> String {
    crate::DEFAULT_ARCHIVE_URL_TEMPLATE.to_string()
}

fn default_service_version() -> String {
    crate::VERSION.to_string()
}

fn default_dependency_program() -> String {
    "pip".to_string()
}

fn default_dependency_args() -> Vec<String> {
    ["install", "--upgrade", "--target", "{dir}/.deps", "-r", "{manifest}", "-q", "-q"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fuel_limit() -> u64 {
    10_000_000
}

fn default_max_memory_bytes() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_true() -> bool {
    true
}
