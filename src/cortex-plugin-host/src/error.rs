//! Plugin host error types.

use std::path::PathBuf;

use thiserror::Error;

/// Plugin host errors.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Malformed plugin reference.
    #[error("Invalid plugin reference '{input}': {message}")]
    Parse { input: String, message: String },

    /// Plugin is already in the installed list.
    #[error("Plugin already installed: {0}")]
    AlreadyInstalled(String),

    /// Plugin name collides with an existing command.
    #[error("Plugin name '{0}' collides with an existing command")]
    NameCollision(String),

    /// Plugin is not in the installed list.
    #[error("Plugin not installed: {0}")]
    NotInstalled(String),

    /// Plugin is not active in the host.
    #[error("Plugin not loaded: {0}")]
    NotLoaded(String),

    /// Archive download failed.
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// Archive could not be read.
    #[error("Invalid plugin archive: {0}")]
    Archive(String),

    /// Install directory failed validation.
    #[error("Invalid plugin '{plugin}': {message}")]
    Validation { plugin: String, message: String },

    /// Dependency installation failed.
    #[error("Failed to install dependencies for '{plugin}':\n{output}")]
    Dependency { plugin: String, output: String },

    /// Activation failed.
    #[error("Failed to load plugin '{plugin}': {message}")]
    Load { plugin: String, message: String },

    /// Best-effort filesystem cleanup failed.
    #[error("Failed to clean up {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    /// Running version is below the plugin's declared minimum.
    #[error("Plugin '{plugin}' requires version {required}, running {found}")]
    VersionMismatch {
        plugin: String,
        required: String,
        found: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PluginError {
    /// Create a parse error.
    pub fn parse_error(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Create a fetch error.
    pub fn fetch_error(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation_error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a dependency error carrying the installer output.
    pub fn dependency_error(plugin: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Dependency {
            plugin: plugin.into(),
            output: output.into(),
        }
    }

    /// Create a load error.
    pub fn load_error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a filesystem cleanup error.
    pub fn filesystem_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the orchestrator may log this error and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotLoaded(_) | Self::Filesystem { .. })
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for PluginError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type alias for plugin host operations.
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::NotInstalled("a/b/c@master".to_string());
        assert_eq!(err.to_string(), "Plugin not installed: a/b/c@master");
    }

    #[test]
    fn test_dependency_error_keeps_output() {
        let err = PluginError::dependency_error("a/b/c@master", "No matching distribution");
        assert!(err.to_string().contains("a/b/c@master"));
        assert!(err.to_string().contains("No matching distribution"));
    }

    #[test]
    fn test_recoverable() {
        assert!(PluginError::NotLoaded("x".to_string()).is_recoverable());
        assert!(PluginError::filesystem_error("/tmp/x", "busy").is_recoverable());
        assert!(!PluginError::load_error("x", "trap").is_recoverable());
        assert!(!PluginError::NotInstalled("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let plugin_err: PluginError = io_err.into();
        assert!(matches!(plugin_err, PluginError::Io(_)));
    }
}
