//! External dependency installation for plugins that ship a manifest.

use std::path::Path;

use async_trait::async_trait;

use crate::config::DependencyConfig;
use crate::{PluginError, Result};

/// Outcome of one dependency installation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyOutcome {
    pub success: bool,
    /// Captured installer output, for diagnostics
    pub output: String,
}

impl DependencyOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Installs the packages a plugin's manifest declares.
///
/// Only process-level failures are errors; an installer that runs and
/// reports failure returns an unsuccessful [`DependencyOutcome`].
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, plugin_dir: &Path, manifest: &Path) -> Result<DependencyOutcome>;
}

/// Runs a configured external program, such as `pip`.
pub struct CommandDependencyInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandDependencyInstaller {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &DependencyConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn render_args(&self, plugin_dir: &Path, manifest: &Path) -> Vec<String> {
        let dir = plugin_dir.to_string_lossy();
        let manifest = manifest.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest).replace("{dir}", &dir))
            .collect()
    }
}

#[async_trait]
impl DependencyInstaller for CommandDependencyInstaller {
    async fn install(&self, plugin_dir: &Path, manifest: &Path) -> Result<DependencyOutcome> {
        let args = self.render_args(plugin_dir, manifest);
        tracing::debug!("Running {} {}", self.program, args.join(" "));

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(plugin_dir)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| {
                PluginError::dependency_error(
                    plugin_dir.display().to_string(),
                    format!("Failed to run {}: {}", self.program, e),
                )
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        if !text.trim().is_empty() {
            tracing::debug!("{} output:\n{}", self.program, text.trim_end());
        }

        Ok(DependencyOutcome {
            success: output.status.success(),
            output: text,
        })
    }
}
