//! Validates installed plugins and drives them through the extension host.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dependencies::DependencyInstaller;
use crate::identity::Identity;
use crate::runtime::ExtensionHost;
use crate::{DEPENDENCY_MANIFEST, ENTRY_EXTENSION, PluginError, Result};

/// Plugin loader tracking the set of active identities.
///
/// Every identity in the loaded set has an install directory.
pub struct PluginLoader {
    plugins_dir: PathBuf,
    host: Arc<dyn ExtensionHost>,
    deps: Arc<dyn DependencyInstaller>,
    loaded: RwLock<BTreeSet<Identity>>,
}

impl PluginLoader {
    pub fn new(
        plugins_dir: impl Into<PathBuf>,
        host: Arc<dyn ExtensionHost>,
        deps: Arc<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            host,
            deps,
            loaded: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Path of the entry unit, `<install dir>/<name>.wasm`.
    pub fn entry_path(&self, identity: &Identity) -> PathBuf {
        identity
            .install_dir(&self.plugins_dir)
            .join(format!("{}.{}", identity.name, ENTRY_EXTENSION))
    }

    /// Check that the install directory holds the plugin's entry unit.
    pub fn validate(&self, identity: &Identity) -> Result<()> {
        let entry = self.entry_path(identity);
        if !entry.is_file() {
            return Err(PluginError::validation_error(
                identity.to_string(),
                format!("entry unit {} not found", entry.display()),
            ));
        }
        Ok(())
    }

    /// Validate, install dependencies, then activate.
    ///
    /// A dependency failure leaves the installed files in place.
    pub async fn load(&self, identity: &Identity) -> Result<()> {
        self.validate(identity)?;

        let dir = identity.install_dir(&self.plugins_dir);
        let manifest = dir.join(DEPENDENCY_MANIFEST);
        if manifest.is_file() {
            tracing::info!(plugin = %identity, "Installing dependencies");
            let outcome = self.deps.install(&dir, &manifest).await?;
            if !outcome.success {
                return Err(PluginError::dependency_error(
                    identity.to_string(),
                    outcome.output,
                ));
            }
        }

        self.host
            .activate(&identity.extension_id(), &self.entry_path(identity))
            .await?;

        self.loaded.write().await.insert(identity.clone());
        tracing::info!(plugin = %identity, "Loaded plugin");
        Ok(())
    }

    /// Deactivate a plugin.
    ///
    /// The identity leaves the loaded set even when the host reports it was
    /// not active.
    pub async fn unload(&self, identity: &Identity) -> Result<()> {
        let was_loaded = self.loaded.write().await.remove(identity);
        let result = self.host.deactivate(&identity.extension_id()).await;

        match result {
            Ok(()) => {
                tracing::info!(plugin = %identity, "Unloaded plugin");
                Ok(())
            }
            Err(PluginError::NotLoaded(_)) if was_loaded => {
                tracing::warn!(plugin = %identity, "Plugin was tracked as loaded but not active");
                Ok(())
            }
            Err(PluginError::NotLoaded(_)) => Err(PluginError::NotLoaded(identity.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn is_loaded(&self, identity: &Identity) -> bool {
        self.loaded.read().await.contains(identity)
    }

    /// Loaded identities in display order.
    pub async fn loaded(&self) -> Vec<Identity> {
        self.loaded.read().await.iter().cloned().collect()
    }
}
