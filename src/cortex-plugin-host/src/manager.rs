//! Plugin manager - sequences every plugin lifecycle transition.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::ArtifactCache;
use crate::config::PluginHostConfig;
use crate::dependencies::{CommandDependencyInstaller, DependencyInstaller};
use crate::gate::ReadinessGate;
use crate::identity::Identity;
use crate::install_set::InstallSet;
use crate::installer::SelectiveInstaller;
use crate::loader::PluginLoader;
use crate::registry::{RegistryClient, RegistryEntry};
use crate::runtime::{ExtensionHost, WasmExtensionHost};
use crate::store::ConfigStore;
use crate::{PluginError, Result};

/// How the load step of `add` or `update` ended.
///
/// A failed load leaves the plugin installed; it is reported, not returned
/// as an error.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded,
    /// Plugin loading is turned off in the configuration
    Disabled,
    Failed(PluginError),
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }
}

/// Summary of the startup load pass.
#[derive(Debug, Default)]
pub struct BulkLoadReport {
    pub loaded: Vec<Identity>,
    pub failed: Vec<(Identity, String)>,
    /// Legacy entries rewritten with an explicit branch
    pub migrated: Vec<Identity>,
    /// Entries that could not be parsed and were removed
    pub dropped: Vec<String>,
}

/// A registry entry annotated with local state.
#[derive(Debug, Clone)]
pub struct RegistryListing {
    pub entry: RegistryEntry,
    pub loaded: bool,
    /// Whether the running version satisfies the entry's minimum
    pub compatible: bool,
}

/// Plugin manager - the main entry point for the plugin host.
///
/// The manager handles:
/// - Startup: registry refresh and the bulk load pass, then the readiness gate
/// - Runtime add, remove and update, serialized behind the install set lock
/// - Listing installed, loaded and registry plugins
pub struct PluginManager {
    /// Configuration
    config: PluginHostConfig,

    /// Curated registry
    registry: RegistryClient,

    /// Archive cache
    cache: ArtifactCache,

    /// Archive extraction
    installer: SelectiveInstaller,

    /// Validation, dependencies and activation
    loader: PluginLoader,

    /// Persisted install list; held for the whole of every mutation
    install_set: Mutex<InstallSet>,

    /// Opened once the startup load has finished
    gate: ReadinessGate,
}

impl PluginManager {
    /// Create a manager with the WASM extension host and the configured
    /// dependency command.
    pub async fn new(config: PluginHostConfig, store: Arc<dyn ConfigStore>) -> Result<Self> {
        let host = Arc::new(WasmExtensionHost::new(config.runtime.clone())?);
        let deps = Arc::new(CommandDependencyInstaller::from_config(&config.dependencies));
        Self::with_components(config, store, host, deps).await
    }

    /// Create a manager with explicit extension host and dependency installer.
    pub async fn with_components(
        config: PluginHostConfig,
        store: Arc<dyn ConfigStore>,
        host: Arc<dyn ExtensionHost>,
        deps: Arc<dyn DependencyInstaller>,
    ) -> Result<Self> {
        config.validate()?;

        let install_set = InstallSet::load(store).await?;
        let registry = RegistryClient::new(config.registry_url.clone());
        let cache = ArtifactCache::new(&config.cache_dir, config.archive_url_template.clone());
        let installer = SelectiveInstaller::new(&config.plugins_dir);
        let loader = PluginLoader::new(&config.plugins_dir, host, deps);

        Ok(Self {
            config,
            registry,
            cache,
            installer,
            loader,
            install_set: Mutex::new(install_set),
            gate: ReadinessGate::new(),
        })
    }

    pub fn config(&self) -> &PluginHostConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Wait for the startup load to finish.
    pub async fn wait_ready(&self) {
        self.gate.wait().await
    }

    // ========== Startup ==========

    /// Refresh the registry and load every installed plugin, then open the
    /// readiness gate.
    pub async fn initialize(&self) -> BulkLoadReport {
        if !self.config.enable_plugins {
            tracing::info!("Plugins are disabled, installed plugins will not be loaded");
            self.registry.refresh().await;
            self.gate.open();
            return BulkLoadReport::default();
        }

        let ((), report) = tokio::join!(self.registry.refresh(), self.bulk_initial_load());

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugin startup complete"
        );
        report
    }

    /// Fetch, install and load every persisted plugin once.
    ///
    /// Per-plugin failures are logged and never stop the pass. Legacy and
    /// unparseable entries are rewritten in a single persist at the end. The
    /// readiness gate opens when the pass completes.
    pub async fn bulk_initial_load(&self) -> BulkLoadReport {
        let mut set = self.install_set.lock().await;
        let mut report = BulkLoadReport::default();
        let mut entries: Vec<String> = Vec::with_capacity(set.len());
        let mut changed = false;

        for raw in set.entries().to_vec() {
            let identity = match Identity::parse(&raw, true) {
                Ok(identity) => identity,
                Err(_) => match Identity::parse(&raw, false) {
                    Ok(identity) => {
                        tracing::info!("Migrating plugin entry '{}' to '{}'", raw, identity);
                        report.migrated.push(identity.clone());
                        changed = true;
                        identity
                    }
                    Err(e) => {
                        tracing::warn!("Removing invalid plugin entry: {}", e);
                        report.dropped.push(raw);
                        changed = true;
                        continue;
                    }
                },
            };

            let key = identity.to_string();
            if entries.contains(&key) {
                tracing::warn!(plugin = %identity, "Removing duplicate plugin entry");
                changed = true;
                continue;
            }
            entries.push(key);

            if self.loader.is_loaded(&identity).await {
                continue;
            }

            match self.install_and_load(&identity).await {
                Ok(()) => report.loaded.push(identity),
                Err(e) => {
                    tracing::error!(plugin = %identity, "Failed to load plugin: {}", e);
                    report.failed.push((identity, e.to_string()));
                }
            }
        }

        if changed {
            match set.replace_all(entries).await {
                Ok(()) => tracing::debug!("Persisted rewritten plugin list"),
                Err(e) => tracing::error!("Failed to persist rewritten plugin list: {}", e),
            }
        }
        drop(set);

        self.gate.open();
        report
    }

    async fn install_and_load(&self, identity: &Identity) -> Result<()> {
        if !self.installer.is_installed(identity) {
            self.fetch_and_install(identity, false).await?;
        }
        self.loader.load(identity).await
    }

    async fn fetch_and_install(&self, identity: &Identity, force: bool) -> Result<()> {
        let archive = self.cache.fetch(identity, force).await?;
        self.installer.install(identity, archive, force).await?;
        Ok(())
    }

    async fn try_load(&self, identity: &Identity) -> LoadOutcome {
        if !self.config.enable_plugins {
            return LoadOutcome::Disabled;
        }

        match self.loader.load(identity).await {
            Ok(()) => LoadOutcome::Loaded,
            Err(e) => {
                tracing::error!(plugin = %identity, "Failed to load plugin: {}", e);
                LoadOutcome::Failed(e)
            }
        }
    }

    async fn unload_tolerant(&self, identity: &Identity) -> Result<()> {
        match self.loader.unload(identity).await {
            Err(e) if e.is_recoverable() => {
                tracing::warn!(plugin = %identity, "{}", e);
                Ok(())
            }
            other => other,
        }
    }

    // ========== Resolution ==========

    /// Turn user input into an identity.
    ///
    /// A registry name resolves through the catalog; anything else must be a
    /// plugin reference. With `check_version`, a registry entry requiring a
    /// newer service version is rejected.
    pub async fn resolve(&self, input: &str, check_version: bool) -> Result<Identity> {
        self.gate.wait().await;

        let input = input.trim();
        if let Some(entry) = self.registry.get(input).await {
            if check_version {
                self.ensure_compatible(&entry)?;
            }
            return entry.identity();
        }

        Identity::parse(input, false)
    }

    fn ensure_compatible(&self, entry: &RegistryEntry) -> Result<()> {
        if !self.config.version_gating || entry.is_compatible(&self.config.service_version) {
            return Ok(());
        }

        Err(PluginError::VersionMismatch {
            plugin: entry.name.clone(),
            required: entry.min_version.clone().unwrap_or_default(),
            found: self.config.service_version.clone(),
        })
    }

    /// Version check for an identity that may be in the registry.
    async fn ensure_identity_compatible(&self, identity: &Identity) -> Result<()> {
        if let Some(entry) = self.registry.get(&identity.name).await {
            if entry.identity().ok().as_ref() == Some(identity) {
                self.ensure_compatible(&entry)?;
            }
        }
        Ok(())
    }

    async fn name_is_loaded(&self, name: &str) -> bool {
        self.loader.loaded().await.iter().any(|loaded| loaded.name == name)
    }

    // ========== Mutations ==========

    /// Install a plugin and, when loading is enabled, activate it.
    ///
    /// Rejects a plain name that is reserved or already taken by a loaded
    /// plugin from another repo or branch, before anything is fetched.
    pub async fn add(&self, identity: &Identity) -> Result<LoadOutcome> {
        self.gate.wait().await;
        let mut set = self.install_set.lock().await;

        if set.contains(identity) {
            return Err(PluginError::AlreadyInstalled(identity.to_string()));
        }
        if self.config.is_reserved(&identity.name) || self.name_is_loaded(&identity.name).await {
            return Err(PluginError::NameCollision(identity.name.clone()));
        }

        self.fetch_and_install(identity, true).await?;
        set.append(identity).await?;
        tracing::info!(plugin = %identity, "Installed plugin");

        Ok(self.try_load(identity).await)
    }

    /// Resolve input then [`add`](Self::add) it.
    pub async fn add_reference(&self, input: &str) -> Result<(Identity, LoadOutcome)> {
        let identity = self.resolve(input, true).await?;
        let outcome = self.add(&identity).await?;
        Ok((identity, outcome))
    }

    /// Unload, forget and delete a plugin.
    ///
    /// Deleting the install directory is best effort; the persisted entry is
    /// gone either way.
    pub async fn remove(&self, identity: &Identity) -> Result<()> {
        self.gate.wait().await;
        let mut set = self.install_set.lock().await;

        if !set.contains(identity) {
            return Err(PluginError::NotInstalled(identity.to_string()));
        }

        if self.loader.is_loaded(identity).await {
            self.unload_tolerant(identity).await?;
        }

        set.remove(identity).await?;

        if let Err(e) = self.installer.uninstall(identity).await {
            tracing::warn!(plugin = %identity, "Failed to delete plugin files: {}", e);
        }

        tracing::info!(plugin = %identity, "Removed plugin");
        Ok(())
    }

    /// Resolve input then [`remove`](Self::remove) it.
    pub async fn remove_reference(&self, input: &str) -> Result<Identity> {
        let identity = self.resolve(input, false).await?;
        self.remove(&identity).await?;
        Ok(identity)
    }

    /// Refetch and reinstall a plugin, then reload it.
    ///
    /// The persisted entry is left in place throughout.
    pub async fn update(&self, identity: &Identity) -> Result<LoadOutcome> {
        self.gate.wait().await;
        let set = self.install_set.lock().await;

        if !set.contains(identity) {
            return Err(PluginError::NotInstalled(identity.to_string()));
        }

        self.fetch_and_install(identity, true).await?;

        if self.loader.is_loaded(identity).await {
            self.unload_tolerant(identity).await?;
        }

        let outcome = self.try_load(identity).await;
        drop(set);

        tracing::info!(plugin = %identity, loaded = outcome.is_loaded(), "Updated plugin");
        Ok(outcome)
    }

    /// Resolve input then [`update`](Self::update) it.
    pub async fn update_reference(&self, input: &str) -> Result<(Identity, LoadOutcome)> {
        let identity = self.resolve(input, true).await?;
        let outcome = self.update(&identity).await?;
        Ok((identity, outcome))
    }

    /// Update every installed plugin in order.
    ///
    /// A failure is logged and the remaining plugins are still attempted.
    pub async fn update_all(&self) -> Vec<(Identity, Result<LoadOutcome>)> {
        self.gate.wait().await;
        let identities = self.install_set.lock().await.identities();

        let mut results = Vec::with_capacity(identities.len());
        for identity in identities {
            let result = match self.ensure_identity_compatible(&identity).await {
                Ok(()) => self.update(&identity).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::error!(plugin = %identity, "Failed to update plugin: {}", e);
            }
            results.push((identity, result));
        }
        results
    }

    /// Deactivate every loaded plugin.
    pub async fn shutdown(&self) {
        for identity in self.loader.loaded().await {
            if let Err(e) = self.loader.unload(&identity).await {
                tracing::warn!(plugin = %identity, "Failed to unload plugin: {}", e);
            }
        }
    }

    // ========== Queries ==========

    /// Loaded plugins, case-insensitively sorted by name.
    pub async fn loaded_plugins(&self) -> Vec<Identity> {
        self.gate.wait().await;
        self.loader.loaded().await
    }

    /// The persisted install list, in order.
    pub async fn installed_plugins(&self) -> Vec<String> {
        self.gate.wait().await;
        self.install_set.lock().await.entries().to_vec()
    }

    pub async fn is_loaded(&self, identity: &Identity) -> bool {
        self.loader.is_loaded(identity).await
    }

    /// Refresh the registry and list its entries by name.
    pub async fn registry_listing(&self) -> Vec<RegistryListing> {
        self.gate.wait().await;
        self.registry.refresh().await;

        let mut listing = Vec::new();
        for entry in self.registry.entries().await {
            let loaded = match entry.identity() {
                Ok(identity) => self.loader.is_loaded(&identity).await,
                Err(_) => false,
            };
            let compatible = entry.is_compatible(&self.config.service_version);
            listing.push(RegistryListing {
                entry,
                loaded,
                compatible,
            });
        }
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::DependencyOutcome;
    use crate::identity::ExtensionId;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoopHost;

    #[async_trait]
    impl ExtensionHost for NoopHost {
        async fn activate(&self, _id: &ExtensionId, _entry: &Path) -> Result<()> {
            Ok(())
        }

        async fn deactivate(&self, id: &ExtensionId) -> Result<()> {
            Err(PluginError::NotLoaded(id.to_string()))
        }

        async fn is_active(&self, _id: &ExtensionId) -> bool {
            false
        }
    }

    struct NoopDeps;

    #[async_trait]
    impl DependencyInstaller for NoopDeps {
        async fn install(&self, _dir: &Path, _manifest: &Path) -> Result<DependencyOutcome> {
            Ok(DependencyOutcome::ok(""))
        }
    }

    async fn manager(temp: &TempDir, config: PluginHostConfig) -> PluginManager {
        let config = PluginHostConfig {
            registry_url: "http://127.0.0.1:1/registry.json".to_string(),
            archive_url_template: "http://127.0.0.1:1/{owner}/{repo}/{branch}.zip".to_string(),
            plugins_dir: temp.path().join("plugins"),
            cache_dir: temp.path().join("cache"),
            ..config
        };
        PluginManager::with_components(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoopHost),
            Arc::new(NoopDeps),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_operations_wait_for_gate() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, PluginHostConfig::default()).await;
        assert!(!manager.is_ready());

        let pending =
            tokio::time::timeout(Duration::from_millis(50), manager.installed_plugins()).await;
        assert!(pending.is_err());

        manager.initialize().await;
        assert!(manager.is_ready());
        assert!(manager.installed_plugins().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_still_opens_gate() {
        let temp = TempDir::new().unwrap();
        let config = PluginHostConfig {
            enable_plugins: false,
            ..Default::default()
        };
        let manager = manager(&temp, config).await;

        let report = manager.initialize().await;
        assert!(report.loaded.is_empty());
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_reserved_name_rejected_before_fetch() {
        let temp = TempDir::new().unwrap();
        let mut config = PluginHostConfig::default();
        config.reserved_names.insert("help".to_string());
        let manager = manager(&temp, config).await;
        manager.initialize().await;

        let id = Identity::parse("a/b/help", false).unwrap();
        let err = manager.add(&id).await.unwrap_err();
        assert!(matches!(err, PluginError::NameCollision(_)));
        assert!(!temp.path().join("cache").exists());
    }

    #[tokio::test]
    async fn test_remove_and_update_require_installed() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, PluginHostConfig::default()).await;
        manager.initialize().await;

        let id = Identity::parse("a/b/c", false).unwrap();
        assert!(matches!(
            manager.remove(&id).await,
            Err(PluginError::NotInstalled(_))
        ));
        assert!(matches!(
            manager.update(&id).await,
            Err(PluginError::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_reference() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, PluginHostConfig::default()).await;
        manager.initialize().await;

        let id = manager.resolve(" a/b/c@dev ", true).await.unwrap();
        assert_eq!(id.to_string(), "a/b/c@dev");
        assert!(matches!(
            manager.resolve("unknown-name", true).await,
            Err(PluginError::Parse { .. })
        ));
    }
}
