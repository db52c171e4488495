//! Extension host: activates plugin code inside the running process.
//!
//! The default host runs each plugin's `<name>.wasm` entry unit in wasmtime.
//!
//! # Security
//!
//! Plugins run with full trust, but every instance is still bounded:
//! - CPU: fuel-limited `init` and `shutdown` calls
//! - Memory: configurable maximum linear memory per instance

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;
use wasmtime::{Config, Engine, Instance, Module, Store, StoreLimits, StoreLimitsBuilder};

use crate::config::RuntimeConfig;
use crate::identity::ExtensionId;
use crate::{PluginError, Result};

/// Maximum number of instances per plugin store.
const MAX_INSTANCES: usize = 10;

/// Maximum number of tables per instance.
const MAX_TABLES: usize = 10;

/// Maximum number of memories per instance.
const MAX_MEMORIES: usize = 1;

/// Dynamic code activation.
///
/// After `activate` the behaviour identified by `id` is live; after
/// `deactivate` it is inert. An id may be activated again once deactivated.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Activate the entry unit at `entry` under `id`.
    async fn activate(&self, id: &ExtensionId, entry: &Path) -> Result<()>;

    /// Deactivate `id`. Returns [`PluginError::NotLoaded`] if it is not active.
    async fn deactivate(&self, id: &ExtensionId) -> Result<()>;

    async fn is_active(&self, id: &ExtensionId) -> bool;
}

struct ActiveExtension {
    store: Store<StoreLimits>,
    instance: Instance,
}

/// Extension host backed by wasmtime.
pub struct WasmExtensionHost {
    engine: Engine,
    limits: RuntimeConfig,
    active: Mutex<HashMap<ExtensionId, ActiveExtension>>,
}

impl WasmExtensionHost {
    /// Create a host with fuel metering enabled.
    pub fn new(limits: RuntimeConfig) -> Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);

        let engine = Engine::new(&config)
            .map_err(|e| PluginError::Config(format!("Failed to create WASM engine: {}", e)))?;

        Ok(Self {
            engine,
            limits,
            active: Mutex::new(HashMap::new()),
        })
    }

    fn new_store(&self, id: &ExtensionId) -> Result<Store<StoreLimits>> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.max_memory_bytes)
            .instances(MAX_INSTANCES)
            .tables(MAX_TABLES)
            .memories(MAX_MEMORIES)
            .build();

        let mut store = Store::new(&self.engine, limits);
        store.limiter(|limits| limits);
        store
            .set_fuel(self.limits.fuel_limit)
            .map_err(|e| PluginError::load_error(id.as_str(), format!("Failed to set fuel: {}", e)))?;
        Ok(store)
    }

    /// Call an optional `() -> i32` export. Missing exports return `Ok(None)`.
    fn call_optional(
        store: &mut Store<StoreLimits>,
        instance: &Instance,
        name: &str,
    ) -> std::result::Result<Option<i32>, String> {
        let Some(func) = instance.get_func(&mut *store, name) else {
            return Ok(None);
        };

        let func = func
            .typed::<(), i32>(&*store)
            .map_err(|e| format!("export '{}' has the wrong signature: {}", name, e))?;

        func.call(&mut *store, ())
            .map(Some)
            .map_err(|e| format!("'{}' failed: {}", name, e))
    }
}

#[async_trait]
impl ExtensionHost for WasmExtensionHost {
    async fn activate(&self, id: &ExtensionId, entry: &Path) -> Result<()> {
        if self.is_active(id).await {
            return Err(PluginError::load_error(id.as_str(), "already active"));
        }

        let engine = self.engine.clone();
        let path = entry.to_path_buf();
        let module = tokio::task::spawn_blocking(move || Module::from_file(&engine, &path))
            .await
            .map_err(|e| PluginError::load_error(id.as_str(), format!("Compile task failed: {}", e)))?
            .map_err(|e| {
                PluginError::load_error(
                    id.as_str(),
                    format!("Failed to compile {}: {}", entry.display(), e),
                )
            })?;

        let mut active = self.active.lock().await;
        if active.contains_key(id) {
            return Err(PluginError::load_error(id.as_str(), "already active"));
        }

        let mut store = self.new_store(id)?;
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| PluginError::load_error(id.as_str(), e.to_string()))?;

        match Self::call_optional(&mut store, &instance, "init") {
            Ok(None) | Ok(Some(0)) => {}
            Ok(Some(code)) => {
                return Err(PluginError::load_error(
                    id.as_str(),
                    format!("init returned {}", code),
                ));
            }
            Err(message) => return Err(PluginError::load_error(id.as_str(), message)),
        }

        tracing::debug!("Activated extension {}", id);
        active.insert(id.clone(), ActiveExtension { store, instance });
        Ok(())
    }

    async fn deactivate(&self, id: &ExtensionId) -> Result<()> {
        let Some(mut extension) = self.active.lock().await.remove(id) else {
            return Err(PluginError::NotLoaded(id.to_string()));
        };

        if let Err(e) = extension.store.set_fuel(self.limits.fuel_limit) {
            tracing::warn!("Failed to refuel {} for shutdown: {}", id, e);
        }

        match Self::call_optional(&mut extension.store, &extension.instance, "shutdown") {
            Ok(Some(code)) if code != 0 => {
                tracing::warn!("Extension {} shutdown returned {}", id, code);
            }
            Ok(_) => {}
            Err(message) => tracing::warn!("Extension {} shutdown: {}", id, message),
        }

        tracing::debug!("Deactivated extension {}", id);
        Ok(())
    }

    async fn is_active(&self, id: &ExtensionId) -> bool {
        self.active.lock().await.contains_key(id)
    }
}
