//! # Cortex Plugin Host
//!
//! Fetches, installs and activates third-party plugins for a running Cortex
//! service, and keeps the on-disk install tree consistent with the persisted
//! list of installed plugins.
//!
//! ## Lifecycle
//!
//! A plugin reference `owner/repo/name@branch` resolves to an [`Identity`].
//! Installing it downloads the repository archive once per branch, extracts
//! only the `name/` subtree into its own directory, runs the dependency step
//! when a `requirements.txt` is present, and activates `name.wasm` in the
//! extension host.
//!
//! ```text
//! plugins/
//! └── owner/
//!     └── repo/
//!         └── name-branch/
//!             ├── name.wasm         # Entry unit
//!             └── requirements.txt  # Optional dependency manifest
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use cortex_plugin_host::{JsonFileStore, PluginHostConfig, PluginManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PluginHostConfig::default();
//!     let store = Arc::new(JsonFileStore::open(&config.state_file)?);
//!     let manager = PluginManager::new(config, store).await?;
//!
//!     // Registry refresh and bulk load, then the readiness gate opens
//!     manager.initialize().await;
//!
//!     manager.add_reference("kyb3r/modmail-plugins/dragory").await?;
//!     for identity in manager.loaded_plugins().await {
//!         println!("{identity}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod gate;
pub mod identity;
pub mod install_set;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod runtime;
pub mod store;

pub use cache::ArtifactCache;
pub use config::{DependencyConfig, PluginHostConfig, RuntimeConfig, default_config_path};
pub use dependencies::{CommandDependencyInstaller, DependencyInstaller, DependencyOutcome};
pub use error::{PluginError, Result};
pub use gate::ReadinessGate;
pub use identity::{ExtensionId, Identity};
pub use install_set::InstallSet;
pub use installer::{InstallReport, SelectiveInstaller};
pub use loader::PluginLoader;
pub use manager::{BulkLoadReport, LoadOutcome, PluginManager, RegistryListing};
pub use registry::{RegistryClient, RegistryEntry};
pub use runtime::{ExtensionHost, WasmExtensionHost};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};

/// Plugin host version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Branch assumed when a reference omits `@branch`
pub const DEFAULT_BRANCH: &str = "master";

/// Configuration store key holding the installed plugin list
pub const PLUGINS_KEY: &str = "plugins";

/// Optional dependency manifest at a plugin's install root
pub const DEPENDENCY_MANIFEST: &str = "requirements.txt";

/// File extension of a plugin's entry unit
pub const ENTRY_EXTENSION: &str = "wasm";

/// Curated plugin registry
pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/kyb3r/modmail/master/plugins/registry.json";

/// Repository archive download URL
pub const DEFAULT_ARCHIVE_URL_TEMPLATE: &str =
    "https://github.com/{owner}/{repo}/archive/{branch}.zip";
