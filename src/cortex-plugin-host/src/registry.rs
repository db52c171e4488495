//! Client for the curated remote plugin registry.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::identity::Identity;
use crate::{PluginError, Result};

/// One curated plugin, as published in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Registry key; filled in from the map key, not the JSON body
    #[serde(skip)]
    pub name: String,

    /// `owner/repo`
    pub repository: String,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub icon_url: Option<String>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    /// Minimum service version the plugin runs on
    #[serde(default, rename = "bot_version")]
    pub min_version: Option<String>,
}

impl RegistryEntry {
    /// Identity this entry installs.
    pub fn identity(&self) -> Result<Identity> {
        let (owner, repo) = self
            .repository
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| {
                PluginError::parse_error(&self.repository, "registry repository must be owner/repo")
            })?;

        Ok(Identity::new(owner, repo, &self.name, self.branch.clone()))
    }

    /// Whether `running` satisfies the entry's minimum version.
    ///
    /// Entries without a minimum, or with one that does not parse, are compatible.
    pub fn is_compatible(&self, running: &str) -> bool {
        match &self.min_version {
            Some(required) => version_satisfies(required, running),
            None => true,
        }
    }
}

/// Registry client holding the last successfully fetched catalog.
pub struct RegistryClient {
    client: reqwest::Client,
    url: String,
    entries: RwLock<BTreeMap<String, RegistryEntry>>,
}

impl RegistryClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replace the catalog with the latest remote copy.
    ///
    /// Failures are logged and leave the previous catalog in place.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(entries) => {
                tracing::debug!("Fetched {} registry entries", entries.len());
                *self.entries.write().await = entries;
            }
            Err(e) => {
                tracing::warn!("Failed to refresh plugin registry: {}", e);
            }
        }
    }

    async fn fetch(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PluginError::fetch_error(&self.url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(PluginError::fetch_error(
                &self.url,
                format!("HTTP {}", response.status()),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PluginError::fetch_error(&self.url, e.to_string()))?;

        let mut entries: BTreeMap<String, RegistryEntry> = serde_json::from_slice(&body)?;
        for (name, entry) in entries.iter_mut() {
            entry.name = name.clone();
        }
        Ok(entries)
    }

    /// Look up an entry by exact name.
    pub async fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(name).cloned()
    }

    /// All entries, sorted by name.
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        self.entries.read().await.values().cloned().collect()
    }
}

/// Compare versions, padding short forms such as `3.4` to `3.4.0`.
pub fn version_satisfies(required: &str, running: &str) -> bool {
    match (lenient_version(required), lenient_version(running)) {
        (Some(required), Some(running)) => running >= required,
        _ => {
            tracing::debug!(
                "Unparseable version comparison '{}' vs '{}', allowing",
                required,
                running
            );
            true
        }
    }
}

fn lenient_version(text: &str) -> Option<semver::Version> {
    let text = text.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(text) {
        return Some(version);
    }

    let (core, rest) = match text.find(['-', '+']) {
        Some(idx) => text.split_at(idx),
        None => (text, ""),
    };
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}
