//! Persisted, ordered list of installed plugins.

use std::sync::Arc;

use serde_json::Value;

use crate::identity::Identity;
use crate::store::ConfigStore;
use crate::{PLUGINS_KEY, PluginError, Result};

/// The installed plugin list, mirrored from the configuration store.
///
/// Entries are kept as the stored strings so legacy references survive until
/// the bulk load rewrites them. Every mutation is persisted before the
/// in-memory copy changes.
pub struct InstallSet {
    store: Arc<dyn ConfigStore>,
    entries: Vec<String>,
}

impl InstallSet {
    /// Read the list from the store. A missing key is an empty list.
    pub async fn load(store: Arc<dyn ConfigStore>) -> Result<Self> {
        let entries = match store.get(PLUGINS_KEY).await? {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                PluginError::Serialization(format!("'{PLUGINS_KEY}' must be a list of strings: {e}"))
            })?,
        };

        Ok(Self { store, entries })
    }

    /// Raw stored entries, in order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the identity's canonical form is in the list.
    pub fn contains(&self, identity: &Identity) -> bool {
        let key = identity.to_string();
        self.entries.iter().any(|e| *e == key)
    }

    /// Entries that parse as full references, in stored order.
    pub fn identities(&self) -> Vec<Identity> {
        self.entries
            .iter()
            .filter_map(|e| Identity::parse(e, true).ok())
            .collect()
    }

    /// Append an identity and persist the list.
    pub async fn append(&mut self, identity: &Identity) -> Result<()> {
        let mut next = self.entries.clone();
        next.push(identity.to_string());
        self.replace_all(next).await
    }

    /// Remove an identity and persist the list. Returns whether it was present.
    pub async fn remove(&mut self, identity: &Identity) -> Result<bool> {
        let key = identity.to_string();
        if !self.entries.iter().any(|e| *e == key) {
            return Ok(false);
        }

        let next = self.entries.iter().filter(|e| **e != key).cloned().collect();
        self.replace_all(next).await?;
        Ok(true)
    }

    /// Replace the whole list and persist it.
    pub async fn replace_all(&mut self, entries: Vec<String>) -> Result<()> {
        self.store
            .set(PLUGINS_KEY, Value::from(entries.clone()))
            .await?;
        self.entries = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn id(text: &str) -> Identity {
        Identity::parse(text, false).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let set = InstallSet::load(Arc::new(MemoryStore::new())).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_list() {
        let store = Arc::new(MemoryStore::with_value(PLUGINS_KEY, json!({"a": 1})));
        assert!(matches!(
            InstallSet::load(store).await,
            Err(PluginError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_append_and_remove_persist() {
        let store = Arc::new(MemoryStore::new());
        let mut set = InstallSet::load(store.clone()).await.unwrap();

        set.append(&id("a/b/c")).await.unwrap();
        set.append(&id("d/e/f@dev")).await.unwrap();
        assert!(set.contains(&id("a/b/c@master")));
        assert_eq!(
            store.get(PLUGINS_KEY).await.unwrap(),
            Some(json!(["a/b/c@master", "d/e/f@dev"]))
        );

        assert!(set.remove(&id("a/b/c")).await.unwrap());
        assert!(!set.remove(&id("a/b/c")).await.unwrap());
        assert_eq!(
            store.get(PLUGINS_KEY).await.unwrap(),
            Some(json!(["d/e/f@dev"]))
        );
    }

    #[tokio::test]
    async fn test_legacy_entries_are_not_identities() {
        let store = Arc::new(MemoryStore::with_value(
            PLUGINS_KEY,
            json!(["a/b/c", "d/e/f@dev"]),
        ));
        let set = InstallSet::load(store).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.identities(), vec![id("d/e/f@dev")]);
        assert!(!set.contains(&id("a/b/c")));
    }
}
