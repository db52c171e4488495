//! Key/value configuration store the installed plugin list is persisted in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::Result;

/// Generic configuration store owned by the embedding service.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a value, `None` when the key has never been set.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value and persist it before returning.
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Store backed by a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<serde_json::Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            serde_json::Map::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().await;
        let mut next = values.clone();
        next.insert(key.to_string(), value);

        let content = serde_json::to_string_pretty(&next)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;

        *values = next;
        tracing::debug!("Persisted '{}' to {:?}", key, self.path);
        Ok(())
    }
}

/// In-memory store for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one key.
    pub fn with_value(key: &str, value: Value) -> Self {
        let mut values = HashMap::new();
        values.insert(key.to_string(), value);
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_file_store_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("plugins.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("plugins").await.unwrap().is_none());

        store.set("plugins", json!(["a/b/c@master"])).await.unwrap();
        assert!(path.exists());

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("plugins").await.unwrap(),
            Some(json!(["a/b/c@master"]))
        );
    }

    #[tokio::test]
    async fn test_json_file_store_keeps_other_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"prefix": "?", "plugins": []}"#).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        store.set("plugins", json!(["x/y/z@dev"])).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["prefix"], json!("?"));
        assert_eq!(raw["plugins"], json!(["x/y/z@dev"]));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::with_value("plugins", json!([]));
        assert_eq!(store.get("plugins").await.unwrap(), Some(json!([])));
        store.set("plugins", json!(["a/b/c@master"])).await.unwrap();
        assert_eq!(
            store.get("plugins").await.unwrap(),
            Some(json!(["a/b/c@master"]))
        );
    }
}
