//! Settings store boundary.
//!
//! Durable key/value persistence that survives process restarts. The manager
//! keeps two documents here: the hostname → charset intent map (the source of
//! truth for what the user asked for) and a snapshot of currently installed
//! rules kept purely for diagnostics.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

/// Store key holding the full hostname → charset label map.
pub const INTENT_KEY: &str = "charsetIntent";

/// Store key holding the installed-rule snapshot (hostname, id pairs).
pub const ACTIVE_RULES_KEY: &str = "activeRules";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable key/value storage. Values are JSON documents; absent keys read
/// back as `None`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SettingsStore + ?Sized> SettingsStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryStoreState {
    documents: BTreeMap<String, Value>,
    write_failure_budget: u32,
}

/// Map-backed store for tests and the simulation CLI.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<MemoryStoreState>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` writes (set or delete) fail with
    /// [`StoreError::Unavailable`]. Reads are unaffected.
    pub fn fail_next_writes(&self, n: u32) {
        self.inner.lock().write_failure_budget = n;
    }

    /// Raw view of a stored document, bypassing the trait.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.lock().documents.get(key).cloned()
    }

    fn consume_write_budget(&self) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        if state.write_failure_budget > 0 {
            state.write_failure_budget -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.lock().documents.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.consume_write_budget()?;
        self.inner.lock().documents.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.consume_write_budget()?;
        self.inner.lock().documents.remove(key);
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Single-file store: every key lives in one pretty-printed JSON object.
/// Used by the CLI so sessions survive between runs.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, documents: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(documents)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut documents = self.load()?;
        Ok(documents.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut documents = self.load()?;
        documents.insert(key.to_string(), value);
        self.save(&documents)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut documents = self.load()?;
        if documents.remove(key).is_some() {
            self.save(&documents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "charset-switch-store-{}-{}.json",
            tag,
            std::process::id()
        ));
        path
    }

    #[tokio::test]
    async fn memory_store_set_get_delete() {
        let store = MemorySettingsStore::new();
        assert!(store.get(INTENT_KEY).await.unwrap().is_none());

        store
            .set(INTENT_KEY, json!({"example.com": "GBK"}))
            .await
            .unwrap();
        assert_eq!(
            store.get(INTENT_KEY).await.unwrap(),
            Some(json!({"example.com": "GBK"}))
        );

        store.delete(INTENT_KEY).await.unwrap();
        assert!(store.get(INTENT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_write_faults_consume_budget() {
        let store = MemorySettingsStore::new();
        store.fail_next_writes(1);

        let err = store.set("k", json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set("k", json!(2)).await.unwrap();
        assert_eq!(store.peek("k"), Some(json!(2)));
    }

    #[tokio::test]
    async fn memory_store_delete_absent_key_is_noop() {
        let store = MemorySettingsStore::new();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let path = temp_store_path("persist");
        let _ = fs::remove_file(&path);

        {
            let store = JsonFileStore::new(&path);
            store
                .set(INTENT_KEY, json!({"example.jp": "Shift_JIS"}))
                .await
                .unwrap();
            store.set(ACTIVE_RULES_KEY, json!([])).await.unwrap();
        }

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get(INTENT_KEY).await.unwrap(),
            Some(json!({"example.jp": "Shift_JIS"}))
        );
        assert_eq!(reopened.get(ACTIVE_RULES_KEY).await.unwrap(), Some(json!([])));

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn file_store_missing_file_reads_as_empty() {
        let path = temp_store_path("missing");
        let _ = fs::remove_file(&path);

        let store = JsonFileStore::new(&path);
        assert!(store.get(INTENT_KEY).await.unwrap().is_none());

        store.delete(INTENT_KEY).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn file_store_delete_rewrites_document() {
        let path = temp_store_path("delete");
        let _ = fs::remove_file(&path);

        let store = JsonFileStore::new(&path);
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();
        store.delete("a").await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));

        fs::remove_file(&path).unwrap();
    }
}
