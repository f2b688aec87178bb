//! Opaque key/value storage for secret blobs.
//!
//! Each store instance is bound to one service name. Master credentials and
//! cached sessions share the service and are told apart by key prefix.

mod os;

pub use os::KeyringSecretStore;

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, VaultError};

/// Storage backend for secret blobs.
///
/// `get` returns `Ok(None)` for an absent key. Any `Err` means the backend
/// itself could not be used and must not be read as "no entry".
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write or overwrite a key.
    async fn set(&self, key: &str, data: &str) -> Result<()>;

    /// Delete a key. Deleting an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory store used by tests and by callers that want no persistence.
#[derive(Debug)]
pub struct MemorySecretStore {
    entries: RwLock<BTreeMap<String, String>>,
    available: AtomicBool,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a locked or unreachable backend.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VaultError::StoreUnavailable("memory store is locked".to_string()))
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, data: &str) -> Result<()> {
        self.check()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), data.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        store.set("master:dev", "blob").await.unwrap();

        assert_eq!(store.get("master:dev").await.unwrap().as_deref(), Some("blob"));
        assert_eq!(store.list_keys().await.unwrap(), vec!["master:dev".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_missing_key_is_none() {
        let store = MemorySecretStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_remove_is_idempotent() {
        let store = MemorySecretStore::new();
        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = MemorySecretStore::new();
        store.set_available(false);

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, VaultError::StoreUnavailable(_)));
    }
}
