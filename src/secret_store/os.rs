use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::SecretStore;
use crate::error::{Result, VaultError};

/// Key under which the list of stored keys is kept, since OS keyrings
/// cannot enumerate entries.
const INDEX_KEY: &str = "__index__";

/// Secret store backed by the platform keyring (Keychain, Credential
/// Manager, Secret Service).
///
/// Keyring calls may block on an unlock prompt, so they run on the blocking
/// pool.
#[derive(Debug)]
pub struct KeyringSecretStore {
    service: String,
    index_lock: Mutex<()>,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn blocking<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> Result<T> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key).map_err(backend_error)?;
            f(entry)
        })
        .await
        .map_err(|e| VaultError::StoreUnavailable(e.to_string()))?
    }

    async fn read_index(&self) -> Result<BTreeSet<String>> {
        let raw = self.blocking(INDEX_KEY, read_entry).await?;
        Ok(raw.map(|data| decode_index(&data)).unwrap_or_default())
    }

    async fn update_index(&self, f: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;

        if !f(&mut index) {
            return Ok(());
        }

        let data = encode_index(&index)?;
        self.blocking(INDEX_KEY, move |entry| {
            entry.set_password(&data).map_err(backend_error)
        })
        .await
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.blocking(key, read_entry).await
    }

    async fn set(&self, key: &str, data: &str) -> Result<()> {
        let data = data.to_string();
        self.blocking(key, move |entry| {
            entry.set_password(&data).map_err(backend_error)
        })
        .await?;

        let key = key.to_string();
        self.update_index(|index| index.insert(key)).await?;
        debug!(service = %self.service, "Stored keyring entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.blocking(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(backend_error(e)),
        })
        .await?;

        self.update_index(|index| index.remove(key)).await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.read_index().await?.into_iter().collect())
    }
}

fn read_entry(entry: keyring::Entry) -> Result<Option<String>> {
    match entry.get_password() {
        Ok(data) => Ok(Some(data)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(backend_error(e)),
    }
}

fn backend_error(e: keyring::Error) -> VaultError {
    VaultError::StoreUnavailable(e.to_string())
}

/// A corrupt index is treated as empty; entries remain readable by key.
fn decode_index(data: &str) -> BTreeSet<String> {
    serde_json::from_str(data).unwrap_or_default()
}

fn encode_index(index: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(index).map_err(|e| VaultError::StoreUnavailable(e.to_string()))
}
