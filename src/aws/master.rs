use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{MasterCredential, session_cache::SessionCache};
use crate::{
    error::{Result, VaultError},
    secret_store::SecretStore,
};

const MASTER_PREFIX: &str = "master:";

/// Long-term access keys, one entry per profile.
#[derive(Debug, Clone)]
pub struct MasterCredentialStore {
    store: Arc<dyn SecretStore>,
    sessions: SessionCache,
}

impl MasterCredentialStore {
    pub fn new(store: Arc<dyn SecretStore>, sessions: SessionCache) -> Self {
        Self { store, sessions }
    }

    fn key(profile: &str) -> String {
        format!("{MASTER_PREFIX}{profile}")
    }

    /// Profiles that have a stored master credential.
    pub async fn profiles(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(MASTER_PREFIX).map(str::to_string))
            .collect())
    }

    /// Write or replace the key pair for `profile`.
    ///
    /// Sessions derived from the previous pair are deleted; the number
    /// removed is returned.
    pub async fn store(&self, profile: &str, creds: &MasterCredential) -> Result<usize> {
        if creds.access_key_id.trim().is_empty() {
            return Err(VaultError::InvalidInput("access key id is empty".to_string()));
        }
        if creds.secret_access_key.trim().is_empty() {
            return Err(VaultError::InvalidInput(
                "secret access key is empty".to_string(),
            ));
        }

        let data = serde_json::to_string(creds)
            .map_err(|e| VaultError::InvalidInput(format!("cannot serialize credential: {e}")))?;
        self.store.set(&Self::key(profile), &data).await?;
        info!(profile, "Stored master credential");

        self.sessions.delete_all(profile).await
    }

    pub async fn retrieve(&self, profile: &str) -> Result<MasterCredential> {
        let data = self
            .store
            .get(&Self::key(profile))
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("master credential for '{profile}'")))?;

        serde_json::from_str(&data).map_err(|e| {
            warn!(profile, error = %e, "Stored master credential is unreadable");
            VaultError::InvalidInput(format!(
                "stored credential for '{profile}' is corrupt, add it again"
            ))
        })
    }

    pub async fn exists(&self, profile: &str) -> Result<bool> {
        Ok(self.store.get(&Self::key(profile)).await?.is_some())
    }

    /// Delete the key pair for `profile`. Removing an absent entry succeeds.
    pub async fn remove(&self, profile: &str) -> Result<()> {
        self.store.remove(&Self::key(profile)).await?;
        debug!(profile, "Removed master credential");
        Ok(())
    }
}
