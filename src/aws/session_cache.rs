use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::SessionCredential;
use crate::{
    constants::SAFETY_MARGIN,
    error::{Result, VaultError},
    secret_store::SecretStore,
};

const SESSION_PREFIX: &str = "session:";

/// Namespace for session fingerprints, fixed so keys stay stable across
/// releases.
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_3a52_9d0e_4b7a_8c21_5e4f_0a9b_d713);

/// Identity of a cached session: the profile plus every parameter that
/// changes which credentials STS would hand back.
///
/// The issuing identity is not part of the storage key. It is recorded in
/// the entry instead, so a renewed parent overwrites the same entry rather
/// than adding one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub profile: String,
    pub role_arn: Option<String>,
    pub mfa_serial: Option<String>,
    pub duration: Duration,
    /// Access key the session was issued to: the master key for a chain
    /// root, the calling session for a role step
    pub issuer: String,
}

impl SessionKey {
    /// Key for a chain root's GetSessionToken result.
    pub fn root(
        profile: &str,
        mfa_serial: Option<&str>,
        duration: Duration,
        master_access_key_id: &str,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            role_arn: None,
            mfa_serial: mfa_serial.map(str::to_string),
            duration,
            issuer: master_access_key_id.to_string(),
        }
    }

    /// Key for an AssumeRole result made with `caller_access_key_id` as
    /// caller.
    pub fn role(
        profile: &str,
        role_arn: &str,
        mfa_serial: Option<&str>,
        duration: Duration,
        caller_access_key_id: &str,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            role_arn: Some(role_arn.to_string()),
            mfa_serial: mfa_serial.map(str::to_string),
            duration,
            issuer: caller_access_key_id.to_string(),
        }
    }

    fn fingerprint(&self) -> String {
        let canonical = format!(
            "role_arn={}\nmfa_serial={}\nduration={}",
            self.role_arn.as_deref().unwrap_or_default(),
            self.mfa_serial.as_deref().unwrap_or_default(),
            self.duration.as_secs(),
        );
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, canonical.as_bytes())
            .simple()
            .to_string()
    }

    fn issuer_fingerprint(&self) -> String {
        let canonical = format!("issuer={}", self.issuer);
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, canonical.as_bytes())
            .simple()
            .to_string()
    }

    /// Name of the secret store entry holding this session.
    pub fn storage_key(&self) -> String {
        format!("{SESSION_PREFIX}{}:{}", self.profile, self.fingerprint())
    }

    /// Profile component of a session storage key, if `key` is one.
    pub fn profile_of(key: &str) -> Option<&str> {
        key.strip_prefix(SESSION_PREFIX)?
            .rsplit_once(':')
            .map(|(profile, _)| profile)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSession {
    profile: String,
    issuer: String,
    credential: SessionCredential,
}

/// Temporary credentials persisted in the secret store.
///
/// Entries are opaque JSON blobs. Expired, unreadable or foreign-issuer
/// entries are misses; expired and unreadable ones are also removed.
#[derive(Debug, Clone)]
pub struct SessionCache {
    store: Arc<dyn SecretStore>,
    margin: Duration,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            margin: SAFETY_MARGIN,
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    pub async fn get(&self, key: &SessionKey) -> Result<Option<SessionCredential>> {
        self.get_at(key, Utc::now()).await
    }

    /// Cached session for `key` if it is still valid at `now` minus the
    /// safety margin.
    pub async fn get_at(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionCredential>> {
        let storage_key = key.storage_key();
        let Some(data) = self.store.get(&storage_key).await? else {
            debug!(key = %storage_key, "Session cache miss");
            return Ok(None);
        };

        let cached: CachedSession = match serde_json::from_str(&data) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Ignoring unreadable cached session");
                self.discard(&storage_key).await;
                return Ok(None);
            }
        };

        if cached.issuer != key.issuer_fingerprint() {
            debug!(key = %storage_key, "Cached session was issued to a different identity");
            return Ok(None);
        }

        if !cached.credential.is_valid_at(now, self.margin) {
            debug!(
                key = %storage_key,
                expiration = %cached.credential.expiration,
                "Cached session expired"
            );
            self.discard(&storage_key).await;
            return Ok(None);
        }

        debug!(key = %storage_key, "Session cache hit");
        Ok(Some(cached.credential))
    }

    pub async fn put(&self, key: &SessionKey, credential: &SessionCredential) -> Result<()> {
        let cached = CachedSession {
            profile: key.profile.clone(),
            issuer: key.issuer_fingerprint(),
            credential: credential.clone(),
        };
        let data = serde_json::to_string(&cached)
            .map_err(|e| VaultError::InvalidInput(format!("cannot serialize session: {e}")))?;

        self.store.set(&key.storage_key(), &data).await
    }

    /// Best-effort removal of an entry that can never be served again.
    async fn discard(&self, storage_key: &str) {
        if let Err(e) = self.store.remove(storage_key).await {
            warn!(key = %storage_key, error = %e, "Failed to remove stale cached session");
        }
    }

    /// Storage keys of every cached session belonging to `profile`.
    pub async fn keys_for(&self, profile: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| SessionKey::profile_of(key) == Some(profile))
            .collect())
    }

    /// Remove every cached session for `profile`, returning how many were
    /// removed.
    pub async fn delete_all(&self, profile: &str) -> Result<usize> {
        let keys = self.keys_for(profile).await?;

        for key in &keys {
            self.store.remove(key).await?;
        }

        debug!(profile, count = keys.len(), "Deleted cached sessions");
        Ok(keys.len())
    }
}
