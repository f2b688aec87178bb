use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod console;
pub mod master;
pub mod resolver;
pub mod session_cache;
pub mod sts;

pub use crate::constants::DEFAULT_AWS_REGION;

/// Long-term access key pair for one profile. Never expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for MasterCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Temporary credentials issued by STS.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: DateTime<Utc>,
}

impl SessionCredential {
    /// Valid while `now < expiration - margin`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match chrono::Duration::from_std(margin) {
            Ok(margin) => now < self.expiration - margin,
            Err(_) => false,
        }
    }

    /// Still accepted by AWS, ignoring any safety margin.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Credentials handed to a command, with the profile they came from.
#[derive(Clone)]
pub struct ResolvedIdentity {
    pub profile: String,
    pub region: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl ResolvedIdentity {
    pub fn from_session(profile: &str, region: Option<String>, creds: SessionCredential) -> Self {
        Self {
            profile: profile.to_string(),
            region,
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration: Some(creds.expiration),
        }
    }

    pub fn from_master(profile: &str, region: Option<String>, creds: MasterCredential) -> Self {
        Self {
            profile: profile.to_string(),
            region,
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: None,
            expiration: None,
        }
    }
}

impl ResolvedIdentity {
    /// The temporary credential behind this identity, if it is one.
    pub fn to_session(&self) -> Option<SessionCredential> {
        Some(SessionCredential {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            expiration: self.expiration?,
        })
    }
}

impl fmt::Debug for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedIdentity")
            .field("profile", &self.profile)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}
