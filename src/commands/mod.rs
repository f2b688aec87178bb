pub mod add;
pub mod completions;
pub mod exec;
pub mod list;
pub mod login;
pub mod remove;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use add::AddCommand;
pub use completions::CompletionsCommand;
pub use exec::ExecCommand;
pub use list::ListCommand;
pub use login::LoginCommand;
pub use remove::RemoveCommand;

use crate::{
    aws::{
        master::MasterCredentialStore,
        resolver::CredentialResolver,
        session_cache::SessionCache,
        sts::{AwsStsProvider, StsProvider},
    },
    config,
    profile::ProfileGraph,
    prompt::{MfaPrompt, TerminalPrompt},
    secret_store::{KeyringSecretStore, SecretStore},
};

/// Stores and profile graph shared by every command.
#[derive(Debug, Clone)]
pub struct Vault {
    pub profiles: ProfileGraph,
    pub masters: MasterCredentialStore,
    pub sessions: SessionCache,
}

impl Vault {
    pub fn new(profiles: ProfileGraph, store: Arc<dyn SecretStore>) -> Self {
        let sessions = SessionCache::new(store.clone());
        let masters = MasterCredentialStore::new(store, sessions.clone());
        Self {
            profiles,
            masters,
            sessions,
        }
    }

    /// Open the OS keyring under `service` with profiles from the AWS config.
    pub fn open(service: &str) -> Result<Self> {
        let profiles = config::load().context("Failed to load AWS config")?;
        let store = Arc::new(KeyringSecretStore::new(service));
        Ok(Self::new(profiles, store))
    }

    pub fn resolver(
        &self,
        sts: Arc<dyn StsProvider>,
        prompt: Arc<dyn MfaPrompt>,
    ) -> CredentialResolver {
        CredentialResolver::new(
            self.profiles.clone(),
            self.masters.clone(),
            self.sessions.clone(),
            sts,
            prompt,
        )
    }

    /// Resolver talking to STS in the profile's region, prompting on the
    /// terminal for MFA codes.
    pub fn terminal_resolver(&self, profile: &str) -> CredentialResolver {
        let sts = AwsStsProvider::new(self.profiles.region(profile));
        self.resolver(Arc::new(sts), Arc::new(TerminalPrompt))
    }
}
