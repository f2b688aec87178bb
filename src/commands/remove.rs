use anyhow::{Context, Result};
use clap::Args;

use super::Vault;

#[derive(Debug, Clone, Args)]
pub struct RemoveCommand {
    #[arg(long, help = "Only delete cached sessions, keep the stored key")]
    pub sessions_only: bool,
}

impl RemoveCommand {
    pub async fn execute(self, service: &str, profile: &str) -> Result<()> {
        let vault = Vault::open(service)?;
        self.run(&vault, profile).await
    }

    pub async fn run(&self, vault: &Vault, profile: &str) -> Result<()> {
        if !self.sessions_only {
            vault
                .masters
                .remove(profile)
                .await
                .with_context(|| format!("Failed to remove credentials for profile '{profile}'"))?;
            println!("Deleted credentials for profile \"{profile}\".");
        }

        let deleted = vault
            .sessions
            .delete_all(profile)
            .await
            .with_context(|| format!("Failed to delete sessions for profile '{profile}'"))?;
        println!("Deleted {deleted} sessions.");
        Ok(())
    }
}
