use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;

use super::Vault;

#[derive(Debug, Clone, Args)]
pub struct ListCommand {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub profile: String,
    pub has_credentials: bool,
    pub sessions: usize,
}

impl ListCommand {
    pub async fn execute(self, service: &str) -> Result<()> {
        let vault = Vault::open(service)?;
        let rows = rows(&vault).await?;

        if rows.is_empty() {
            println!("No profiles found");
            return Ok(());
        }

        let width = rows
            .iter()
            .map(|r| r.profile.len())
            .max()
            .unwrap_or(0)
            .max("Profile".len());
        println!("{:<width$}  {:<11}  Sessions", "Profile", "Credentials");
        for row in &rows {
            let credentials = if row.has_credentials { "yes" } else { "-" };
            println!(
                "{:<width$}  {:<11}  {}",
                row.profile, credentials, row.sessions
            );
        }
        Ok(())
    }
}

/// Every configured profile plus any profile with a stored key, sorted.
pub async fn rows(vault: &Vault) -> Result<Vec<ListRow>> {
    let stored: BTreeSet<String> = vault
        .masters
        .profiles()
        .await
        .context("Failed to read stored credentials")?
        .into_iter()
        .collect();

    let names: BTreeSet<String> = vault
        .profiles
        .names()
        .map(str::to_string)
        .chain(stored.iter().cloned())
        .collect();

    let mut rows = Vec::with_capacity(names.len());
    for profile in names {
        let sessions = vault.sessions.keys_for(&profile).await?.len();
        rows.push(ListRow {
            has_credentials: stored.contains(&profile),
            profile,
            sessions,
        });
    }
    Ok(rows)
}
