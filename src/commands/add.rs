use anyhow::{Context, Result, bail};
use clap::Args;

use super::Vault;
use crate::{
    aws::MasterCredential,
    constants::env_vars,
    environ::Environ,
    prompt,
};

#[derive(Debug, Clone, Args)]
pub struct AddCommand {
    #[arg(
        long = "env",
        help = "Read the key from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY"
    )]
    pub from_env: bool,
}

impl AddCommand {
    pub async fn execute(self, service: &str, profile: &str) -> Result<()> {
        let creds = if self.from_env {
            credentials_from_env(&Environ::capture())?
        } else {
            MasterCredential {
                access_key_id: prompt::prompt_access_key_id()?,
                secret_access_key: prompt::prompt_secret_access_key()?,
            }
        };

        let vault = Vault::open(service)?;
        add(&vault, profile, &creds).await
    }
}

/// Store `creds` for `profile`, reporting any sessions that were dropped.
pub async fn add(vault: &Vault, profile: &str, creds: &MasterCredential) -> Result<()> {
    let deleted = vault
        .masters
        .store(profile, creds)
        .await
        .with_context(|| format!("Failed to store credentials for profile '{profile}'"))?;

    println!("Added credentials to profile \"{profile}\" in vault");
    if deleted > 0 {
        println!("Deleted {deleted} existing sessions.");
    }
    Ok(())
}

/// Key pair from `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` in `env`.
pub fn credentials_from_env(env: &Environ) -> Result<MasterCredential> {
    let read = |key: &str| -> Result<String> {
        match env.get(key) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => bail!("Missing value for {key}"),
        }
    };

    Ok(MasterCredential {
        access_key_id: read(env_vars::ACCESS_KEY_ID)?,
        secret_access_key: read(env_vars::SECRET_ACCESS_KEY)?,
    })
}
