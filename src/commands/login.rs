use anyhow::{Context, Result};
use clap::Args;

use super::Vault;
use crate::{
    aws::{console, resolver::ResolveOptions},
    constants::MAX_ASSUME_ROLE_DURATION,
};

#[derive(Debug, Clone, Args)]
pub struct LoginCommand {
    #[arg(short = 't', long, help = "MFA token to use instead of prompting")]
    pub mfa_token: Option<String>,

    #[arg(long, help = "Print the login URL instead of opening a browser")]
    pub stdout: bool,
}

impl LoginCommand {
    pub async fn execute(self, service: &str, profile: &str) -> Result<()> {
        let vault = Vault::open(service)?;
        let resolver = vault.terminal_resolver(profile);

        let options = ResolveOptions {
            role_duration: Some(MAX_ASSUME_ROLE_DURATION),
            mfa_token: self.mfa_token,
            ..ResolveOptions::default()
        };
        let identity = resolver.resolve(profile, &options).await?;

        let url = console::login_url(&identity)
            .await
            .with_context(|| format!("Failed to create console login URL for profile '{profile}'"))?;

        if self.stdout {
            println!("{url}");
        } else {
            console::open_or_print(&url);
        }
        Ok(())
    }
}
