use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{info, warn};

use super::Vault;
use crate::{
    aws::resolver::{CredentialResolver, ResolveOptions},
    environ::{CredentialDelivery, Environ, child_environment},
    exec,
    server::{self, BoundResolver},
};

#[derive(Debug, Clone, Args)]
pub struct ExecCommand {
    #[arg(
        short = 'd',
        long,
        value_parser = humantime::parse_duration,
        help = "Duration of the temporary session, e.g. 1h (default 4h)"
    )]
    pub duration: Option<Duration>,

    #[arg(
        long,
        value_parser = humantime::parse_duration,
        help = "Duration of each assumed role, e.g. 30m (default 15m)"
    )]
    pub assume_role_ttl: Option<Duration>,

    #[arg(short = 't', long, help = "MFA token to use instead of prompting")]
    pub mfa_token: Option<String>,

    #[arg(
        short = 's',
        long,
        help = "Serve credentials from a local endpoint instead of the environment"
    )]
    pub server: bool,

    #[arg(
        short = 'n',
        long,
        conflicts_with = "server",
        help = "Use the stored key directly, without a session"
    )]
    pub no_session: bool,

    #[arg(help = "Command to run")]
    pub command: String,

    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Arguments for the command"
    )]
    pub args: Vec<String>,
}

impl ExecCommand {
    pub async fn execute(self, service: &str, profile: &str) -> Result<i32> {
        let env = Environ::capture();
        env.ensure_not_nested()?;

        let vault = Vault::open(service)?;
        let resolver = Arc::new(vault.terminal_resolver(profile));
        self.run(resolver, profile, env).await
    }

    fn options(&self) -> ResolveOptions {
        ResolveOptions {
            session_duration: self.duration,
            role_duration: self.assume_role_ttl,
            mfa_token: self.mfa_token.clone(),
        }
    }

    /// Resolve `profile` and run the command with `env` as its base
    /// environment. Returns the command's exit code.
    pub async fn run(
        &self,
        resolver: Arc<CredentialResolver>,
        profile: &str,
        env: Environ,
    ) -> Result<i32> {
        env.ensure_not_nested()?;
        if self.no_session && self.server {
            bail!("Can't start a credential server without a session");
        }

        let options = self.options();
        let identity = if self.no_session {
            warn!("No session requested, be careful!");
            resolver.resolve_master(profile).await?
        } else {
            resolver.resolve(profile, &options).await?
        };

        let server = if self.server {
            let initial = identity
                .to_session()
                .context("Resolved credentials have no expiration to refresh against")?;
            let source = Arc::new(BoundResolver::new(resolver.clone(), profile, options));
            Some(
                server::start(initial, source)
                    .await
                    .context("Failed to start credential server")?,
            )
        } else {
            None
        };

        let delivery = match &server {
            Some(handle) => CredentialDelivery::Server {
                url: handle.url(),
                auth_token: handle.auth_token().to_string(),
            },
            None => CredentialDelivery::Environment,
        };

        let result = match child_environment(env, &identity, &delivery) {
            Ok(child_env) => {
                info!(profile, command = %self.command, "Running command");
                exec::run(&self.command, &self.args, &child_env).await
            }
            Err(e) => Err(e),
        };

        if let Some(handle) = server {
            handle.shutdown().await;
        }

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aws::sts::AwsStsProvider, profile::ProfileGraph, prompt::NoPrompt,
        secret_store::MemorySecretStore,
    };

    fn command(server: bool, no_session: bool) -> ExecCommand {
        ExecCommand {
            duration: None,
            assume_role_ttl: None,
            mfa_token: None,
            server,
            no_session,
            command: "true".to_string(),
            args: Vec::new(),
        }
    }

    fn resolver() -> Arc<CredentialResolver> {
        let vault = Vault::new(ProfileGraph::new(), Arc::new(MemorySecretStore::new()));
        Arc::new(vault.resolver(Arc::new(AwsStsProvider::new(None)), Arc::new(NoPrompt)))
    }

    #[tokio::test]
    async fn test_refuses_nested_session() {
        let env = Environ::from_vars([("AWS_VAULT".to_string(), "other".to_string())]);
        let err = command(false, false)
            .run(resolver(), "dev", env)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unset $AWS_VAULT"));
    }

    #[tokio::test]
    async fn test_server_needs_session() {
        let err = command(true, true)
            .run(resolver(), "dev", Environ::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't start a credential server without a session"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_reported_by_profile() {
        let err = command(false, true)
            .run(resolver(), "dev", Environ::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No credentials found for profile \"dev\"");
    }
}
