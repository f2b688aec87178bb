use crate::{
    aws::ResolvedIdentity,
    constants::env_vars,
    error::{Result, VaultError},
};

/// Ordered snapshot of environment variables handed to a child process.
///
/// The live process environment is never modified; callers copy it with
/// [`Environ::capture`], edit the copy and pass it to the launch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: Vec<(String, String)>,
}

impl Environ {
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, replacing any existing entries.
    pub fn set(&mut self, key: &str, value: &str) {
        self.unset(key);
        self.vars.push((key.to_string(), value.to_string()));
    }

    /// Remove every entry for `key`.
    pub fn unset(&mut self, key: &str) {
        self.vars.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Refuse to run inside another resolved session.
    pub fn ensure_not_nested(&self) -> Result<()> {
        match self.get(env_vars::AWS_VAULT) {
            Some(v) if !v.is_empty() => Err(VaultError::NestedSession),
            _ => Ok(()),
        }
    }

    /// Strip every variable that could carry ambient credentials or select a
    /// different profile.
    pub fn sanitize(&mut self) {
        for key in env_vars::SANITIZED {
            self.unset(key);
        }
    }
}

/// How the child obtains its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialDelivery {
    /// Credentials written into the child's environment
    Environment,
    /// Child fetches credentials from the local server
    Server { url: String, auth_token: String },
}

/// Build the child's environment from a captured snapshot.
pub fn child_environment(
    mut env: Environ,
    identity: &ResolvedIdentity,
    delivery: &CredentialDelivery,
) -> Result<Environ> {
    env.ensure_not_nested()?;
    env.sanitize();
    env.set(env_vars::AWS_VAULT, &identity.profile);

    if let Some(region) = &identity.region {
        env.set(env_vars::DEFAULT_REGION, region);
        env.set(env_vars::REGION, region);
    }

    match delivery {
        CredentialDelivery::Environment => {
            tracing::debug!("Writing temporary credentials to environment");
            env.set(env_vars::ACCESS_KEY_ID, &identity.access_key_id);
            env.set(env_vars::SECRET_ACCESS_KEY, &identity.secret_access_key);
            if let Some(token) = &identity.session_token {
                env.set(env_vars::SESSION_TOKEN, token);
                env.set(env_vars::SECURITY_TOKEN, token);
            }
        }
        CredentialDelivery::Server { url, auth_token } => {
            env.set(env_vars::CONTAINER_CREDENTIALS_FULL_URI, url);
            env.set(env_vars::CONTAINER_AUTHORIZATION_TOKEN, auth_token);
        }
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ambient() -> Environ {
        Environ::from_vars(
            [
                ("PATH", "/usr/bin"),
                ("AWS_ACCESS_KEY_ID", "old"),
                ("AWS_SECRET_ACCESS_KEY", "old-secret"),
                ("AWS_PROFILE", "foo"),
                ("AWS_DEFAULT_PROFILE", "foo"),
                ("AWS_CREDENTIAL_FILE", "/tmp/creds"),
            ]
            .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    fn identity() -> ResolvedIdentity {
        ResolvedIdentity {
            profile: "dev".to_string(),
            region: Some("eu-west-1".to_string()),
            access_key_id: "ASIANEW".to_string(),
            secret_access_key: "new-secret".to_string(),
            session_token: Some("new-token".to_string()),
            expiration: None,
        }
    }

    #[test]
    fn test_set_replaces_and_unset_removes() {
        let mut env = Environ::default();
        env.set("A", "1");
        env.set("A", "2");
        assert_eq!(env.get("A"), Some("2"));
        assert_eq!(env.len(), 1);

        env.unset("A");
        env.unset("A");
        assert!(env.is_empty());
    }

    #[test]
    fn test_unset_removes_duplicates() {
        let mut env = Environ::from_vars([
            ("A".to_string(), "1".to_string()),
            ("A".to_string(), "2".to_string()),
        ]);
        env.unset("A");
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn test_environment_delivery() {
        let env = child_environment(ambient(), &identity(), &CredentialDelivery::Environment).unwrap();

        assert_eq!(env.get("AWS_ACCESS_KEY_ID"), Some("ASIANEW"));
        assert_eq!(env.get("AWS_SECRET_ACCESS_KEY"), Some("new-secret"));
        assert_eq!(env.get("AWS_SESSION_TOKEN"), Some("new-token"));
        assert_eq!(env.get("AWS_SECURITY_TOKEN"), Some("new-token"));
        assert_eq!(env.get("AWS_PROFILE"), None);
        assert_eq!(env.get("AWS_DEFAULT_PROFILE"), None);
        assert_eq!(env.get("AWS_CREDENTIAL_FILE"), None);
        assert_eq!(env.get("AWS_VAULT"), Some("dev"));
        assert_eq!(env.get("AWS_REGION"), Some("eu-west-1"));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), Some("eu-west-1"));
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
    }

    #[test]
    fn test_server_delivery_keeps_secrets_out() {
        let delivery = CredentialDelivery::Server {
            url: "http://127.0.0.1:4242/".to_string(),
            auth_token: "abc".to_string(),
        };
        let env = child_environment(ambient(), &identity(), &delivery).unwrap();

        assert_eq!(env.get("AWS_ACCESS_KEY_ID"), None);
        assert_eq!(env.get("AWS_SECRET_ACCESS_KEY"), None);
        assert_eq!(env.get("AWS_SESSION_TOKEN"), None);
        assert_eq!(env.get("AWS_PROFILE"), None);
        assert_eq!(
            env.get("AWS_CONTAINER_CREDENTIALS_FULL_URI"),
            Some("http://127.0.0.1:4242/")
        );
        assert_eq!(env.get("AWS_CONTAINER_AUTHORIZATION_TOKEN"), Some("abc"));
        assert!(env.iter().all(|(_, v)| v != "new-secret"));
    }

    #[test]
    fn test_master_credentials_have_no_token() {
        let mut identity = identity();
        identity.session_token = None;

        let env = child_environment(ambient(), &identity, &CredentialDelivery::Environment).unwrap();
        assert_eq!(env.get("AWS_SESSION_TOKEN"), None);
        assert_eq!(env.get("AWS_SECURITY_TOKEN"), None);
    }

    #[test]
    fn test_nested_session_refused() {
        let mut env = ambient();
        env.set("AWS_VAULT", "other");

        let err = child_environment(env, &identity(), &CredentialDelivery::Environment).unwrap_err();
        assert!(matches!(err, VaultError::NestedSession));
    }
}
