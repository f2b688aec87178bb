use thiserror::Error;

/// Errors returned by the credential store, cache, resolver and server.
///
/// The command layer turns these into user-facing messages; nothing below it
/// prints on failure.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    Configuration(String),

    #[error("profile '{0}' is part of a source_profile cycle")]
    CyclicProfile(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("secret store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("No credentials found for profile \"{0}\"")]
    NoCredentials(String),

    #[error("failed to get credentials for profile '{profile}': {message}")]
    RemoteProvider { profile: String, message: String },

    #[error("MFA code rejected for profile '{0}'")]
    MfaRejected(String),

    #[error("failed to launch '{command}': {source}")]
    SubprocessLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("vaulted sessions should be nested with care, unset $AWS_VAULT to force")]
    NestedSession,

    #[error("credential server unavailable: {0}")]
    ServerUnavailable(String),
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;
