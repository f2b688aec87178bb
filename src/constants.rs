use std::{env, path::PathBuf, time::Duration};

use dirs;

/// Default keyring service that namespaces every stored secret
pub const DEFAULT_KEYRING_SERVICE: &str = "vaulted";

/// AWS configuration directory name
pub const AWS_CONFIG_DIR_NAME: &str = ".aws";

/// AWS configuration file name
pub const AWS_CONFIG_FILE_NAME: &str = "config";

/// Default AWS region for STS operations when no region is configured
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Issuer reported to the console federation endpoint
pub const CONSOLE_ISSUER: &str = "vaulted";

/// Shortest session STS will issue, for both session tokens and roles
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default GetSessionToken duration
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// GetSessionToken ceiling
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(36 * 60 * 60);

/// Default AssumeRole duration
pub const DEFAULT_ASSUME_ROLE_DURATION: Duration = Duration::from_secs(15 * 60);

/// AssumeRole ceiling when the caller is itself a session (role chaining)
pub const MAX_ASSUME_ROLE_DURATION: Duration = Duration::from_secs(60 * 60);

/// Lead time before expiration at which a credential counts as expired
pub const SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Environment variables read or written around the child process
pub mod env_vars {
    pub const AWS_VAULT: &str = "AWS_VAULT";
    pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
    pub const SECURITY_TOKEN: &str = "AWS_SECURITY_TOKEN";
    pub const CREDENTIAL_FILE: &str = "AWS_CREDENTIAL_FILE";
    pub const SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
    pub const DEFAULT_PROFILE: &str = "AWS_DEFAULT_PROFILE";
    pub const PROFILE: &str = "AWS_PROFILE";
    pub const DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
    pub const REGION: &str = "AWS_REGION";
    pub const CONTAINER_CREDENTIALS_FULL_URI: &str = "AWS_CONTAINER_CREDENTIALS_FULL_URI";
    pub const CONTAINER_AUTHORIZATION_TOKEN: &str = "AWS_CONTAINER_AUTHORIZATION_TOKEN";

    /// Variables that could leak ambient or stale credentials into the child
    pub const SANITIZED: &[&str] = &[
        ACCESS_KEY_ID,
        SECRET_ACCESS_KEY,
        SESSION_TOKEN,
        SECURITY_TOKEN,
        CREDENTIAL_FILE,
        SHARED_CREDENTIALS_FILE,
        DEFAULT_PROFILE,
        PROFILE,
        CONTAINER_CREDENTIALS_FULL_URI,
        CONTAINER_AUTHORIZATION_TOKEN,
    ];
}

/// Get the AWS config file path
/// Respects AWS_CONFIG_FILE environment variable if set
pub fn get_aws_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join(AWS_CONFIG_FILE_NAME))
}
