use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::{
    Client as StsClient,
    config::Credentials as StaticCredentials,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::Credentials as StsCredentials,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::{DEFAULT_AWS_REGION, MasterCredential, SessionCredential};

/// MFA device serial and the one-time code read for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaCode {
    pub serial: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenRequest {
    pub duration: Duration,
    pub mfa: Option<MfaCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub role_session_name: String,
    pub duration: Duration,
    pub mfa: Option<MfaCode>,
    pub external_id: Option<String>,
}

/// Failures from the token service, split where the caller reacts
/// differently.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StsError {
    #[error("MFA authentication failed: {0}")]
    MfaRejected(String),

    #[error("no valid credential providers: {0}")]
    NoCredentialProviders(String),

    #[error("{0}")]
    Other(String),
}

/// Remote token-issuing capability.
#[async_trait]
pub trait StsProvider: Send + Sync {
    async fn get_session_token(
        &self,
        caller: &MasterCredential,
        request: &SessionTokenRequest,
    ) -> Result<SessionCredential, StsError>;

    async fn assume_role(
        &self,
        caller: &SessionCredential,
        request: &AssumeRoleRequest,
    ) -> Result<SessionCredential, StsError>;
}

/// `StsProvider` backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsStsProvider {
    region: String,
}

impl AwsStsProvider {
    pub fn new(region: Option<String>) -> Self {
        Self {
            region: region.unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
        }
    }

    async fn client(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
        session_token: Option<String>,
    ) -> StsClient {
        let credentials = StaticCredentials::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            "vaulted",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        StsClient::new(&config)
    }
}

#[async_trait]
impl StsProvider for AwsStsProvider {
    async fn get_session_token(
        &self,
        caller: &MasterCredential,
        request: &SessionTokenRequest,
    ) -> Result<SessionCredential, StsError> {
        info!("Calling AWS STS GetSessionToken");
        debug!("Duration: {} seconds", request.duration.as_secs());

        let client = self
            .client(&caller.access_key_id, &caller.secret_access_key, None)
            .await;

        let response = client
            .get_session_token()
            .duration_seconds(duration_seconds(request.duration))
            .set_serial_number(request.mfa.as_ref().map(|m| m.serial.clone()))
            .set_token_code(request.mfa.as_ref().map(|m| m.code.clone()))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let creds = response
            .credentials()
            .ok_or_else(|| StsError::Other("AWS STS returned no credentials".to_string()))?;

        to_session_credential(creds)
    }

    async fn assume_role(
        &self,
        caller: &SessionCredential,
        request: &AssumeRoleRequest,
    ) -> Result<SessionCredential, StsError> {
        info!("Calling AWS STS AssumeRole");
        debug!("Role ARN: {}", request.role_arn);
        debug!("Duration: {} seconds", request.duration.as_secs());

        let client = self
            .client(
                &caller.access_key_id,
                &caller.secret_access_key,
                caller.session_token.clone(),
            )
            .await;

        let response = client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.role_session_name)
            .duration_seconds(duration_seconds(request.duration))
            .set_external_id(request.external_id.clone())
            .set_serial_number(request.mfa.as_ref().map(|m| m.serial.clone()))
            .set_token_code(request.mfa.as_ref().map(|m| m.code.clone()))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let creds = response
            .credentials()
            .ok_or_else(|| StsError::Other("AWS STS returned no credentials".to_string()))?;

        to_session_credential(creds)
    }
}

fn duration_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn to_session_credential(creds: &StsCredentials) -> Result<SessionCredential, StsError> {
    let expiration = creds.expiration();
    let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
        .ok_or_else(|| StsError::Other("AWS STS returned an invalid expiration".to_string()))?;

    Ok(SessionCredential {
        access_key_id: creds.access_key_id().to_string(),
        secret_access_key: creds.secret_access_key().to_string(),
        session_token: Some(creds.session_token().to_string()),
        expiration,
    })
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> StsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err.message().map(str::to_string);
    classify(
        code.as_deref(),
        message.as_deref(),
        DisplayErrorContext(err).to_string(),
    )
}

/// Map an STS error onto the cases the resolver distinguishes.
fn classify(code: Option<&str>, message: Option<&str>, rendered: String) -> StsError {
    let message_lower = message.unwrap_or_default().to_ascii_lowercase();

    if code == Some("AccessDenied")
        && (message_lower.contains("multifactorauthentication") || message_lower.contains("mfa"))
    {
        return StsError::MfaRejected(message.unwrap_or_default().to_string());
    }

    let rendered_lower = rendered.to_ascii_lowercase();
    if code == Some("NoCredentialProviders")
        || rendered_lower.contains("no credentials")
        || rendered_lower.contains("nocredentialproviders")
    {
        return StsError::NoCredentialProviders(rendered);
    }

    StsError::Other(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mfa_rejection() {
        let err = classify(
            Some("AccessDenied"),
            Some("MultiFactorAuthentication failed with invalid MFA one time pass code."),
            "service error".to_string(),
        );
        assert!(matches!(err, StsError::MfaRejected(_)));
    }

    #[test]
    fn test_classify_plain_access_denied_is_other() {
        let err = classify(
            Some("AccessDenied"),
            Some("User is not authorized to perform: sts:AssumeRole"),
            "AccessDenied: not authorized".to_string(),
        );
        assert_eq!(err, StsError::Other("AccessDenied: not authorized".to_string()));
    }

    #[test]
    fn test_classify_no_credentials() {
        let err = classify(None, None, "failed to construct request: no credentials".to_string());
        assert!(matches!(err, StsError::NoCredentialProviders(_)));
    }

    #[test]
    fn test_duration_seconds_saturates() {
        assert_eq!(duration_seconds(Duration::from_secs(3600)), 3600);
        assert_eq!(duration_seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[test]
    fn test_default_region() {
        assert_eq!(AwsStsProvider::new(None).region, DEFAULT_AWS_REGION);
        assert_eq!(
            AwsStsProvider::new(Some("eu-west-1".to_string())).region,
            "eu-west-1"
        );
    }
}
