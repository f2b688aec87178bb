//! Turns a profile name into valid temporary credentials.
//!
//! The profile chain is flattened into an ordered list of
//! [`CredentialSource`] steps. The first step obtains a session token from a
//! master credential; every later step assumes a role using the previous
//! step's result. Each step consults the session cache before calling STS.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    ResolvedIdentity, SessionCredential,
    master::MasterCredentialStore,
    session_cache::{SessionCache, SessionKey},
    sts::{AssumeRoleRequest, MfaCode, SessionTokenRequest, StsError, StsProvider},
};
use crate::{
    constants::{
        DEFAULT_ASSUME_ROLE_DURATION, DEFAULT_SESSION_DURATION, MAX_ASSUME_ROLE_DURATION,
        MAX_SESSION_DURATION, MIN_SESSION_DURATION,
    },
    error::{Result, VaultError},
    profile::{Profile, ProfileGraph},
    prompt::MfaPrompt,
};

/// Per-invocation resolution parameters.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Requested GetSessionToken duration for the chain root
    pub session_duration: Option<Duration>,
    /// Requested AssumeRole duration for every role step
    pub role_duration: Option<Duration>,
    /// Code to use for the first MFA challenge instead of prompting
    pub mfa_token: Option<String>,
}

/// One way of getting credentials for a profile in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Session token issued against the profile's own master credential
    Session { profile: Profile },
    /// Role assumed with the credentials of the previous step
    AssumeRole { profile: Profile, role_arn: String },
}

impl CredentialSource {
    /// Steps for an ordered root-to-leaf profile chain.
    ///
    /// A root that names a role is both a session step and a role step. A
    /// non-root profile without a role reuses its source's credentials.
    pub fn plan(chain: &[Profile]) -> Vec<Self> {
        let mut steps = Vec::with_capacity(chain.len() + 1);

        for (i, profile) in chain.iter().enumerate() {
            if i == 0 {
                steps.push(Self::Session {
                    profile: profile.clone(),
                });
            }
            if let Some(role_arn) = &profile.role_arn {
                steps.push(Self::AssumeRole {
                    profile: profile.clone(),
                    role_arn: role_arn.clone(),
                });
            }
        }

        steps
    }
}

/// Clamp a GetSessionToken duration to what STS allows.
pub fn clamp_session_duration(requested: Duration) -> Duration {
    requested.clamp(MIN_SESSION_DURATION, MAX_SESSION_DURATION)
}

/// Clamp an AssumeRole duration to the role-chaining ceiling.
pub fn clamp_role_duration(requested: Duration) -> Duration {
    requested.clamp(MIN_SESSION_DURATION, MAX_ASSUME_ROLE_DURATION)
}

/// MFA codes for one resolution. A supplied token is used once; any later
/// challenge prompts.
struct MfaCodes {
    token: Option<String>,
    prompt: Arc<dyn MfaPrompt>,
}

impl MfaCodes {
    async fn next(&mut self, serial: &str) -> Result<MfaCode> {
        let code = match self.token.take() {
            Some(token) => token,
            None => {
                let prompt = self.prompt.clone();
                let serial = serial.to_string();
                tokio::task::spawn_blocking(move || prompt.prompt(&serial))
                    .await
                    .map_err(|e| VaultError::InvalidInput(format!("MFA prompt failed: {e}")))??
            }
        };

        Ok(MfaCode {
            serial: serial.to_string(),
            code,
        })
    }
}

/// Resolves profiles to temporary credentials.
pub struct CredentialResolver {
    profiles: ProfileGraph,
    masters: MasterCredentialStore,
    sessions: SessionCache,
    sts: Arc<dyn StsProvider>,
    mfa_prompt: Arc<dyn MfaPrompt>,
}

impl CredentialResolver {
    pub fn new(
        profiles: ProfileGraph,
        masters: MasterCredentialStore,
        sessions: SessionCache,
        sts: Arc<dyn StsProvider>,
        mfa_prompt: Arc<dyn MfaPrompt>,
    ) -> Self {
        Self {
            profiles,
            masters,
            sessions,
            sts,
            mfa_prompt,
        }
    }

    pub fn profiles(&self) -> &ProfileGraph {
        &self.profiles
    }

    /// Resolve `name` to session credentials, walking its role chain.
    pub async fn resolve(&self, name: &str, options: &ResolveOptions) -> Result<ResolvedIdentity> {
        let chain = self.profiles.chain(name)?;
        let steps = CredentialSource::plan(&chain);
        debug!(profile = name, steps = steps.len(), "Resolving credential chain");

        let mut mfa = MfaCodes {
            token: options.mfa_token.clone(),
            prompt: self.mfa_prompt.clone(),
        };
        let mut mfa_satisfied = false;
        let mut current: Option<SessionCredential> = None;

        for step in &steps {
            let creds = match step {
                CredentialSource::Session { profile } => {
                    let serial = profile.mfa_serial.as_deref();
                    let creds = self
                        .session_token(profile, serial, options, &mut mfa)
                        .await?;
                    mfa_satisfied |= serial.is_some();
                    creds
                }
                CredentialSource::AssumeRole { profile, role_arn } => {
                    let caller = current.as_ref().ok_or_else(|| {
                        VaultError::Configuration(format!(
                            "profile '{}' has no calling credentials",
                            profile.name
                        ))
                    })?;
                    let serial = match mfa_satisfied {
                        true => None,
                        false => profile.mfa_serial.as_deref(),
                    };
                    let creds = self
                        .assume_role(profile, role_arn, serial, caller, options, &mut mfa)
                        .await?;
                    mfa_satisfied |= serial.is_some();
                    creds
                }
            };
            current = Some(creds);
        }

        let creds = current.ok_or_else(|| {
            VaultError::Configuration(format!("profile '{name}' resolved to no credentials"))
        })?;

        Ok(ResolvedIdentity::from_session(
            name,
            self.profiles.region(name),
            creds,
        ))
    }

    /// Master credentials for `name`, bypassing sessions and the cache.
    ///
    /// Role profiles cannot be used this way since assuming a role always
    /// yields a session.
    pub async fn resolve_master(&self, name: &str) -> Result<ResolvedIdentity> {
        let chain = self.profiles.chain(name)?;
        if chain.len() > 1 || chain.iter().any(Profile::assumes_role) {
            return Err(VaultError::Configuration(format!(
                "profile '{name}' assumes a role and cannot be used without a session"
            )));
        }

        let creds = self.master_for(name).await?;
        Ok(ResolvedIdentity::from_master(
            name,
            self.profiles.region(name),
            creds,
        ))
    }

    async fn master_for(&self, profile: &str) -> Result<super::MasterCredential> {
        self.masters.retrieve(profile).await.map_err(|e| match e {
            VaultError::NotFound(_) => VaultError::NoCredentials(profile.to_string()),
            other => other,
        })
    }

    async fn session_token(
        &self,
        profile: &Profile,
        serial: Option<&str>,
        options: &ResolveOptions,
        mfa: &mut MfaCodes,
    ) -> Result<SessionCredential> {
        let requested = options
            .session_duration
            .or(profile.session_duration)
            .unwrap_or(DEFAULT_SESSION_DURATION);
        let duration = clamp_session_duration(requested);
        if duration != requested {
            debug!(
                requested = requested.as_secs(),
                clamped = duration.as_secs(),
                "Session duration clamped"
            );
        }

        // Cached sessions only count when issued to the current key pair.
        let master = self.master_for(&profile.name).await?;
        let key = SessionKey::root(&profile.name, serial, duration, &master.access_key_id);
        if let Some(creds) = self.sessions.get(&key).await? {
            info!(profile = %profile.name, "Using cached session");
            return Ok(creds);
        }

        let sts = self.sts.as_ref();
        let master = &master;

        let creds = with_mfa(&profile.name, serial, mfa, move |mfa| async move {
            let request = SessionTokenRequest { duration, mfa };
            sts.get_session_token(master, &request).await
        })
        .await?;

        self.sessions.put(&key, &creds).await?;
        Ok(creds)
    }

    async fn assume_role(
        &self,
        profile: &Profile,
        role_arn: &str,
        serial: Option<&str>,
        caller: &SessionCredential,
        options: &ResolveOptions,
        mfa: &mut MfaCodes,
    ) -> Result<SessionCredential> {
        let requested = options
            .role_duration
            .or(profile.role_duration)
            .unwrap_or(DEFAULT_ASSUME_ROLE_DURATION);
        let duration = clamp_role_duration(requested);

        let key = SessionKey::role(
            &profile.name,
            role_arn,
            serial,
            duration,
            &caller.access_key_id,
        );
        if let Some(creds) = self.sessions.get(&key).await? {
            info!(profile = %profile.name, role_arn, "Using cached role session");
            return Ok(creds);
        }

        let role_session_name = profile
            .role_session_name
            .clone()
            .unwrap_or_else(|| format!("vaulted-{}", Utc::now().timestamp()));
        let sts = self.sts.as_ref();
        let external_id = profile.external_id.as_deref();
        let role_session_name = role_session_name.as_str();

        let creds = with_mfa(&profile.name, serial, mfa, move |mfa| async move {
            let request = AssumeRoleRequest {
                role_arn: role_arn.to_string(),
                role_session_name: role_session_name.to_string(),
                duration,
                mfa,
                external_id: external_id.map(str::to_string),
            };
            sts.assume_role(caller, &request).await
        })
        .await?;

        self.sessions.put(&key, &creds).await?;
        Ok(creds)
    }
}

/// Run `call`, supplying an MFA code when `serial` is set. An MFA rejection
/// gets exactly one retry with a freshly prompted code.
async fn with_mfa<F, Fut>(
    profile: &str,
    serial: Option<&str>,
    mfa: &mut MfaCodes,
    call: F,
) -> Result<SessionCredential>
where
    F: Fn(Option<MfaCode>) -> Fut,
    Fut: Future<Output = std::result::Result<SessionCredential, StsError>>,
{
    let Some(serial) = serial else {
        return call(None).await.map_err(|e| remote_error(profile, e));
    };

    let code = mfa.next(serial).await?;
    match call(Some(code)).await {
        Ok(creds) => Ok(creds),
        Err(StsError::MfaRejected(message)) => {
            warn!(profile, %message, "MFA token rejected, prompting again");
            let code = mfa.next(serial).await?;
            call(Some(code)).await.map_err(|e| remote_error(profile, e))
        }
        Err(e) => Err(remote_error(profile, e)),
    }
}

fn remote_error(profile: &str, err: StsError) -> VaultError {
    match err {
        StsError::MfaRejected(_) => VaultError::MfaRejected(profile.to_string()),
        StsError::NoCredentialProviders(_) => VaultError::NoCredentials(profile.to_string()),
        StsError::Other(message) => VaultError::RemoteProvider {
            profile: profile.to_string(),
            message,
        },
    }
}
