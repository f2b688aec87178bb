//! Loopback credential endpoint for a single child process.
//!
//! The child receives only the endpoint URL and an authorization token in
//! its environment. Credentials are served in the container-credentials
//! JSON shape the AWS SDKs understand, and refreshed before they expire.
//!
//! The served credential lives in a `watch` channel. Refreshes run on one
//! dedicated task fed by a bounded `mpsc` queue, so concurrent requests never
//! start more than one STS call.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    aws::{
        SessionCredential,
        resolver::{CredentialResolver, ResolveOptions},
    },
    constants::SAFETY_MARGIN,
    error::{Result, VaultError},
};

/// How long a request for an already-expired credential waits on a refresh.
const REFRESH_WAIT: Duration = Duration::from_secs(60);

/// Pause after a failed refresh before STS is tried again.
const REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

/// When the server refreshes and how often it retries.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Remaining lifetime below which a refresh is started
    pub margin: Duration,
    /// Minimum gap between a failed refresh and the next attempt
    pub cooldown: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            margin: SAFETY_MARGIN,
            cooldown: REFRESH_COOLDOWN,
        }
    }
}

/// Produces a fresh credential when the served one nears expiry.
#[async_trait]
pub trait RefreshCredentials: Send + Sync {
    async fn refresh(&self) -> Result<SessionCredential>;
}

/// A resolver pinned to one profile and option set.
pub struct BoundResolver {
    resolver: Arc<CredentialResolver>,
    profile: String,
    options: ResolveOptions,
}

impl BoundResolver {
    /// A one-time MFA token in `options` is dropped; later challenges prompt.
    pub fn new(resolver: Arc<CredentialResolver>, profile: &str, options: ResolveOptions) -> Self {
        Self {
            resolver,
            profile: profile.to_string(),
            options: ResolveOptions {
                mfa_token: None,
                ..options
            },
        }
    }
}

#[async_trait]
impl RefreshCredentials for BoundResolver {
    async fn refresh(&self) -> Result<SessionCredential> {
        let resolved = self.resolver.resolve(&self.profile, &self.options).await?;
        resolved.to_session().ok_or_else(|| {
            VaultError::ServerUnavailable(format!(
                "profile '{}' resolved to credentials without an expiration",
                self.profile
            ))
        })
    }
}

#[derive(Debug, Clone)]
struct Slot {
    credential: SessionCredential,
    /// Bumped after every refresh attempt, successful or not
    generation: u64,
    last_error: Option<String>,
    failed_at: Option<Instant>,
}

impl Slot {
    fn cooling_down(&self, cooldown: Duration) -> bool {
        self.failed_at.is_some_and(|at| at.elapsed() < cooldown)
    }
}

#[derive(Clone)]
struct ServerState {
    slot: watch::Receiver<Slot>,
    refresh_tx: mpsc::Sender<()>,
    timing: Timing,
    auth_token: Arc<str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    access_key_id: String,
    secret_access_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    expiration: String,
}

impl From<&SessionCredential> for CredentialResponse {
    fn from(creds: &SessionCredential) -> Self {
        Self {
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
            token: creds.session_token.clone(),
            expiration: creds.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Running credential server.
pub struct ServerHandle {
    addr: SocketAddr,
    auth_token: Arc<str>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
    refresher: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint for `AWS_CONTAINER_CREDENTIALS_FULL_URI`.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Value for `AWS_CONTAINER_AUTHORIZATION_TOKEN`.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Stop serving and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
        self.refresher.abort();
        debug!(addr = %self.addr, "Credential server stopped");
    }
}

/// Start serving `initial` on an ephemeral loopback port.
pub async fn start(
    initial: SessionCredential,
    source: Arc<dyn RefreshCredentials>,
) -> Result<ServerHandle> {
    start_with_timing(initial, source, Timing::default()).await
}

pub async fn start_with_timing(
    initial: SessionCredential,
    source: Arc<dyn RefreshCredentials>,
    timing: Timing,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .map_err(|e| VaultError::ServerUnavailable(format!("failed to bind: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| VaultError::ServerUnavailable(e.to_string()))?;

    let (slot_tx, slot_rx) = watch::channel(Slot {
        credential: initial,
        generation: 0,
        last_error: None,
        failed_at: None,
    });
    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    let refresher = tokio::spawn(refresh_loop(source, slot_tx, refresh_rx, timing));

    let auth_token: Arc<str> = Uuid::new_v4().simple().to_string().into();
    let state = ServerState {
        slot: slot_rx,
        refresh_tx,
        timing,
        auth_token: auth_token.clone(),
    };

    let app = Router::new()
        .route("/", get(serve_credentials))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Credential server error");
        }
    });

    info!(%addr, "Credential server listening");
    Ok(ServerHandle {
        addr,
        auth_token,
        shutdown: Some(shutdown_tx),
        server,
        refresher,
    })
}

/// Single refresher: takes refresh requests one at a time and skips any that
/// arrive after the slot already holds a fresh credential or while a failed
/// refresh is cooling down.
async fn refresh_loop(
    source: Arc<dyn RefreshCredentials>,
    slot: watch::Sender<Slot>,
    mut requests: mpsc::Receiver<()>,
    timing: Timing,
) {
    while requests.recv().await.is_some() {
        let current = slot.borrow().clone();
        if current.credential.is_valid_at(Utc::now(), timing.margin) {
            continue;
        }
        if current.cooling_down(timing.cooldown) {
            debug!("Skipping refresh, last attempt failed recently");
            // Wake anyone waiting on this request
            slot.send_modify(|s| s.generation += 1);
            continue;
        }

        debug!("Refreshing served credential");
        let next = match source.refresh().await {
            Ok(credential) => {
                info!(expiration = %credential.expiration, "Refreshed served credential");
                Slot {
                    credential,
                    generation: current.generation + 1,
                    last_error: None,
                    failed_at: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, keeping last known credential");
                Slot {
                    credential: current.credential,
                    generation: current.generation + 1,
                    last_error: Some(e.to_string()),
                    failed_at: Some(Instant::now()),
                }
            }
        };
        slot.send_replace(next);
    }
}

async fn serve_credentials(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == &*state.auth_token);
    if !authorized {
        warn!("Rejected credential request with missing or wrong authorization");
        return StatusCode::FORBIDDEN.into_response();
    }

    let current = state.slot.borrow().clone();
    let now = Utc::now();
    if current.credential.is_valid_at(now, state.timing.margin) {
        return Json(CredentialResponse::from(&current.credential)).into_response();
    }

    let cooling_down = current.cooling_down(state.timing.cooldown);
    if !cooling_down {
        // A full queue means a refresh is already pending.
        let _ = state.refresh_tx.try_send(());
    }

    if !current.credential.is_expired_at(now) {
        return Json(CredentialResponse::from(&current.credential)).into_response();
    }

    if cooling_down {
        let reason = current
            .last_error
            .unwrap_or_else(|| "credential expired".to_string());
        return unavailable(&reason);
    }

    let mut slot = state.slot.clone();
    let refreshed = match tokio::time::timeout(
        REFRESH_WAIT,
        slot.wait_for(|s| s.generation > current.generation),
    )
    .await
    {
        Ok(Ok(refreshed)) => refreshed.clone(),
        _ => return unavailable("timed out waiting for credential refresh"),
    };

    if refreshed.credential.is_expired_at(Utc::now()) {
        let reason = refreshed
            .last_error
            .unwrap_or_else(|| "credential expired".to_string());
        return unavailable(&reason);
    }

    Json(CredentialResponse::from(&refreshed.credential)).into_response()
}

fn unavailable(reason: &str) -> Response {
    warn!(reason, "No valid credential to serve");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "message": reason })),
    )
        .into_response()
}
