use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{process::Command, time::Duration};
use tracing::{info, warn};
use url::Url;

use super::{DEFAULT_AWS_REGION, ResolvedIdentity};
use crate::constants::CONSOLE_ISSUER;

/// Session credentials format for AWS federation getSigninToken API
#[derive(Debug, Serialize)]
struct SessionCredentials<'a> {
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "sessionKey")]
    session_key: &'a str,
    #[serde(rename = "sessionToken")]
    session_token: &'a str,
}

/// Response from AWS federation getSigninToken API
#[derive(Debug, Deserialize)]
struct SigninTokenResponse {
    #[serde(rename = "SigninToken")]
    signin_token: String,
}

/// Exchange temporary credentials for a console sign-in URL.
pub async fn login_url(identity: &ResolvedIdentity) -> Result<String> {
    let region = identity.region.as_deref().unwrap_or(DEFAULT_AWS_REGION);
    let amazon_domain = get_console_domain(region);

    let signin_token = get_signin_token(identity, amazon_domain).await?;
    build_login_url(amazon_domain, region, &signin_token)
}

/// Open `url` in a browser, printing it to stdout when that is impossible.
pub fn open_or_print(url: &str) {
    match open_browser(url) {
        Ok(()) => info!("Opened AWS Management Console in browser"),
        Err(e) => {
            warn!(error = %e, "Could not open browser");
            println!("{url}");
        }
    }
}

fn build_login_url(amazon_domain: &str, region: &str, signin_token: &str) -> Result<String> {
    let mut destination = Url::parse(&format!("https://console.{amazon_domain}/console/home"))?;
    destination.query_pairs_mut().append_pair("region", region);

    let mut url = Url::parse(&format!("https://signin.{amazon_domain}/federation"))?;
    url.query_pairs_mut()
        .append_pair("Action", "login")
        .append_pair("Issuer", CONSOLE_ISSUER)
        .append_pair("Destination", destination.as_str())
        .append_pair("SigninToken", signin_token);

    Ok(url.to_string())
}

fn signin_token_request_url(identity: &ResolvedIdentity, amazon_domain: &str) -> Result<Url> {
    let Some(session_token) = identity.session_token.as_deref() else {
        bail!(
            "Console login for profile '{}' needs temporary credentials, not a long-term key",
            identity.profile
        );
    };

    let session_json = serde_json::to_string(&SessionCredentials {
        session_id: &identity.access_key_id,
        session_key: &identity.secret_access_key,
        session_token,
    })?;

    let mut url = Url::parse(&format!("https://signin.{amazon_domain}/federation"))?;
    url.query_pairs_mut()
        .append_pair("Action", "getSigninToken")
        .append_pair("Session", &session_json);
    Ok(url)
}

/// Get signin token from AWS federation endpoint
async fn get_signin_token(identity: &ResolvedIdentity, amazon_domain: &str) -> Result<String> {
    let url = signin_token_request_url(identity, amazon_domain)?;
    let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

    let response = client
        .get(url.as_str())
        .send()
        .await
        .context("Failed to get signin token")?;

    if !response.status().is_success() {
        bail!("Failed to get signin token: {}", response.status());
    }

    let token_response: SigninTokenResponse = response
        .json()
        .await
        .context("Expected a response with SigninToken")?;

    Ok(token_response.signin_token)
}

/// Get console domain based on region
fn get_console_domain(region: &str) -> &'static str {
    match region {
        r if r.starts_with("us-gov-") => "amazonaws-us-gov.com",
        r if r.starts_with("cn-") => "amazonaws.cn",
        _ => "aws.amazon.com",
    }
}

/// Open URL in browser using platform-specific command
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(url).status();

    #[cfg(target_os = "windows")]
    let status = Command::new("cmd").args(["/c", "start", "", url]).status();

    #[cfg(target_os = "linux")]
    let status = Command::new("xdg-open").arg(url).status();

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    return bail!("Unsupported operating system");

    status
        .context("Failed to execute browser command")
        .and_then(|s| {
            s.success()
                .then_some(())
                .context("Browser command returned error")
        })
}
