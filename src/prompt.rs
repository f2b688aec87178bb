use dialoguer::{Input, Password, theme::ColorfulTheme};

use crate::error::{Result, VaultError};

/// Source of one-time MFA codes. Implementations may block on a human.
pub trait MfaPrompt: Send + Sync {
    fn prompt(&self, mfa_serial: &str) -> Result<String>;
}

/// Reads MFA codes from the terminal (stderr prompt).
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompt;

impl MfaPrompt for TerminalPrompt {
    fn prompt(&self, mfa_serial: &str) -> Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Enter token for {mfa_serial}"))
            .validate_with(|input: &String| validate_mfa_code(input))
            .interact_text()
            .map(|code| code.trim().to_string())
            .map_err(|e| VaultError::InvalidInput(format!("failed to read MFA token: {e}")))
    }
}

/// Never prompts; used when a run must not block on the terminal.
#[derive(Debug, Clone, Default)]
pub struct NoPrompt;

impl MfaPrompt for NoPrompt {
    fn prompt(&self, mfa_serial: &str) -> Result<String> {
        Err(VaultError::Configuration(format!(
            "an MFA token for {mfa_serial} is required, pass --mfa-token"
        )))
    }
}

fn validate_mfa_code(input: &str) -> Result<(), &'static str> {
    let code = input.trim();
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err("MFA token must be 6 digits")
    }
}

pub fn prompt_access_key_id() -> Result<String> {
    Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt("Enter Access Key ID")
        .interact_text()
        .map(|s| s.trim().to_string())
        .map_err(|e| VaultError::InvalidInput(format!("failed to read access key id: {e}")))
}

pub fn prompt_secret_access_key() -> Result<String> {
    Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Enter Secret Access Key")
        .interact()
        .map(|s| s.trim().to_string())
        .map_err(|e| VaultError::InvalidInput(format!("failed to read secret access key: {e}")))
}
