//! Sources of MFA codes: a fixed value, 1Password, or an interactive prompt.

use std::{
    io::{self, Write},
    process::Command,
};

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

/// Whether `code` looks like a TOTP code: exactly six ASCII digits.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
pub trait ReadMfaToken: Send + Sync {
    async fn read_mfa_token(&self, mfa_serial: &str) -> Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
pub struct StdinMfaTokenReader;

#[async_trait]
impl ReadMfaToken for StdinMfaTokenReader {
    async fn read_mfa_token(&self, mfa_serial: &str) -> Result<String> {
        print!("Enter MFA code for {mfa_serial}: ");
        io::stdout().flush()?;

        let mut code = String::new();
        io::stdin().read_line(&mut code)?;
        Ok(code.trim().to_string())
    }
}

/// Hands out a code supplied up front, e.g. via `--code`.
pub struct StaticMfaTokenReader {
    token: String,
}

impl<S: Into<String>> From<S> for StaticMfaTokenReader {
    fn from(s: S) -> Self {
        StaticMfaTokenReader { token: s.into() }
    }
}

#[async_trait]
impl ReadMfaToken for StaticMfaTokenReader {
    async fn read_mfa_token(&self, _mfa_serial: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads the current OTP from a 1Password item through the `op` CLI, falling
/// back to another reader when `op` fails or returns something that is not a code.
pub struct OnePasswordMfaTokenReader {
    /// Executable invoked as `<program> item get --account <account> <item> --otp`
    program: String,
    account: String,
    item: String,
    fallback: Box<dyn ReadMfaToken>,
}

impl OnePasswordMfaTokenReader {
    /// Creates a reader for `item` in `account`.
    ///
    /// # Arguments
    /// * `program` - The 1Password CLI to run, normally `op`
    /// * `account` - 1Password account identifier
    /// * `item` - Item name holding the TOTP secret
    /// * `fallback` - Reader used when the CLI cannot produce a 6-digit code
    pub fn new(
        program: String,
        account: String,
        item: String,
        fallback: Box<dyn ReadMfaToken>,
    ) -> Self {
        Self {
            program,
            account,
            item,
            fallback,
        }
    }

    fn fetch(&self) -> Option<String> {
        // Execute 1Password CLI command to retrieve OTP
        let output = Command::new(&self.program)
            .args(["item", "get", "--account", &self.account, &self.item, "--otp"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let otp = String::from_utf8_lossy(&output.stdout).trim().to_string();
        is_well_formed(&otp).then_some(otp)
    }
}

#[async_trait]
impl ReadMfaToken for OnePasswordMfaTokenReader {
    async fn read_mfa_token(&self, mfa_serial: &str) -> Result<String> {
        if let Some(otp) = self.fetch() {
            info!("Retrieved MFA token from 1Password");
            return Ok(otp);
        }
        // Not an error: degrade to the fallback reader
        warn!("Failed to get token from 1Password, falling back to manual input");
        self.fallback.read_mfa_token(mfa_serial).await
    }
}

/// 1Password settings from the command line.
pub struct OnePassword {
    pub program: String,
    pub account: Option<String>,
    pub item: Option<String>,
}

/// Picks the code source from the command line: an explicit code wins, then
/// 1Password when both its account and item are given, then the prompt.
pub fn reader_from_args(code: Option<String>, op: OnePassword) -> Box<dyn ReadMfaToken> {
    match (code, op.account, op.item) {
        (Some(code), _, _) => Box::new(StaticMfaTokenReader::from(code)),
        (None, Some(account), Some(item)) => Box::new(OnePasswordMfaTokenReader::new(
            op.program,
            account,
            item,
            Box::new(StdinMfaTokenReader),
        )),
        _ => Box::new(StdinMfaTokenReader),
    }
}
