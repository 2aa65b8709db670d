//! Failure categories surfaced by credential resolution.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The requested profile is not defined in the config file.
    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),
    /// The profile exists but cannot be resolved as configured.
    #[error("Invalid profile '{profile}': {reason}")]
    InvalidProfile { profile: String, reason: String },
    /// Bad MFA code, expired source credentials, or an STS failure.
    #[error("Authentication failed for profile '{profile}'")]
    AuthenticationFailed {
        profile: String,
        #[source]
        source: anyhow::Error,
    },
    /// Reading or writing the credentials file failed.
    #[error("Credential store error")]
    Store(#[source] anyhow::Error),
}

impl Error {
    /// A configuration problem with `profile`, detected before any SDK call.
    pub fn invalid(profile: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            profile: profile.to_string(),
            reason: reason.into(),
        }
    }

    /// An authentication failure for `profile`, keeping `source` for diagnostics.
    pub fn auth(profile: &str, source: anyhow::Error) -> Self {
        Self::AuthenticationFailed {
            profile: profile.to_string(),
            source,
        }
    }
}
