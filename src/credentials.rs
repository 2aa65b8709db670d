//! Temporary AWS credentials as they are cached in the shared credentials file.

use std::{fmt, time::SystemTime};

use aws_sdk_sts::{config::Credentials, types};
use aws_smithy_types::{DateTime, date_time::Format};

/// Provider name reported to the SDK for credentials handed back to it.
const PROVIDER_NAME: &str = "aws-auth";

/// A session credential triple plus its expiration.
#[derive(Clone, PartialEq)]
pub struct CredentialRecord {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime,
}

impl CredentialRecord {
    /// A record is reusable only while its expiration is strictly in the future.
    pub fn is_valid_at(&self, now: DateTime) -> bool {
        self.expiration > now
    }

    /// RFC 3339 rendering of the expiration, as written to the credentials file.
    pub fn expiration_string(&self) -> String {
        self.expiration
            .fmt(Format::DateTime)
            .unwrap_or_else(|_| self.expiration.secs().to_string())
    }

    /// Parses an expiration written by [`CredentialRecord::expiration_string`]
    /// or by other tools that include an offset.
    pub fn parse_expiration(value: &str) -> Option<DateTime> {
        DateTime::from_str(value, Format::DateTime)
            .or_else(|_| DateTime::from_str(value, Format::DateTimeWithOffset))
            .ok()
    }

    /// Converts the record into SDK credentials so it can act as the caller of
    /// a chained STS request.
    pub fn to_sdk_credentials(&self) -> Credentials {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
            SystemTime::try_from(self.expiration).ok(),
            PROVIDER_NAME,
        )
    }
}

impl From<&types::Credentials> for CredentialRecord {
    fn from(credentials: &types::Credentials) -> Self {
        Self {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration: *credentials.expiration(),
        }
    }
}

// Secrets stay out of logs and panics.
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration_string())
            .finish()
    }
}
