//! Profile definitions read from the shared AWS config file.
//!
//! ```ini
//! [profile work]
//! source_profile = work-long-term
//! mfa_serial = arn:aws:iam::123456789012:mfa/tony.stark
//! role_arn = arn:aws:iam::210987654321:role/Admin
//! duration_seconds = 3600
//! region = eu-west-1
//! target_profile = work
//!
//! [profile dev]
//! mfa_serial = auto
//! ```
//!
//! `target_profile` names the credentials-file section the session is cached
//! under. AWS SDKs prefer a config `role_arn` over static keys for the same
//! profile name, so role profiles usually point it at a section that has no
//! `role_arn` of its own. `mfa_serial = auto` asks IAM for the caller's device.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use configparser::ini::Ini;

use crate::store;

/// Suffix of the source profile assumed when `source_profile` is not set.
const LONG_TERM_SUFFIX: &str = "-long-term";

/// `mfa_serial` value that requests IAM device auto-detection.
const AUTO_DETECT: &str = "auto";

/// Resolves the AWS config file location: `path` if given, else `~/.aws/config`.
///
/// # Errors
/// Fails only when no path is given and the home directory is unknown.
pub fn config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    path.or_else(|| dirs::home_dir().map(|d| d.join(".aws").join("config")))
        .context("Could not determine home directory")
}

/// The MFA device a profile authenticates with.
#[derive(Debug, Clone, PartialEq)]
pub enum MfaDevice {
    /// An explicit device serial number or ARN.
    Serial(String),
    /// Look up the caller's devices in IAM and use the first one.
    AutoDetect,
}

impl From<String> for MfaDevice {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case(AUTO_DETECT) {
            Self::AutoDetect
        } else {
            Self::Serial(value)
        }
    }
}

impl fmt::Display for MfaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(serial) => f.write_str(serial),
            Self::AutoDetect => f.write_str(AUTO_DETECT),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub source_profile: String,
    /// Credentials-file section the session is cached under.
    pub target_profile: String,
    pub role_arn: Option<String>,
    pub mfa_serial: Option<MfaDevice>,
    pub role_session_name: Option<String>,
    pub external_id: Option<String>,
    pub duration_seconds: Option<i32>,
    pub region: Option<String>,
}

impl Profile {
    /// Whether this tool knows how to obtain credentials for the profile.
    pub fn is_managed(&self) -> bool {
        self.role_arn.is_some() || self.mfa_serial.is_some()
    }

    /// Session name passed to `AssumeRole`, defaulting to `aws-auth-<name>`.
    pub fn role_session_name(&self) -> String {
        self.role_session_name
            .clone()
            .unwrap_or_else(|| format!("aws-auth-{}", self.name))
    }

    fn from_section(ini: &Ini, section: &str, name: &str) -> Result<Self> {
        let get = |key: &str| ini.get(section, key).filter(|v| !v.is_empty());

        let duration_seconds = get("duration_seconds")
            .map(|d| d.parse::<i32>())
            .transpose()
            .with_context(|| format!("Invalid duration_seconds in profile '{name}'"))?;

        Ok(Self {
            name: name.to_string(),
            source_profile: get("source_profile")
                .unwrap_or_else(|| format!("{name}{LONG_TERM_SUFFIX}")),
            target_profile: get("target_profile").unwrap_or_else(|| name.to_string()),
            role_arn: get("role_arn"),
            mfa_serial: get("mfa_serial").map(MfaDevice::from),
            role_session_name: get("role_session_name"),
            external_id: get("external_id"),
            duration_seconds,
            region: get("region"),
        })
    }
}

/// All profiles defined in the config file, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    /// Loads profiles from the config file at `path` (see [`config_path`]).
    ///
    /// # Returns
    /// * `Ok(ProfileSet)` - All `[default]` and `[profile X]` sections; empty if
    ///   the file does not exist
    /// * `Err(anyhow::Error)` - The file is unreadable, is not valid INI, or a
    ///   profile carries a non-numeric `duration_seconds`
    pub async fn load(path: &Path) -> Result<Self> {
        let ini = store::load_ini(path).await?;
        Self::from_ini(&ini)
    }

    /// Parses profiles from config file content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut ini = store::new_ini();
        ini.read(content.to_string())
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {e}"))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let profiles = ini
            .sections()
            .into_iter()
            .filter_map(|section| {
                let name = match section.as_str() {
                    "default" => "default".to_string(),
                    other => other.strip_prefix("profile ")?.trim().to_string(),
                };
                Some(Profile::from_section(ini, &section, &name).map(|p| (name, p)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { profiles })
    }

    /// Looks up a profile by name (`default`, or `X` for `[profile X]`).
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}
