//! Credential cache backed by the shared AWS credentials file.
//!
//! Each resolved profile owns one section of the file:
//!
//! ```ini
//! [work]
//! aws_access_key_id=ASIA...           # Temporary access key
//! aws_secret_access_key=...           # Temporary secret key
//! aws_session_token=...               # Session token (primary)
//! aws_security_token=...              # Session token (legacy compatibility)
//! expiration=2023-12-01T12:00:00Z     # When credentials expire
//! ```
//!
//! Writes replace exactly one section and leave every other section as it
//! was. Comments are not preserved.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use configparser::ini::Ini;
use log::debug;
use tokio::fs;

use crate::credentials::CredentialRecord;

/// Bucket for keys that appear before the first section header. AWS files
/// name a real profile `default`, so the parser's own default bucket must not
/// use that name or `[default]` would be written back without its header.
const UNSECTIONED: &str = "__unsectioned__";

/// Builds a case-sensitive INI parser for the AWS config and credentials files.
///
/// Only whole-line comments are recognised: values such as
/// `credential_process` commands may legitimately contain `#` or `;`.
pub fn new_ini() -> Ini {
    let mut defaults = Ini::new_cs().defaults();
    defaults.default_section = UNSECTIONED.to_string();
    defaults.enable_inline_comments = false;
    Ini::new_from_defaults(defaults)
}

/// Reads an INI file, treating a missing file as empty.
pub async fn load_ini(path: &Path) -> Result<Ini> {
    let mut ini = new_ini();
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!("{} does not exist, starting empty", path.display());
        return Ok(ini);
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ini.read(content)
        .map_err(|e| anyhow!("Failed to parse {}: {e}", path.display()))?;
    Ok(ini)
}

/// Read/write access to cached credentials keyed by profile name.
pub struct CredentialStore {
    /// Path to the AWS credentials file (typically ~/.aws/credentials)
    path: PathBuf,
}

impl CredentialStore {
    /// Opens the store at `path`, or at `~/.aws/credentials` when no path is given.
    ///
    /// The file does not need to exist yet; it is created on the first write.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| dirs::home_dir().map(|d| d.join(".aws").join("credentials")))
            .context("Could not determine home directory")?;
        Ok(Self { path })
    }

    /// Location of the credentials file this store reads and rewrites.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the last record written for `profile`.
    ///
    /// Sections holding long-term keys (no session token) or an unreadable
    /// expiration are not cached records and yield `None`.
    ///
    /// # Errors
    /// The file exists but cannot be read or is not valid INI.
    pub async fn read(&self, profile: &str) -> Result<Option<CredentialRecord>> {
        let ini = load_ini(&self.path).await?;
        let get = |key: &str| ini.get(profile, key).filter(|v| !v.is_empty());

        let (Some(access_key_id), Some(secret_access_key), Some(session_token)) = (
            get("aws_access_key_id"),
            get("aws_secret_access_key"),
            get("aws_session_token"),
        ) else {
            debug!("No cached session for profile '{profile}'");
            return Ok(None);
        };

        let Some(expiration) = get("expiration")
            .as_deref()
            .and_then(CredentialRecord::parse_expiration)
        else {
            debug!("Cached session for profile '{profile}' has no usable expiration");
            return Ok(None);
        };

        Ok(Some(CredentialRecord {
            access_key_id,
            secret_access_key,
            session_token,
            expiration,
        }))
    }

    /// Replaces the section for `profile` with `record`.
    ///
    /// The new content goes to a sibling temporary file that is then renamed
    /// over the credentials file, so readers see either the old or the new
    /// file and never a partial one.
    ///
    /// # Arguments
    /// * `profile` - Section name; any existing keys in it are dropped
    /// * `record` - The session to store, including the legacy `aws_security_token`
    ///
    /// # Errors
    /// Any I/O failure while reading, staging, or renaming the file. The
    /// original file is left as it was when the rename does not happen.
    pub async fn write(&self, profile: &str, record: &CredentialRecord) -> Result<()> {
        let mut ini = load_ini(&self.path).await?;

        ini.remove_section(profile);
        let mut set = |key: &str, value: &str| {
            ini.set(profile, key, Some(value.to_string()));
        };
        set("aws_access_key_id", &record.access_key_id);
        set("aws_secret_access_key", &record.secret_access_key);
        set("aws_session_token", &record.session_token);
        set("aws_security_token", &record.session_token);
        set("expiration", &record.expiration_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let staging = self.staging_path();
        fs::write(&staging, ini.writes())
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!("Wrote profile '{profile}' to {}", self.path.display());
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials".into());
        name.push(".aws-auth.tmp");
        self.path.with_file_name(name)
    }
}
