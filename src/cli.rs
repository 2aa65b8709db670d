//! Command-line interface definitions.

use std::path::PathBuf;

use clap::Parser;

/// AWS MFA session and role credential helper.
///
/// Resolves temporary credentials for a profile defined in the AWS config
/// file, reusing the cached session in the credentials file while it is
/// valid and otherwise calling STS (GetSessionToken with MFA, or AssumeRole).
#[derive(Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Profile to resolve credentials for
    #[arg(short, long, env = "AWS_PROFILE", default_value = "default")]
    pub profile: String,

    /// Credentials-file section to cache the session under, overriding the profile's target_profile
    #[arg(short, long, env = "TARGET_PROFILE")]
    pub target_profile: Option<String>,

    /// Ignore cached credentials and always request new ones
    #[arg(short, long)]
    pub force: bool,

    /// MFA code; prompted for when required and not given
    #[arg(short, long, env = "AWS_MFA_CODE")]
    pub code: Option<String>,

    /// Session duration in seconds (900-129600), overriding the profile's duration_seconds
    #[arg(
        short,
        long,
        env = "AWS_SESSION_DURATION",
        value_parser = clap::value_parser!(i32).range(900..=129_600)
    )]
    pub duration: Option<i32>,

    /// Path to AWS config file [default: ~/.aws/config]
    #[arg(long, env = "AWS_CONFIG_FILE")]
    pub config_path: Option<PathBuf>,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_path: Option<PathBuf>,

    /// 1Password account for automatic MFA token retrieval
    #[arg(long, env = "AWS_MFA_UPDATER_OP_ACCOUNT")]
    pub op_account: Option<String>,

    /// 1Password item name containing the TOTP
    #[arg(long, env = "AWS_MFA_UPDATER_OP_ITEM_NAME")]
    pub op_item_name: Option<String>,

    /// 1Password CLI executable
    #[arg(long, env = "AWS_MFA_UPDATER_OP_PROGRAM", default_value = "op")]
    pub op_program: String,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}
