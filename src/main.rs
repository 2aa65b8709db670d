//! AWS MFA and role-assumption credential helper.
//!
//! The program performs the following operations:
//! 1. Parses command-line arguments for configuration
//! 2. Loads profile definitions from the AWS config file
//! 3. Reuses the cached session for the profile if it has not expired
//! 4. Otherwise obtains new temporary credentials from STS, prompting for an
//!    MFA code (or reading it from 1Password) when the profile requires one
//! 5. Writes the new session into the profile's target section of the credentials file

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

mod cli;
mod credentials;
mod error;
mod iam;
mod mfa;
mod profile;
mod resolver;
mod sdk;
mod store;
mod sts;

use cli::Args;
use iam::AwsIam;
use mfa::OnePassword;
use profile::ProfileSet;
use resolver::Resolver;
use sdk::SdkContext;
use store::CredentialStore;
use sts::AwsSts;

/// Main entry point.
///
/// Runs on a current-thread runtime: the only suspension points are the STS
/// request and the MFA prompt, both of which the invocation simply waits on.
///
/// # Errors
/// Returns an error (and exits non-zero) if:
/// * The profile is unknown or misconfigured
/// * Authentication with STS fails
/// * The credentials file cannot be read or written
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Args {
        profile,
        target_profile,
        force,
        code,
        duration,
        config_path,
        credentials_path,
        op_account,
        op_item_name,
        op_program,
        verbose,
    } = Args::parse();

    // RUST_LOG still takes precedence over the level chosen here.
    env_logger::Builder::new()
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    // Profiles, cache and the SDK's own profile chain all use the same two files
    let config_path = profile::config_path(config_path)?;
    let profiles = ProfileSet::load(&config_path).await?;
    let store = CredentialStore::new(credentials_path)?;
    let sdk = SdkContext::new(&config_path, store.path());
    let sts = AwsSts::new(sdk.clone());
    let iam = AwsIam::new(sdk);

    let mfa = mfa::reader_from_args(
        code,
        OnePassword {
            program: op_program,
            account: op_account,
            item: op_item_name,
        },
    );

    Resolver::new(&profiles, &store, &sts, &iam, mfa.as_ref())
        .with_duration(duration)
        .with_target(target_profile)
        .resolve(&profile, force)
        .await?;

    Ok(())
}
