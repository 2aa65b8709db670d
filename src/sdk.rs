//! Per-call AWS SDK configuration shared by the STS and IAM clients.

use std::path::Path;

use aws_config::{
    Region, SdkConfig,
    profile::profile_file::{ProfileFileKind, ProfileFiles},
};
use log::debug;

/// STS and IAM are global services; this region is used when nothing else is configured.
const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Whose credentials sign a request.
#[derive(Debug, Clone)]
pub enum Caller {
    /// Long-term credentials, resolved by the SDK's chain for this profile.
    Profile(String),
    /// A session obtained earlier in a role chain.
    Session(crate::credentials::CredentialRecord),
}

/// The configuration context handed to every SDK client, built once per
/// invocation from the same files the tool itself reads and writes.
#[derive(Debug, Clone)]
pub struct SdkContext {
    profile_files: ProfileFiles,
}

impl SdkContext {
    /// Creates a context whose profile chain reads `config` and `credentials`
    /// instead of the SDK's default locations.
    ///
    /// # Arguments
    /// * `config` - The AWS config file the profiles were loaded from
    /// * `credentials` - The credentials file the cache is written to; long-term
    ///   keys of source profiles are read from here as well
    pub fn new(config: &Path, credentials: &Path) -> Self {
        let profile_files = ProfileFiles::builder()
            .with_file(ProfileFileKind::Config, config)
            .with_file(ProfileFileKind::Credentials, credentials)
            .build();
        Self { profile_files }
    }

    /// Loads the SDK configuration for `caller`, falling back to
    /// `us-east-1` when neither `region` nor the environment names one.
    pub async fn load(&self, caller: &Caller, region: Option<&str>) -> SdkConfig {
        let mut loader = aws_config::from_env().profile_files(self.profile_files.clone());
        loader = match caller {
            Caller::Profile(name) => loader.profile_name(name),
            Caller::Session(record) => loader.credentials_provider(record.to_sdk_credentials()),
        };
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;

        match sdk_config.region() {
            Some(region) => {
                debug!("Using region: {region}");
                sdk_config
            }
            None => {
                debug!("No region configured, using default {DEFAULT_AWS_REGION}");
                sdk_config
                    .into_builder()
                    .region(Region::new(DEFAULT_AWS_REGION))
                    .build()
            }
        }
    }
}
