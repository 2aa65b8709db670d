//! MFA device discovery through IAM, used for `mfa_serial = auto`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};

use crate::sdk::{Caller, SdkContext};

#[async_trait]
pub trait Iam: Send + Sync {
    /// Serial numbers of the MFA devices registered to the calling IAM user.
    async fn list_mfa_devices(&self, caller: &Caller, region: Option<&str>) -> Result<Vec<String>>;
}

/// Picks the device to authenticate with: the first one, with a warning when
/// the user has several. `None` when no device is registered.
pub fn pick_device(devices: Vec<String>) -> Option<String> {
    let mut devices = devices.into_iter();
    let first = devices.next()?;
    if devices.next().is_some() {
        warn!(
            "No MFA device was specified and multiple MFA devices were detected in IAM. \
             Will use the first one: {first}"
        );
    }
    Some(first)
}

/// [`Iam`] backed by `aws-sdk-iam`.
pub struct AwsIam {
    sdk: SdkContext,
}

impl AwsIam {
    pub fn new(sdk: SdkContext) -> Self {
        Self { sdk }
    }
}

#[async_trait]
impl Iam for AwsIam {
    async fn list_mfa_devices(&self, caller: &Caller, region: Option<&str>) -> Result<Vec<String>> {
        debug!("No MFA device specified, auto-detecting");
        let config = self.sdk.load(caller, region).await;

        let output = aws_sdk_iam::Client::new(&config)
            .list_mfa_devices()
            .send()
            .await
            .context("ListMFADevices request failed")?;
        Ok(output
            .mfa_devices()
            .iter()
            .map(|device| device.serial_number().to_string())
            .collect())
    }
}
