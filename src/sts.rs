//! STS calls behind a trait, so resolution can be exercised without the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sts::Client;
use log::info;

use crate::{
    credentials::CredentialRecord,
    sdk::{Caller, SdkContext},
};

#[derive(Debug, Clone)]
pub struct SessionTokenRequest {
    pub serial_number: String,
    pub token_code: String,
    pub duration_seconds: i32,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub role_session_name: String,
    pub duration_seconds: i32,
    pub external_id: Option<String>,
    pub serial_number: Option<String>,
    pub token_code: Option<String>,
    pub region: Option<String>,
}

#[async_trait]
pub trait Sts: Send + Sync {
    async fn get_session_token(
        &self,
        caller: &Caller,
        request: SessionTokenRequest,
    ) -> Result<CredentialRecord>;

    async fn assume_role(&self, caller: &Caller, request: AssumeRoleRequest)
    -> Result<CredentialRecord>;
}

/// [`Sts`] backed by `aws-sdk-sts` and the ambient SDK configuration.
pub struct AwsSts {
    sdk: SdkContext,
}

impl AwsSts {
    pub fn new(sdk: SdkContext) -> Self {
        Self { sdk }
    }

    async fn client(&self, caller: &Caller, region: Option<&str>) -> Client {
        Client::new(&self.sdk.load(caller, region).await)
    }
}

#[async_trait]
impl Sts for AwsSts {
    async fn get_session_token(
        &self,
        caller: &Caller,
        request: SessionTokenRequest,
    ) -> Result<CredentialRecord> {
        info!("Calling STS GetSessionToken - Duration: {}s", request.duration_seconds);
        let client = self.client(caller, request.region.as_deref()).await;

        client
            .get_session_token()
            .duration_seconds(request.duration_seconds)
            .serial_number(request.serial_number)
            .token_code(request.token_code)
            .send()
            .await
            .context("GetSessionToken request failed")?
            .credentials()
            .map(CredentialRecord::from)
            .context("No credentials returned")
    }

    async fn assume_role(
        &self,
        caller: &Caller,
        request: AssumeRoleRequest,
    ) -> Result<CredentialRecord> {
        info!(
            "Calling STS AssumeRole for {} - Duration: {}s",
            request.role_arn, request.duration_seconds
        );
        let client = self.client(caller, request.region.as_deref()).await;

        client
            .assume_role()
            .role_arn(request.role_arn)
            .role_session_name(request.role_session_name)
            .duration_seconds(request.duration_seconds)
            .set_external_id(request.external_id)
            .set_serial_number(request.serial_number)
            .set_token_code(request.token_code)
            .send()
            .await
            .context("AssumeRole request failed")?
            .credentials()
            .map(CredentialRecord::from)
            .context("No credentials returned")
    }
}
