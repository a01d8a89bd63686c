//! Shared AWS SDK plumbing: config loading, role assumption and error mapping

use crate::error::{ApiError, ReassemblerError, Result};
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use std::time::Duration;

const ASSUMED_ROLE_SESSION_NAME: &str = "image-reassembler";
const ASSUMED_ROLE_SESSION_LENGTH: Duration = Duration::from_secs(60 * 60);

/// Map an SDK failure, keeping the service's own error code and message
pub fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => ApiError::Service(message),
        _ => ApiError::Transport(message),
    }
}

/// Ambient credentials chain for one region
pub async fn load_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// Config whose credentials come from assuming `role_arn` on top of `base`
pub async fn assume_role_config(
    base: &SdkConfig,
    role_arn: &str,
    external_id: Option<&str>,
) -> SdkConfig {
    let mut builder = AssumeRoleProvider::builder(role_arn)
        .session_name(ASSUMED_ROLE_SESSION_NAME)
        .session_length(ASSUMED_ROLE_SESSION_LENGTH)
        .configure(base);
    if let Some(external_id) = external_id {
        builder = builder.external_id(external_id);
    }
    let provider = builder.build().await;

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).credentials_provider(provider);
    if let Some(region) = base.region() {
        loader = loader.region(region.clone());
    }
    loader.load().await
}

/// Account id of whoever `config` authenticates as
pub async fn caller_account(config: &SdkConfig) -> Result<String> {
    let identity = aws_sdk_sts::Client::new(config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| ReassemblerError::Validation(format!(
            "error getting caller identity: {}",
            map_sdk_error(e)
        )))?;

    identity
        .account()
        .map(str::to_string)
        .ok_or_else(|| ReassemblerError::Validation("caller identity has no account".to_string()))
}
