//! Container registry capabilities
//!
//! The upload path only ever talks to a [`RegistryApi`]. Two backends implement it:
//! Amazon ECR through the AWS SDK, and any OCI Distribution v2 registry over plain
//! HTTP. Tests substitute an in-memory fake.

pub mod distribution;
pub mod ecr;
pub mod provisioner;

use crate::error::ApiError;
use async_trait::async_trait;

pub use distribution::{DistributionClient, DistributionClientBuilder};
pub use ecr::EcrRegistry;
pub use provisioner::RepositoryProvisioner;

/// A repository as the registry reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub registry_id: String,
    pub arn: String,
    pub uri: String,
}

/// Settings applied when this tool creates a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPolicy {
    pub immutable_tags: bool,
    pub scan_on_push: bool,
    /// KMS encryption with the registry's default key
    pub kms_encryption: bool,
    pub labels: Vec<(String, String)>,
}

impl RepositoryPolicy {
    /// The fixed policy every provisioned repository gets
    pub fn standard() -> Self {
        Self {
            immutable_tags: true,
            scan_on_push: true,
            kms_encryption: true,
            labels: [("bu", "corporate"), ("div", "coe"), ("proj", "adc")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// One layer's multi-part upload, from initiation to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub repository_name: String,
    pub registry_id: String,
    pub digest: String,
}

/// Registry acknowledgement of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartAck {
    pub last_byte_received: u64,
}

/// Final manifest PUT
#[derive(Debug, Clone, Copy)]
pub struct PutImageRequest<'a> {
    pub repository_name: &'a str,
    pub registry_id: &'a str,
    pub tag: &'a str,
    pub manifest: &'a [u8],
    pub media_type: &'a str,
}

/// What the registry committed for a manifest PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutImageOutput {
    pub image_tag: String,
    pub repository_name: String,
    pub registry_id: String,
    pub digest: String,
}

#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Repositories matching `name`; a missing repository is [`ApiError::NotFound`]
    async fn describe_repository(
        &self,
        name: &str,
        registry_id: &str,
    ) -> Result<Vec<Repository>, ApiError>;

    async fn create_repository(
        &self,
        name: &str,
        registry_id: &str,
        policy: &RepositoryPolicy,
    ) -> Result<Repository, ApiError>;

    /// Open an upload session, returning its upload id
    async fn initiate_layer_upload(
        &self,
        repository_name: &str,
        registry_id: &str,
    ) -> Result<String, ApiError>;

    /// Send the inclusive span `[first_byte, last_byte]` of the layer
    async fn upload_layer_part(
        &self,
        session: &UploadSession,
        first_byte: u64,
        last_byte: u64,
        bytes: &[u8],
    ) -> Result<PartAck, ApiError>;

    /// Commit the session; a layer already present is [`ApiError::AlreadyExists`]
    async fn complete_layer_upload(&self, session: &UploadSession) -> Result<String, ApiError>;

    async fn put_image(&self, request: PutImageRequest<'_>) -> Result<PutImageOutput, ApiError>;
}
