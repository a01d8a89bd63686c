//! Amazon ECR backend

use crate::common::aws::map_sdk_error;
use crate::error::ApiError;
use crate::registry::{
    PartAck, PutImageOutput, PutImageRequest, RegistryApi, Repository, RepositoryPolicy,
    UploadSession,
};
use async_trait::async_trait;
use aws_sdk_ecr::Client;
use aws_sdk_ecr::primitives::Blob;
use aws_sdk_ecr::types::{
    EncryptionConfiguration, EncryptionType, ImageScanningConfiguration, ImageTagMutability, Tag,
};

pub struct EcrRegistry {
    client: Client,
}

impl EcrRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(Client::new(config))
    }
}

fn to_repository(repo: &aws_sdk_ecr::types::Repository) -> Repository {
    Repository {
        name: repo.repository_name().unwrap_or_default().to_string(),
        registry_id: repo.registry_id().unwrap_or_default().to_string(),
        arn: repo.repository_arn().unwrap_or_default().to_string(),
        uri: repo.repository_uri().unwrap_or_default().to_string(),
    }
}

fn build_error(err: aws_sdk_ecr::error::BuildError) -> ApiError {
    ApiError::Service(format!("invalid request: {}", err))
}

/// Byte offsets go over the wire as signed 64-bit integers
fn to_wire_offset(offset: u64) -> Result<i64, ApiError> {
    i64::try_from(offset)
        .map_err(|_| ApiError::InvalidLayer(format!("byte offset {} out of range", offset)))
}

#[async_trait]
impl RegistryApi for EcrRegistry {
    async fn describe_repository(
        &self,
        name: &str,
        registry_id: &str,
    ) -> Result<Vec<Repository>, ApiError> {
        let output = self
            .client
            .describe_repositories()
            .registry_id(registry_id)
            .repository_names(name)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .is_some_and(|e| e.is_repository_not_found_exception());
                match map_sdk_error(err) {
                    ApiError::Service(message) if missing => ApiError::NotFound(message),
                    other => other,
                }
            })?;

        Ok(output.repositories().iter().map(to_repository).collect())
    }

    async fn create_repository(
        &self,
        name: &str,
        registry_id: &str,
        policy: &RepositoryPolicy,
    ) -> Result<Repository, ApiError> {
        let mutability = if policy.immutable_tags {
            ImageTagMutability::Immutable
        } else {
            ImageTagMutability::Mutable
        };
        let encryption = if policy.kms_encryption {
            EncryptionType::Kms
        } else {
            EncryptionType::Aes256
        };

        let mut request = self
            .client
            .create_repository()
            .registry_id(registry_id)
            .repository_name(name)
            .image_tag_mutability(mutability)
            .image_scanning_configuration(
                ImageScanningConfiguration::builder()
                    .scan_on_push(policy.scan_on_push)
                    .build(),
            )
            .encryption_configuration(
                EncryptionConfiguration::builder()
                    .encryption_type(encryption)
                    .build()
                    .map_err(build_error)?,
            );
        for (key, value) in &policy.labels {
            request = request.tags(
                Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(build_error)?,
            );
        }

        let output = request.send().await.map_err(map_sdk_error)?;
        output
            .repository()
            .map(to_repository)
            .ok_or_else(|| ApiError::Service("create repository returned no repository".to_string()))
    }

    async fn initiate_layer_upload(
        &self,
        repository_name: &str,
        registry_id: &str,
    ) -> Result<String, ApiError> {
        let output = self
            .client
            .initiate_layer_upload()
            .registry_id(registry_id)
            .repository_name(repository_name)
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Service("initiate layer upload returned no upload id".to_string()))
    }

    async fn upload_layer_part(
        &self,
        session: &UploadSession,
        first_byte: u64,
        last_byte: u64,
        bytes: &[u8],
    ) -> Result<PartAck, ApiError> {
        let output = self
            .client
            .upload_layer_part()
            .registry_id(&session.registry_id)
            .repository_name(&session.repository_name)
            .upload_id(&session.upload_id)
            .part_first_byte(to_wire_offset(first_byte)?)
            .part_last_byte(to_wire_offset(last_byte)?)
            .layer_part_blob(Blob::new(bytes.to_vec()))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let last_byte_received = output
            .last_byte_received()
            .and_then(|b| u64::try_from(b).ok())
            .unwrap_or(last_byte);
        Ok(PartAck { last_byte_received })
    }

    async fn complete_layer_upload(&self, session: &UploadSession) -> Result<String, ApiError> {
        let output = self
            .client
            .complete_layer_upload()
            .registry_id(&session.registry_id)
            .repository_name(&session.repository_name)
            .upload_id(&session.upload_id)
            .layer_digests(&session.digest)
            .send()
            .await
            .map_err(|err| {
                let exists = err
                    .as_service_error()
                    .is_some_and(|e| e.is_layer_already_exists_exception());
                let invalid = err.as_service_error().is_some_and(|e| {
                    e.is_invalid_layer_exception() || e.is_layer_part_too_small_exception()
                });
                match map_sdk_error(err) {
                    ApiError::Service(message) if exists => ApiError::AlreadyExists(message),
                    ApiError::Service(message) if invalid => ApiError::InvalidLayer(message),
                    other => other,
                }
            })?;

        Ok(output
            .layer_digest()
            .map(str::to_string)
            .unwrap_or_else(|| session.digest.clone()))
    }

    async fn put_image(&self, request: PutImageRequest<'_>) -> Result<PutImageOutput, ApiError> {
        let manifest = String::from_utf8(request.manifest.to_vec())
            .map_err(|e| ApiError::InvalidLayer(format!("manifest is not UTF-8: {}", e)))?;

        let output = self
            .client
            .put_image()
            .registry_id(request.registry_id)
            .repository_name(request.repository_name)
            .image_tag(request.tag)
            .image_manifest(manifest)
            .image_manifest_media_type(request.media_type)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let image = output
            .image()
            .ok_or_else(|| ApiError::Service("put image returned no image".to_string()))?;
        let image_id = image.image_id();

        Ok(PutImageOutput {
            image_tag: image_id
                .and_then(|id| id.image_tag())
                .unwrap_or(request.tag)
                .to_string(),
            repository_name: image
                .repository_name()
                .unwrap_or(request.repository_name)
                .to_string(),
            registry_id: image.registry_id().unwrap_or(request.registry_id).to_string(),
            digest: image_id
                .and_then(|id| id.image_digest())
                .unwrap_or_default()
                .to_string(),
        })
    }
}
