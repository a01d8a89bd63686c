//! End-to-end transfer of one exported image into a repository
//!
//! Order is fixed: read and validate the manifest, provision the repository, upload
//! the config blob, upload every layer in manifest order, then PUT the manifest. The
//! first fatal error stops the run; whatever the registry already accepted stays
//! there and a re-run skips it through the "already exists" path.

use crate::common::{Timer, cancellable};
use crate::digest::DigestUtils;
use crate::error::{ReassemblerError, Result};
use crate::image::{IMAGE_MANIFEST_MAX_SIZE, ImageManifest};
use crate::logging::Logger;
use crate::registry::{PutImageRequest, RegistryApi, RepositoryProvisioner};
use crate::upload::{
    LAYER_PART_MAX_SIZE, LayerOutcome, LayerReport, LayerTarget, LayerUploader,
    chunked::part_count,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Directory holding `manifest.json` and the blobs named by digest
    pub layers_path: PathBuf,
    pub repository_name: String,
    pub registry_id: String,
    pub tag: String,
}

/// The image as committed by the manifest PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    pub image_tag: String,
    pub repository_name: String,
    pub registry_id: String,
    pub digest: String,
    pub repository_uri: String,
    pub layers: Vec<LayerReport>,
}

impl CommittedImage {
    pub fn layers_committed(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| matches!(l.outcome, LayerOutcome::Committed(_)))
            .count()
    }

    pub fn layers_skipped(&self) -> usize {
        self.layers.len() - self.layers_committed()
    }
}

/// One blob a run would upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBlob {
    pub digest: String,
    pub path: PathBuf,
    pub size: u64,
    pub parts: usize,
}

/// What a run would do, computed without touching the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub media_type: String,
    pub manifest_size: u64,
    pub blobs: Vec<PlannedBlob>,
}

impl TransferPlan {
    pub fn total_bytes(&self) -> u64 {
        self.blobs.iter().map(|b| b.size).sum()
    }

    pub fn total_parts(&self) -> usize {
        self.blobs.iter().map(|b| b.parts).sum()
    }
}

/// Local path of the blob for `digest` under `layers_path`
pub fn blob_path(layers_path: &Path, digest: &str) -> PathBuf {
    layers_path.join(DigestUtils::blob_file_name(digest))
}

/// Read and parse `layers_path/manifest.json`, returning the raw bytes alongside
pub async fn read_manifest(layers_path: &Path) -> Result<(Vec<u8>, ImageManifest)> {
    let path = layers_path.join(MANIFEST_FILE_NAME);
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|e| ReassemblerError::file_system(&path, e))?;
    let manifest = ImageManifest::from_blob(&raw)?;
    manifest.validate_layer_count()?;
    Ok((raw, manifest))
}

fn check_manifest_size(raw: &[u8]) -> Result<()> {
    let size = raw.len() as u64;
    if size > IMAGE_MANIFEST_MAX_SIZE {
        return Err(ReassemblerError::ManifestTooLarge {
            size,
            limit: IMAGE_MANIFEST_MAX_SIZE,
        });
    }
    Ok(())
}

/// Validate everything a run needs locally and report what it would send
///
/// Touches only the local filesystem, so it is what a dry run executes.
pub async fn plan(
    layers_path: &Path,
    part_size: u64,
    verify_digests: bool,
) -> Result<TransferPlan> {
    let (raw, manifest) = read_manifest(layers_path).await?;
    check_manifest_size(&raw)?;

    let mut blobs = Vec::with_capacity(manifest.total_blobs());
    for descriptor in manifest.upload_order() {
        let path = blob_path(layers_path, &descriptor.digest);
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ReassemblerError::file_system(&path, e))?
            .len();
        if verify_digests {
            DigestUtils::verify_file(&path, &descriptor.digest).await?;
        }
        blobs.push(PlannedBlob {
            digest: descriptor.digest.clone(),
            parts: part_count(size, part_size),
            path,
            size,
        });
    }

    Ok(TransferPlan {
        media_type: manifest.media_type.as_str().to_string(),
        manifest_size: raw.len() as u64,
        blobs,
    })
}

pub struct TransferCoordinator<'a> {
    registry: &'a dyn RegistryApi,
    output: Logger,
    part_size: u64,
    verify_digests: bool,
}

impl<'a> TransferCoordinator<'a> {
    pub fn new(registry: &'a dyn RegistryApi, output: Logger) -> Self {
        Self {
            registry,
            output,
            part_size: LAYER_PART_MAX_SIZE,
            verify_digests: false,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_digest_verification(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    pub async fn run(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<CommittedImage> {
        let timer = Timer::start("Image upload");

        self.output.subsection("Reading manifest");
        let (raw, manifest) = read_manifest(&request.layers_path).await?;
        self.output.info(&format!(
            "Manifest {} lists {} layers plus config",
            manifest.media_type,
            manifest.layers.len()
        ));

        self.output.subsection("Provisioning repository");
        let repository = RepositoryProvisioner::new(self.registry, self.output.clone())
            .ensure(&request.repository_name, &request.registry_id, cancel)
            .await?;

        self.output.subsection("Uploading layers");
        let uploader = LayerUploader::new(self.registry, self.output.clone())
            .with_part_size(self.part_size)
            .with_digest_verification(self.verify_digests);

        let total = manifest.total_blobs();
        let mut layers = Vec::with_capacity(total);
        for (index, descriptor) in manifest.upload_order().enumerate() {
            let path = blob_path(&request.layers_path, &descriptor.digest);
            self.output.step(&format!(
                "Blob {}/{}: {}",
                index + 1,
                total,
                DigestUtils::format_digest_short(&descriptor.digest)
            ));

            let target = LayerTarget {
                repository_name: &request.repository_name,
                registry_id: &request.registry_id,
                digest: &descriptor.digest,
                path: &path,
            };
            layers.push(uploader.upload(&target, cancel).await?);
        }

        self.output.subsection("Pushing manifest");
        check_manifest_size(&raw)?;
        let put = cancellable(cancel, async {
            self.registry
                .put_image(PutImageRequest {
                    repository_name: &request.repository_name,
                    registry_id: &request.registry_id,
                    tag: &request.tag,
                    manifest: &raw,
                    media_type: manifest.media_type.as_str(),
                })
                .await
                .map_err(|source| ReassemblerError::ManifestPut {
                    repository: request.repository_name.clone(),
                    tag: request.tag.clone(),
                    source,
                })
        })
        .await?;

        timer.log_elapsed(&self.output);

        Ok(CommittedImage {
            image_tag: put.image_tag,
            repository_name: put.repository_name,
            registry_id: put.registry_id,
            digest: put.digest,
            repository_uri: repository.uri,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_uses_file_name_form() {
        assert_eq!(
            blob_path(Path::new("/tmp/layers"), "sha256:abcd"),
            PathBuf::from("/tmp/layers/sha256__abcd")
        );
    }

    #[test]
    fn test_manifest_size_ceiling() {
        assert!(check_manifest_size(&vec![b' '; IMAGE_MANIFEST_MAX_SIZE as usize]).is_ok());
        assert!(matches!(
            check_manifest_size(&vec![b' '; IMAGE_MANIFEST_MAX_SIZE as usize + 1]),
            Err(ReassemblerError::ManifestTooLarge { .. })
        ));
    }
}
