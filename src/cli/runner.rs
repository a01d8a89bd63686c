//! The `assemble` workflow: download, optionally build, then push

use crate::build;
use crate::cli::config::AssembleConfig;
use crate::common::aws;
use crate::download::{BulkRetriever, RetrieveRequest};
use crate::error::{ReassemblerError, Result};
use crate::logging::Logger;
use crate::registry::{DistributionClient, EcrRegistry, RegistryApi};
use crate::storage::{OsFilesystem, S3Fetcher, S3Pager};
use crate::transfer::{self, MANIFEST_FILE_NAME, TransferCoordinator, TransferRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Registry id placeholder for dry runs, which never resolve an identity
const UNRESOLVED_REGISTRY_ID: &str = "<unresolved>";

pub struct Runner {
    config: AssembleConfig,
    output: Logger,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(config: AssembleConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;

        let output = if config.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(config.verbose).with_debug(config.debug)
        };

        Ok(Self {
            config,
            output,
            cancel,
        })
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        self.output.section("Image Reassembler");
        if self.config.verbose {
            if let Ok(effective) = serde_json::to_string_pretty(&self.config) {
                self.output.detail(&format!("Effective configuration:\n{}", effective));
            }
        }

        let mut base_config = None;
        let downloaded = if self.config.no_download {
            Vec::new()
        } else {
            let sdk_config = aws::load_config(&self.config.region).await;
            let downloaded = self.download(&sdk_config).await?;
            base_config = Some(sdk_config);
            if downloaded.is_empty() {
                self.output.error("no layers downloaded");
                return Ok(());
            }
            downloaded
        };

        if self.config.download_only {
            self.output.success(&format!("Downloaded {} files", downloaded.len()));
            return Ok(());
        }

        let layers_path = self.layers_path(&downloaded)?;
        let tag = self
            .config
            .effective_tag()
            .ok_or_else(|| ReassemblerError::Validation("no tag could be determined".to_string()))?;
        let repository_name = self
            .config
            .repository_name
            .clone()
            .ok_or_else(|| ReassemblerError::Validation("--repository-name is required".to_string()))?;

        if self.config.build_local {
            self.output.subsection("Building local image");
            build::build_local(&layers_path, &tag, &self.output).await?;
        }

        if self.config.dry_run {
            return self.dry_run(&layers_path, &repository_name, &tag).await;
        }

        self.output.subsection("Connecting to registry");
        let (registry, registry_id) = self.connect_registry(base_config).await?;
        self.output.info(&format!("Registry id: {}", registry_id));

        let request = TransferRequest {
            layers_path,
            repository_name,
            registry_id,
            tag,
        };
        let committed = TransferCoordinator::new(registry.as_ref(), self.output.clone())
            .with_part_size(self.config.part_size)
            .with_digest_verification(self.config.verify_digests)
            .run(&request, &self.cancel)
            .await?;

        if self.config.remove {
            self.remove_downloads().await;
        }

        self.output.summary_kv(
            "Push summary",
            &[
                ("Repository", committed.repository_uri.clone()),
                ("Digest", committed.digest.clone()),
                ("Layers uploaded", committed.layers_committed().to_string()),
                ("Layers already present", committed.layers_skipped().to_string()),
                ("Elapsed", self.output.format_duration(self.output.elapsed())),
            ],
        );
        self.output.success(&format!(
            "image {} successfully put to {} in registry with id {}",
            committed.image_tag, committed.repository_name, committed.registry_id
        ));
        Ok(())
    }

    async fn download(&self, sdk_config: &aws_config::SdkConfig) -> Result<Vec<PathBuf>> {
        let bucket = self
            .config
            .bucket
            .clone()
            .ok_or_else(|| ReassemblerError::Validation("--s3-bucket is required".to_string()))?;
        let prefix = self.config.prefix.clone().unwrap_or_default();

        self.output.subsection("Downloading layers");
        self.output
            .info(&format!("Source: s3://{}/{}", bucket, prefix));

        let client = aws_sdk_s3::Client::new(sdk_config);
        let mut pager = S3Pager::new(client.clone(), bucket.clone(), prefix.clone());
        let retriever = BulkRetriever::new(S3Fetcher::new(client), OsFilesystem, self.output.clone());
        let request = RetrieveRequest {
            bucket,
            prefix,
            local_root: self.config.local_path.clone(),
        };

        retriever.retrieve(&mut pager, &request, &self.cancel).await
    }

    /// Directory holding the manifest: next to the downloaded manifest, else next to
    /// the first downloaded file, else `--layers-path`
    fn layers_path(&self, downloaded: &[PathBuf]) -> Result<PathBuf> {
        let manifest = downloaded
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == MANIFEST_FILE_NAME))
            .or_else(|| downloaded.first());

        match manifest.and_then(|p| p.parent()) {
            Some(parent) => Ok(parent.to_path_buf()),
            None => self.config.layers_path.clone().ok_or_else(|| {
                ReassemblerError::Validation("--layers-path is required".to_string())
            }),
        }
    }

    async fn dry_run(&self, layers_path: &Path, repository_name: &str, tag: &str) -> Result<()> {
        self.output.subsection("Dry run");
        let plan = transfer::plan(layers_path, self.config.part_size, self.config.verify_digests).await?;

        for blob in &plan.blobs {
            self.output.detail(&format!(
                "{} {} in {} parts",
                blob.path.display(),
                self.output.format_size(blob.size),
                blob.parts
            ));
        }
        self.output.summary_kv(
            "Dry run plan",
            &[
                (
                    "Target",
                    format!(
                        "{}:{} ({})",
                        repository_name,
                        tag,
                        self.config.registry_id.as_deref().unwrap_or(UNRESOLVED_REGISTRY_ID)
                    ),
                ),
                ("Manifest type", plan.media_type.clone()),
                ("Manifest size", self.output.format_size(plan.manifest_size)),
                ("Blobs", plan.blobs.len().to_string()),
                ("Parts", plan.total_parts().to_string()),
                ("Total size", self.output.format_size(plan.total_bytes())),
            ],
        );
        self.output.info("Dry run mode - skipping actual upload");
        Ok(())
    }

    async fn connect_registry(
        &self,
        base_config: Option<aws_config::SdkConfig>,
    ) -> Result<(Box<dyn RegistryApi>, String)> {
        if let Some(url) = &self.config.registry_url {
            let client = DistributionClient::builder(url.clone())
                .with_credentials(self.config.username.clone(), self.config.password.clone())
                .with_skip_tls(self.config.skip_tls)
                .with_timeout(Duration::from_secs(self.config.timeout))
                .build()?;
            let registry_id = self
                .config
                .registry_id
                .clone()
                .unwrap_or_else(|| client.registry_host());
            self.output.info(&format!("Pushing to Distribution registry {}", url));
            return Ok((Box::new(client), registry_id));
        }

        let base_config = match base_config {
            Some(config) => config,
            None => aws::load_config(&self.config.region).await,
        };
        let ecr_config = match &self.config.put_role_to_assume {
            Some(role) => {
                self.output.info(&format!("Assuming role {}", role));
                aws::assume_role_config(
                    &base_config,
                    role,
                    self.config.put_role_external_id.as_deref(),
                )
                .await
            }
            None => base_config,
        };

        let registry_id = match &self.config.registry_id {
            Some(id) => id.clone(),
            None => aws::caller_account(&ecr_config).await?,
        };
        Ok((Box::new(EcrRegistry::from_config(&ecr_config)), registry_id))
    }

    async fn remove_downloads(&self) {
        let Some(root) = self.config.download_root() else {
            return;
        };
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => self.output.info(&format!("{} removed", root.display())),
            Err(e) => self
                .output
                .warning(&format!("error removing {}: {}", root.display(), e)),
        }
    }
}
