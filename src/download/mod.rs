//! Bulk retrieval of exported image layers
//!
//! Walks every page of a listing and mirrors each object to
//! `local_root/bucket/key`. Objects are fetched strictly one at a time and a page is
//! fully drained before the next one is requested.

use crate::common::cancellable;
use crate::error::{ReassemblerError, Result};
use crate::logging::Logger;
use crate::storage::{LocalFilesystem, ObjectFetcher, ObjectPager, RemoteObject};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// What to retrieve and where to put it
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub bucket: String,
    pub prefix: String,
    pub local_root: PathBuf,
}

pub struct BulkRetriever<F, S> {
    fetcher: F,
    filesystem: S,
    output: Logger,
}

impl<F, S> BulkRetriever<F, S>
where
    F: ObjectFetcher,
    S: LocalFilesystem,
{
    pub fn new(fetcher: F, filesystem: S, output: Logger) -> Self {
        Self {
            fetcher,
            filesystem,
            output,
        }
    }

    /// Download every listed object, returning the local paths in listing order
    ///
    /// An empty result means the prefix held nothing; callers treat that as
    /// "nothing to do" rather than a failure.
    pub async fn retrieve(
        &self,
        pager: &mut dyn ObjectPager,
        request: &RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let mut downloaded = Vec::new();
        let mut page_number = 0usize;

        while pager.has_more_pages() {
            page_number += 1;
            let page = cancellable(cancel, async {
                pager
                    .next_page()
                    .await
                    .map_err(|source| ReassemblerError::Listing {
                        bucket: request.bucket.clone(),
                        prefix: request.prefix.clone(),
                        source,
                    })
            })
            .await?;

            self.output.detail(&format!(
                "Listing page {} returned {} objects",
                page_number,
                page.len()
            ));

            for object in &page {
                if object.key.ends_with('/') {
                    self.output
                        .detail(&format!("Skipping directory marker {}", object.key));
                    continue;
                }
                let path = self.download_to_file(object, request, cancel).await?;
                downloaded.push(path);
            }
        }

        Ok(downloaded)
    }

    async fn download_to_file(
        &self,
        object: &RemoteObject,
        request: &RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let path = local_path(&request.local_root, object)?;
        let download_error = |message: String| ReassemblerError::ObjectDownload {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            path: path.clone(),
            message,
        };

        if let Some(parent) = path.parent() {
            self.filesystem
                .create_dir_all(parent)
                .await
                .map_err(|e| download_error(format!("failed to create directories for file: {}", e)))?;
        }

        let mut file = self
            .filesystem
            .create(&path)
            .await
            .map_err(|e| download_error(format!("failed to create file: {}", e)))?;

        let size = cancellable(cancel, async {
            let size = self
                .fetcher
                .fetch(object, &mut file)
                .await
                .map_err(|e| download_error(format!("failed to download file: {}", e)))?;
            file.flush()
                .await
                .map_err(|e| download_error(format!("failed to flush file: {}", e)))?;
            Ok::<_, ReassemblerError>(size)
        })
        .await?;

        self.output.info(&format!(
            "Downloaded {} ({})",
            path.display(),
            self.output.format_size(size)
        ));

        Ok(path)
    }
}

/// `root/bucket/key`, refusing keys that would escape the root
pub fn local_path(local_root: &Path, object: &RemoteObject) -> Result<PathBuf> {
    let key_path = Path::new(&object.key);
    let escapes = key_path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes || object.bucket.contains('/') {
        return Err(ReassemblerError::ObjectDownload {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            path: local_root.to_path_buf(),
            message: "object key does not map to a path under the local root".to_string(),
        });
    }

    Ok(local_root.join(&object.bucket).join(key_path))
}
