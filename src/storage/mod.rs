//! Object storage capabilities
//!
//! The Bulk Retriever never talks to S3 directly. It is handed a pager, a fetcher and
//! a filesystem, so the real AWS clients and in-memory fakes are interchangeable.

pub mod s3;

use crate::error::ApiError;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWrite;

pub use s3::{S3Fetcher, S3Pager};

/// One stored blob in a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub bucket: String,
    pub key: String,
}

impl RemoteObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Paginated listing of the objects under one prefix
#[async_trait]
pub trait ObjectPager: Send {
    /// Whether another page can be requested
    fn has_more_pages(&self) -> bool;

    /// Fetch the next page of objects
    async fn next_page(&mut self) -> Result<Vec<RemoteObject>, ApiError>;
}

/// Streams one object's bytes into a local writer
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Returns the number of bytes written
    async fn fetch(
        &self,
        object: &RemoteObject,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError>;
}

/// The slice of the local filesystem the retriever needs
#[async_trait]
pub trait LocalFilesystem: Send + Sync {
    /// Recursive and idempotent
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Create or truncate
    async fn create(&self, path: &Path) -> std::io::Result<tokio::fs::File>;
}

/// [`LocalFilesystem`] backed by the real disk
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

#[async_trait]
impl LocalFilesystem for OsFilesystem {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }
}
