//! S3 implementations of the storage capabilities

use crate::common::aws::map_sdk_error;
use crate::error::ApiError;
use crate::storage::{ObjectFetcher, ObjectPager, RemoteObject};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// ListObjectsV2 pagination over one bucket prefix
#[derive(Debug)]
pub struct S3Pager {
    client: Client,
    bucket: String,
    prefix: String,
    continuation_token: Option<String>,
    exhausted: bool,
}

impl S3Pager {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            continuation_token: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl ObjectPager for S3Pager {
    fn has_more_pages(&self) -> bool {
        !self.exhausted
    }

    async fn next_page(&mut self) -> Result<Vec<RemoteObject>, ApiError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .set_continuation_token(self.continuation_token.take())
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|key| RemoteObject::new(self.bucket.clone(), key))
            .collect();

        if output.is_truncated() == Some(true) {
            self.continuation_token = output.next_continuation_token().map(|s| s.to_string());
            // A truncated page without a token cannot be continued
            self.exhausted = self.continuation_token.is_none();
        } else {
            self.exhausted = true;
        }

        Ok(objects)
    }
}

/// GetObject streamed straight into the destination writer
#[derive(Debug, Clone)]
pub struct S3Fetcher {
    client: Client,
}

impl S3Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    async fn fetch(
        &self,
        object: &RemoteObject,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|err| {
                let is_missing = err.as_service_error().is_some_and(|e| e.is_no_such_key());
                match map_sdk_error(err) {
                    ApiError::Service(message) if is_missing => ApiError::NotFound(message),
                    other => other,
                }
            })?;

        let mut body = output.body;
        let mut written = 0u64;
        while let Some(bytes) = body
            .try_next()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
        {
            writer.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        writer.flush().await?;

        Ok(written)
    }
}
