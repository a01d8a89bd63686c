//! Multi-part upload of a single layer
//!
//! Each layer runs `Init -> Uploading(part) -> Completing -> Done`, or lands in
//! `Failed` from whichever state an error occurs in. Parts are sent one at a time in
//! sequence order and their spans are contiguous; the registry reassembles the layer
//! from exactly those spans and checks the digest at completion.

use crate::common::cancellable;
use crate::digest::DigestUtils;
use crate::error::{ApiError, ReassemblerError, Result};
use crate::logging::Logger;
use crate::registry::{RegistryApi, UploadSession};
use crate::upload::chunked::{ChunkReader, LAYER_PART_MAX_SIZE};
use std::fmt;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Init,
    Uploading { part_index: usize },
    Completing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Init => f.write_str("init"),
            UploadState::Uploading { part_index } => write!(f, "uploading part {}", part_index),
            UploadState::Completing => f.write_str("completing"),
            UploadState::Done => f.write_str("done"),
            UploadState::Failed => f.write_str("failed"),
        }
    }
}

/// How a layer ended up in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOutcome {
    /// The registry committed the reassembled layer under this digest
    Committed(String),
    /// The repository already held the layer
    AlreadyExists,
}

/// Where one layer comes from and where it goes
#[derive(Debug, Clone, Copy)]
pub struct LayerTarget<'a> {
    pub repository_name: &'a str,
    pub registry_id: &'a str,
    pub digest: &'a str,
    pub path: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub digest: String,
    pub outcome: LayerOutcome,
    pub parts: usize,
    pub bytes: u64,
}

pub struct LayerUploader<'a> {
    registry: &'a dyn RegistryApi,
    output: Logger,
    part_size: u64,
    verify_digests: bool,
}

impl<'a> LayerUploader<'a> {
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

    /// Hash each blob locally before opening an upload session
    pub fn with_digest_verification(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    pub async fn upload(
        &self,
        target: &LayerTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<LayerReport> {
        let mut state = UploadState::Init;
        let result = self.drive(target, &mut state, cancel).await;

        if let Err(e) = &result {
            self.output.detail(&format!(
                "Layer {} failed while {}: {}",
                DigestUtils::format_digest_short(target.digest),
                state,
                e
            ));
            state = UploadState::Failed;
        }
        debug_assert!(matches!(state, UploadState::Done | UploadState::Failed));
        result
    }

    async fn drive(
        &self,
        target: &LayerTarget<'_>,
        state: &mut UploadState,
        cancel: &CancellationToken,
    ) -> Result<LayerReport> {
        let short = DigestUtils::format_digest_short(target.digest);

        if self.verify_digests {
            DigestUtils::verify_file(target.path, target.digest).await?;
            self.output.detail(&format!("Verified digest of {}", short));
        }

        let mut reader = ChunkReader::open(target.path, self.part_size).await?;
        let total_parts = reader.total_parts();
        let total_bytes = reader.size();

        let upload_id = cancellable(cancel, async {
            self.registry
                .initiate_layer_upload(target.repository_name, target.registry_id)
                .await
                .map_err(|source| ReassemblerError::UploadInit {
                    digest: target.digest.to_string(),
                    source,
                })
        })
        .await?;

        let session = UploadSession {
            upload_id,
            repository_name: target.repository_name.to_string(),
            registry_id: target.registry_id.to_string(),
            digest: target.digest.to_string(),
        };
        self.output.detail(&format!(
            "Upload session {} opened for {} ({} parts)",
            session.upload_id, short, total_parts
        ));

        let mut sent = 0u64;
        loop {
            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            *state = UploadState::Uploading {
                part_index: chunk.sequence_index,
            };

            let part_error = |source: ApiError| ReassemblerError::UploadPart {
                digest: target.digest.to_string(),
                part: chunk.sequence_index,
                first_byte: chunk.first_byte,
                last_byte: chunk.last_byte,
                source,
            };

            self.output.debug(&format!(
                "Session {}: part {} bytes {}-{}",
                session.upload_id, chunk.sequence_index, chunk.first_byte, chunk.last_byte
            ));
            let ack = cancellable(cancel, async {
                self.registry
                    .upload_layer_part(&session, chunk.first_byte, chunk.last_byte, &chunk.bytes)
                    .await
                    .map_err(part_error)
            })
            .await?;

            if ack.last_byte_received != chunk.last_byte {
                return Err(part_error(ApiError::InvalidLayer(format!(
                    "registry acknowledged up to byte {}, expected {}",
                    ack.last_byte_received, chunk.last_byte
                ))));
            }

            sent += chunk.len();
            self.output
                .part_progress(chunk.sequence_index + 1, total_parts, sent, total_bytes);
        }

        *state = UploadState::Completing;
        let completed = cancellable(cancel, async {
            Ok::<_, ReassemblerError>(self.registry.complete_layer_upload(&session).await)
        })
        .await?;

        let outcome = match completed {
            Ok(digest) => {
                self.output.success(&format!(
                    "Layer {} uploaded ({})",
                    DigestUtils::format_digest_short(&digest),
                    self.output.format_size(total_bytes)
                ));
                LayerOutcome::Committed(digest)
            }
            Err(ApiError::AlreadyExists(_)) => {
                self.output
                    .warning(&format!("Layer {} already exists in the repository", short));
                LayerOutcome::AlreadyExists
            }
            Err(source) => {
                return Err(ReassemblerError::UploadComplete {
                    digest: target.digest.to_string(),
                    source,
                });
            }
        };

        *state = UploadState::Done;
        Ok(LayerReport {
            digest: target.digest.to_string(),
            outcome,
            parts: total_parts,
            bytes: total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(UploadState::Uploading { part_index: 2 }.to_string(), "uploading part 2");
        assert_eq!(UploadState::Completing.to_string(), "completing");
    }
}
