//! SHA256 digest utilities
//!
//! Digests identify every blob the pipeline moves. This module validates their
//! format, maps them to on-disk blob names, and hashes local files so a layer can
//! be checked against its manifest entry before any bytes leave the machine.

use crate::error::{ReassemblerError, Result};
use sha2::Digest;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Docker digest with sha256: prefix for empty blobs
pub const EMPTY_BLOB_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Separator replacing `:` when a digest becomes a file name
const FILE_NAME_SEPARATOR: &str = "__";

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Utilities for working with SHA256 digests in Docker context
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full Docker digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Validate full Docker digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix("sha256:")
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Validate a digest against the OCI grammar `algorithm:encoded`
    ///
    /// The algorithm is lowercase alphanumeric components joined by one of
    /// `+._-`; the encoded part is `[a-zA-Z0-9=_-]+`. sha256 digests must also
    /// carry 64 hex characters.
    pub fn is_valid_digest(digest: &str) -> bool {
        let Some((algorithm, encoded)) = digest.split_once(':') else {
            return false;
        };
        if algorithm == "sha256" {
            return Self::is_valid_docker_digest(digest);
        }

        let algorithm_ok = algorithm.split(['+', '.', '_', '-']).all(|component| {
            !component.is_empty()
                && component
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        });
        let encoded_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'));
        algorithm_ok && encoded_ok
    }

    /// File name a blob is stored under, e.g. `sha256__abc...`
    ///
    /// Only the first `:` is replaced, matching how the layer export writes blobs.
    pub fn blob_file_name(digest: &str) -> String {
        digest.replacen(':', FILE_NAME_SEPARATOR, 1)
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        match digest.char_indices().nth(23) {
            Some((end, _)) => format!("{}...", &digest[..end]),
            None => digest.to_string(),
        }
    }

    /// Hash a local file without loading it into memory
    pub async fn compute_file_digest(path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ReassemblerError::file_system(path, e))?;

        let mut hasher = sha2::Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        let mut offset = 0u64;

        loop {
            let n = file.read(&mut buffer).await.map_err(|e| ReassemblerError::Read {
                path: path.to_path_buf(),
                offset,
                message: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            offset += n as u64;
        }

        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Verify a local blob hashes to the digest the manifest names
    pub async fn verify_file(path: &Path, expected_digest: &str) -> Result<()> {
        if !expected_digest.starts_with("sha256:") {
            return Err(ReassemblerError::Validation(format!(
                "cannot verify {}: only sha256 digests are supported",
                expected_digest
            )));
        }

        let actual = Self::compute_file_digest(path).await?;
        if actual != expected_digest {
            return Err(ReassemblerError::DigestMismatch {
                path: path.to_path_buf(),
                expected: expected_digest.to_string(),
                actual,
            });
        }
        Ok(())
    }
}
