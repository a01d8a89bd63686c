//! Error types for the layer transfer pipeline
//!
//! [`ReassemblerError`] is what every pipeline stage returns. Each variant carries
//! enough context (digest, path, byte span) to diagnose a failed run without
//! re-running it in verbose mode. [`ApiError`] is the narrower vocabulary the
//! storage and registry backends speak; the core classifies it and wraps it.

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReassemblerError>;

#[derive(Error, Debug)]
pub enum ReassemblerError {
    #[error("failed to list objects in s3://{bucket}/{prefix}: {source}")]
    Listing {
        bucket: String,
        prefix: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to download s3://{bucket}/{key} to {}: {message}", path.display())]
    ObjectDownload {
        bucket: String,
        key: String,
        path: PathBuf,
        message: String,
    },

    #[error("manifest MIME type is unknown or unrecognised")]
    UnknownMediaType,

    #[error("manifest media type {0} cannot be uploaded as a single image")]
    UnsupportedMediaType(String),

    #[error("error parsing manifest: {0}")]
    ManifestParse(String),

    #[error("too many layers (100 max): {0}")]
    TooManyLayers(usize),

    #[error("error describing repository {repository}: {source}")]
    RepositoryLookup {
        repository: String,
        #[source]
        source: ApiError,
    },

    #[error("invalid number of repositories found for {repository} ({count}), expected 1")]
    UnexpectedRepositoryCount { repository: String, count: usize },

    #[error("error creating repository {repository}: {source}")]
    RepositoryCreate {
        repository: String,
        #[source]
        source: ApiError,
    },

    #[error("error initiating upload for layer {digest}: {source}")]
    UploadInit {
        digest: String,
        #[source]
        source: ApiError,
    },

    #[error("upload of part {part} [{first_byte}, {last_byte}] failed for layer {digest}: {source}")]
    UploadPart {
        digest: String,
        part: usize,
        first_byte: u64,
        last_byte: u64,
        #[source]
        source: ApiError,
    },

    #[error("error completing upload for layer {digest}: {source}")]
    UploadComplete {
        digest: String,
        #[source]
        source: ApiError,
    },

    #[error("image manifest too large, {size} is greater than {limit}")]
    ManifestTooLarge { size: u64, limit: u64 },

    #[error("error putting image {repository}:{tag}: {source}")]
    ManifestPut {
        repository: String,
        tag: String,
        #[source]
        source: ApiError,
    },

    #[error("filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading {} at offset {offset}: {message}", path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        message: String,
    },

    #[error("digest mismatch for {}: manifest says {expected}, file hashes to {actual}", path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("error building container image locally: {0}")]
    Build(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ReassemblerError {
    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReassemblerError::FileSystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a storage or registry backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The addressed repository or object does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The layer being completed is already present in the repository
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The registry rejected the reassembled layer (digest or size mismatch)
    #[error("invalid layer: {0}")]
    InvalidLayer(String),
    /// The service answered with an error
    #[error("service error: {0}")]
    Service(String),
    /// The request never produced a service answer
    #[error("transport error: {0}")]
    Transport(String),
    /// Local I/O failed while talking to the backend
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::Transport(format!("invalid URL: {}", err))
    }
}
