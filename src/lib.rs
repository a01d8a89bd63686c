//! Image Reassembler Library
//!
//! Moves container images that were exported to S3 as a manifest plus one file per
//! blob into a registry. The pipeline is strictly sequential: the bulk retriever
//! mirrors the export to local disk, then the transfer coordinator reads the
//! manifest, provisions the repository, uploads every blob through the multi-part
//! protocol and finally PUTs the manifest.

pub mod build;
pub mod cli;
pub mod common;
pub mod digest;
pub mod download;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;
pub mod storage;
pub mod transfer;
pub mod upload;

pub use error::{ApiError, ReassemblerError, Result};
pub use logging::Logger;
