//! Container image manifest handling
//!
//! The manifest is the sole authority on what gets uploaded: its config descriptor
//! and its ordered layer descriptors. Blobs present on disk but absent from the
//! manifest are never touched.

pub mod manifest;

pub use manifest::{
    Descriptor, IMAGE_MANIFEST_MAX_SIZE, ImageManifest, MAX_LAYERS_INCLUDING_CONFIG,
    ManifestMediaType, guess_media_type,
};
