//! Image manifest sniffing and parsing
//!
//! A manifest arrives as an opaque blob. Its media type is sniffed from the content
//! first (an explicit `mediaType` wins, otherwise `schemaVersion` and the config
//! descriptor decide), then the blob is parsed into a config descriptor and the
//! ordered layer descriptors that drive the upload.

use crate::digest::DigestUtils;
use crate::error::{ReassemblerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry hard limit on layers referenced by one image, config included
pub const MAX_LAYERS_INCLUDING_CONFIG: usize = 100;

/// Largest manifest the registry accepts on PUT (4 MiB)
pub const IMAGE_MANIFEST_MAX_SIZE: u64 = 4_194_304;

pub const DOCKER_V2_SCHEMA1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_V2_SCHEMA2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_V2_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMediaType {
    DockerV2Schema1,
    DockerV2Schema1Signed,
    DockerV2Schema2,
    DockerManifestList,
    OciManifest,
    OciIndex,
}

impl ManifestMediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestMediaType::DockerV2Schema1 => DOCKER_V2_SCHEMA1_MEDIA_TYPE,
            ManifestMediaType::DockerV2Schema1Signed => DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE,
            ManifestMediaType::DockerV2Schema2 => DOCKER_V2_SCHEMA2_MEDIA_TYPE,
            ManifestMediaType::DockerManifestList => DOCKER_V2_LIST_MEDIA_TYPE,
            ManifestMediaType::OciManifest => OCI_MANIFEST_MEDIA_TYPE,
            ManifestMediaType::OciIndex => OCI_INDEX_MEDIA_TYPE,
        }
    }

    pub fn parse(media_type: &str) -> Option<Self> {
        match media_type {
            DOCKER_V2_SCHEMA1_MEDIA_TYPE => Some(ManifestMediaType::DockerV2Schema1),
            DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE => Some(ManifestMediaType::DockerV2Schema1Signed),
            DOCKER_V2_SCHEMA2_MEDIA_TYPE => Some(ManifestMediaType::DockerV2Schema2),
            DOCKER_V2_LIST_MEDIA_TYPE => Some(ManifestMediaType::DockerManifestList),
            OCI_MANIFEST_MEDIA_TYPE => Some(ManifestMediaType::OciManifest),
            OCI_INDEX_MEDIA_TYPE => Some(ManifestMediaType::OciIndex),
            _ => None,
        }
    }

    /// Whether the type describes one image with its own layers
    pub fn is_single_image(&self) -> bool {
        matches!(
            self,
            ManifestMediaType::DockerV2Schema2 | ManifestMediaType::OciManifest
        )
    }
}

impl fmt::Display for ManifestMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the fields sniffing needs; everything is optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SniffFields {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
    #[serde(default)]
    config: Option<SniffConfig>,
    #[serde(default)]
    manifests: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SniffConfig {
    #[serde(default)]
    media_type: Option<String>,
}

/// Infer the manifest media type from content alone
///
/// Returns `None` when the blob is not JSON or names a type this tool does not know.
pub fn guess_media_type(blob: &[u8]) -> Option<ManifestMediaType> {
    let fields: SniffFields = serde_json::from_slice(blob).ok()?;

    if let Some(media_type) = fields.media_type.as_deref().filter(|m| !m.is_empty()) {
        return ManifestMediaType::parse(media_type);
    }

    match fields.schema_version? {
        1 if fields.signatures.is_some() => Some(ManifestMediaType::DockerV2Schema1Signed),
        1 => Some(ManifestMediaType::DockerV2Schema1),
        2 => {
            let config_type = fields.config.as_ref().and_then(|c| c.media_type.as_deref());
            if config_type == Some(OCI_CONFIG_MEDIA_TYPE) {
                Some(ManifestMediaType::OciManifest)
            } else if fields.manifests.is_some_and(|m| !m.is_empty()) {
                Some(ManifestMediaType::OciIndex)
            } else if fields.config.is_some() {
                Some(ManifestMediaType::DockerV2Schema2)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A content-addressed blob reference inside a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SingleImageManifest {
    schema_version: u32,
    config: Descriptor,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

/// Parsed single-image manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    pub media_type: ManifestMediaType,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Sniff and parse a manifest blob
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let media_type = guess_media_type(blob).ok_or(ReassemblerError::UnknownMediaType)?;
        if !media_type.is_single_image() {
            return Err(ReassemblerError::UnsupportedMediaType(
                media_type.as_str().to_string(),
            ));
        }

        let parsed: SingleImageManifest = serde_json::from_slice(blob)
            .map_err(|e| ReassemblerError::ManifestParse(e.to_string()))?;
        if parsed.schema_version != 2 {
            return Err(ReassemblerError::ManifestParse(format!(
                "unsupported schema version {}",
                parsed.schema_version
            )));
        }

        for descriptor in std::iter::once(&parsed.config).chain(parsed.layers.iter()) {
            validate_digest(&descriptor.digest)?;
        }

        Ok(Self {
            media_type,
            config: parsed.config,
            layers: parsed.layers,
        })
    }

    /// Layers plus the config blob
    pub fn total_blobs(&self) -> usize {
        self.layers.len() + 1
    }

    /// Enforce the registry's layer ceiling
    pub fn validate_layer_count(&self) -> Result<()> {
        if self.total_blobs() > MAX_LAYERS_INCLUDING_CONFIG {
            return Err(ReassemblerError::TooManyLayers(self.total_blobs()));
        }
        Ok(())
    }

    /// Upload order: the config blob, then the layers as listed
    pub fn upload_order(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

fn validate_digest(digest: &str) -> Result<()> {
    if DigestUtils::is_valid_digest(digest) {
        Ok(())
    } else {
        Err(ReassemblerError::ManifestParse(format!(
            "invalid digest {:?}",
            digest
        )))
    }
}
