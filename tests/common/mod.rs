//! In-memory fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use image_reassembler::digest::DigestUtils;
use image_reassembler::error::ApiError;
use image_reassembler::registry::{
    PartAck, PutImageOutput, PutImageRequest, RegistryApi, Repository, RepositoryPolicy,
    UploadSession,
};
use image_reassembler::storage::{LocalFilesystem, ObjectFetcher, ObjectPager, RemoteObject};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Storage fakes
// ---------------------------------------------------------------------------

/// Serves pre-built pages in order
pub struct VecPager {
    pages: VecDeque<Result<Vec<RemoteObject>, ApiError>>,
    pub requested: usize,
}

impl VecPager {
    pub fn new(pages: Vec<Result<Vec<RemoteObject>, ApiError>>) -> Self {
        Self {
            pages: pages.into(),
            requested: 0,
        }
    }

    pub fn of_keys(bucket: &str, pages: &[&[&str]]) -> Self {
        Self::new(
            pages
                .iter()
                .map(|keys| Ok(keys.iter().map(|k| RemoteObject::new(bucket, *k)).collect()))
                .collect(),
        )
    }
}

#[async_trait]
impl ObjectPager for VecPager {
    fn has_more_pages(&self) -> bool {
        !self.pages.is_empty()
    }

    async fn next_page(&mut self) -> Result<Vec<RemoteObject>, ApiError> {
        self.requested += 1;
        self.pages.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Object bodies keyed by object key
#[derive(Default)]
pub struct MemoryFetcher {
    objects: HashMap<String, Vec<u8>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn with(mut self, key: &str, body: &[u8]) -> Self {
        self.objects.insert(key.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl ObjectFetcher for MemoryFetcher {
    async fn fetch(
        &self,
        object: &RemoteObject,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        self.fetched.lock().unwrap().push(object.key.clone());
        let body = self
            .objects
            .get(&object.key)
            .ok_or_else(|| ApiError::NotFound(object.key.clone()))?;
        writer.write_all(body).await?;
        Ok(body.len() as u64)
    }
}

/// Filesystem whose directory creation always fails
pub struct ReadOnlyFilesystem;

#[async_trait]
impl LocalFilesystem for ReadOnlyFilesystem {
    async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only file system",
        ))
    }

    async fn create(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }
}

// ---------------------------------------------------------------------------
// Registry fake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String),
    Create(String),
    Init(String),
    Part { digest: String, first: u64, last: u64 },
    Complete(String),
    PutImage(String),
}

#[derive(Debug, Default)]
pub struct OpenUpload {
    pub repository: String,
    pub bytes: Vec<u8>,
}

/// Registry that reassembles parts in memory and checks digests like the real one
#[derive(Default)]
pub struct FakeRegistry {
    pub calls: Mutex<Vec<Call>>,
    pub repositories: Mutex<Vec<Repository>>,
    /// (repository, digest) pairs already committed
    pub layers: Mutex<HashSet<(String, String)>>,
    pub uploads: Mutex<HashMap<String, OpenUpload>>,
    pub next_upload: Mutex<usize>,
    pub created_policies: Mutex<Vec<RepositoryPolicy>>,
    pub describe_error: Option<ApiError>,
    pub duplicate_repositories: bool,
    pub init_error: Option<ApiError>,
    /// Fail the part with this sequence index
    pub fail_part: Option<usize>,
    pub complete_error: Option<ApiError>,
    /// Parts never get an answer; `part_started` fires when one is sent
    pub stall_parts: bool,
    pub part_started: Notify,
    pub manifests: Mutex<Vec<(String, Vec<u8>, String)>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(self, name: &str) -> Self {
        self.repositories.lock().unwrap().push(repository(name));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn has_layer(&self, repository: &str, digest: &str) -> bool {
        self.layers
            .lock()
            .unwrap()
            .contains(&(repository.to_string(), digest.to_string()))
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn repository(name: &str) -> Repository {
    Repository {
        name: name.to_string(),
        registry_id: "123456789012".to_string(),
        arn: format!("arn:aws:ecr:eu-west-2:123456789012:repository/{}", name),
        uri: format!("123456789012.dkr.ecr.eu-west-2.amazonaws.com/{}", name),
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn describe_repository(
        &self,
        name: &str,
        _registry_id: &str,
    ) -> Result<Vec<Repository>, ApiError> {
        self.record(Call::Describe(name.to_string()));
        if let Some(err) = &self.describe_error {
            return Err(err.clone());
        }
        let found: Vec<Repository> = self
            .repositories
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect();
        match found.first() {
            None => Err(ApiError::NotFound(format!("repository {} not found", name))),
            Some(first) if self.duplicate_repositories => Ok(vec![first.clone(), first.clone()]),
            Some(_) => Ok(found),
        }
    }

    async fn create_repository(
        &self,
        name: &str,
        _registry_id: &str,
        policy: &RepositoryPolicy,
    ) -> Result<Repository, ApiError> {
        self.record(Call::Create(name.to_string()));
        self.created_policies.lock().unwrap().push(policy.clone());
        let created = repository(name);
        self.repositories.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn initiate_layer_upload(
        &self,
        repository_name: &str,
        _registry_id: &str,
    ) -> Result<String, ApiError> {
        self.record(Call::Init(repository_name.to_string()));
        if let Some(err) = &self.init_error {
            return Err(err.clone());
        }
        let mut next = self.next_upload.lock().unwrap();
        *next += 1;
        let upload_id = format!("upload-{}", next);
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            OpenUpload {
                repository: repository_name.to_string(),
                bytes: Vec::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_layer_part(
        &self,
        session: &UploadSession,
        first_byte: u64,
        last_byte: u64,
        bytes: &[u8],
    ) -> Result<PartAck, ApiError> {
        let part_index = self
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Part { digest, .. } if *digest == session.digest))
            .count();
        self.record(Call::Part {
            digest: session.digest.clone(),
            first: first_byte,
            last: last_byte,
        });
        if self.fail_part == Some(part_index) {
            return Err(ApiError::Transport("connection reset by peer".to_string()));
        }
        if self.stall_parts {
            self.part_started.notify_one();
            std::future::pending::<()>().await;
        }

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(&session.upload_id)
            .ok_or_else(|| ApiError::Service(format!("no upload {}", session.upload_id)))?;
        if first_byte != upload.bytes.len() as u64
            || last_byte + 1 - first_byte != bytes.len() as u64
        {
            return Err(ApiError::InvalidLayer(format!(
                "part [{}, {}] does not continue at {}",
                first_byte,
                last_byte,
                upload.bytes.len()
            )));
        }
        upload.bytes.extend_from_slice(bytes);
        Ok(PartAck {
            last_byte_received: last_byte,
        })
    }

    async fn complete_layer_upload(&self, session: &UploadSession) -> Result<String, ApiError> {
        self.record(Call::Complete(session.digest.clone()));
        if let Some(err) = &self.complete_error {
            return Err(err.clone());
        }
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(&session.upload_id)
            .ok_or_else(|| ApiError::Service(format!("no upload {}", session.upload_id)))?;

        let key = (upload.repository.clone(), session.digest.clone());
        if self.layers.lock().unwrap().contains(&key) {
            return Err(ApiError::AlreadyExists(session.digest.clone()));
        }
        let actual = DigestUtils::compute_docker_digest(&upload.bytes);
        if actual != session.digest {
            return Err(ApiError::InvalidLayer(format!(
                "expected {}, reassembled {}",
                session.digest, actual
            )));
        }
        self.layers.lock().unwrap().insert(key);
        Ok(actual)
    }

    async fn put_image(&self, request: PutImageRequest<'_>) -> Result<PutImageOutput, ApiError> {
        self.record(Call::PutImage(request.tag.to_string()));

        let manifest: serde_json::Value = serde_json::from_slice(request.manifest)
            .map_err(|e| ApiError::Service(format!("MANIFEST_INVALID: {}", e)))?;
        let mut referenced = vec![manifest["config"]["digest"].as_str().unwrap_or_default()];
        if let Some(layers) = manifest["layers"].as_array() {
            referenced.extend(layers.iter().filter_map(|l| l["digest"].as_str()));
        }
        for digest in referenced {
            if !self.has_layer(request.repository_name, digest) {
                return Err(ApiError::Service(format!("MANIFEST_BLOB_UNKNOWN: {}", digest)));
            }
        }

        self.manifests.lock().unwrap().push((
            request.tag.to_string(),
            request.manifest.to_vec(),
            request.media_type.to_string(),
        ));
        Ok(PutImageOutput {
            image_tag: request.tag.to_string(),
            repository_name: request.repository_name.to_string(),
            registry_id: request.registry_id.to_string(),
            digest: DigestUtils::compute_docker_digest(request.manifest),
        })
    }
}

// ---------------------------------------------------------------------------
// Exported image fixture
// ---------------------------------------------------------------------------

/// A layers directory as the exporter writes it: `manifest.json` plus one
/// `algo__hex` file per blob
pub struct ImageFixture {
    pub layers_path: PathBuf,
    pub config_digest: String,
    pub layer_digests: Vec<String>,
    pub manifest: Vec<u8>,
}

impl ImageFixture {
    pub fn write(dir: &Path, layers: &[Vec<u8>]) -> Self {
        Self::write_with_padding(dir, layers, 0)
    }

    /// `padding` bytes of annotation inflate the manifest without changing its blobs
    pub fn write_with_padding(dir: &Path, layers: &[Vec<u8>], padding: usize) -> Self {
        std::fs::create_dir_all(dir).unwrap();

        let config = serde_json::to_vec(&json!({
            "architecture": "amd64",
            "os": "linux",
            "rootfs": { "type": "layers", "diff_ids": [] },
        }))
        .unwrap();
        let config_digest = write_blob(dir, &config);

        let layer_digests: Vec<String> = layers.iter().map(|l| write_blob(dir, l)).collect();
        let layer_descriptors: Vec<_> = layers
            .iter()
            .zip(&layer_digests)
            .map(|(bytes, digest)| {
                json!({
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": bytes.len(),
                    "digest": digest,
                })
            })
            .collect();

        let mut manifest = json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": config.len(),
                "digest": config_digest,
            },
            "layers": layer_descriptors,
        });
        if padding > 0 {
            manifest["annotations"] = json!({ "padding": "x".repeat(padding) });
        }
        let manifest = serde_json::to_vec_pretty(&manifest).unwrap();
        std::fs::write(dir.join("manifest.json"), &manifest).unwrap();

        Self {
            layers_path: dir.to_path_buf(),
            config_digest,
            layer_digests,
            manifest,
        }
    }

    /// Config first, then layers, as they must be uploaded
    pub fn upload_order(&self) -> Vec<String> {
        std::iter::once(self.config_digest.clone())
            .chain(self.layer_digests.iter().cloned())
            .collect()
    }
}

fn write_blob(dir: &Path, bytes: &[u8]) -> String {
    let digest = DigestUtils::compute_docker_digest(bytes);
    std::fs::write(dir.join(DigestUtils::blob_file_name(&digest)), bytes).unwrap();
    digest
}

/// Deterministic, non-repeating-looking test content
pub fn layer_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + seed as usize * 7) % 251) as u8)
        .collect()
}
