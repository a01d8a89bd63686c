//! OCI Distribution v2 backend
//!
//! Maps the multi-part protocol onto chunked blob uploads:
//! - initiate: `POST /v2/{name}/blobs/uploads/`, the returned `Location` is the upload id
//! - part: `PATCH {location}` with `Content-Range: first-last`
//! - complete: `HEAD /v2/{name}/blobs/{digest}` to detect an existing layer, then
//!   `PUT {location}?digest=...`
//! - manifest: `PUT /v2/{name}/manifests/{tag}`
//!
//! Distribution registries create repositories implicitly on first push, so
//! provisioning only synthesizes the repository record.

use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{ApiError, ReassemblerError, Result};
use crate::registry::{
    PartAck, PutImageOutput, PutImageRequest, RegistryApi, Repository, RepositoryPolicy,
    UploadSession,
};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct DistributionClientBuilder {
    address: String,
    username: Option<String>,
    password: Option<String>,
    skip_tls: bool,
    timeout: Duration,
}

impl DistributionClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            skip_tls: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<DistributionClient> {
        let mut address = Url::parse(&self.address).map_err(|e| {
            ReassemblerError::Validation(format!("invalid registry URL {}: {}", self.address, e))
        })?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(ReassemblerError::Validation(format!(
                "registry URL must be http or https: {}",
                self.address
            )));
        }

        // Endpoints are joined relative to the address, keeping any base path
        if !address.path().ends_with('/') {
            let path = format!("{}/", address.path());
            address.set_path(&path);
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.skip_tls)
            .user_agent(concat!("image-reassembler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReassemblerError::Validation(format!("failed to build HTTP client: {}", e)))?;

        let credentials = match (self.username, self.password) {
            (Some(username), password) => Some((username, password)),
            (None, _) => None,
        };

        Ok(DistributionClient {
            client,
            address,
            credentials,
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

pub struct DistributionClient {
    client: Client,
    address: Url,
    credentials: Option<(String, Option<String>)>,
    /// upload id -> location the next request for that session goes to
    sessions: Mutex<HashMap<String, Url>>,
}

impl DistributionClient {
    pub fn builder(address: impl Into<String>) -> DistributionClientBuilder {
        DistributionClientBuilder::new(address)
    }

    /// `host[:port]`, used wherever a registry id is reported
    pub fn registry_host(&self) -> String {
        host_of(&self.address)
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, ApiError> {
        Ok(self.address.join(path.trim_start_matches('/'))?)
    }

    async fn forget_session(&self, upload_id: &str) {
        self.sessions.lock().await.remove(upload_id);
    }

    async fn send(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> std::result::Result<Response, ApiError> {
        let request = match &self.credentials {
            Some((username, password)) => request.basic_auth(username, password.as_ref()),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, context))
    }

    async fn session_location(&self, upload_id: &str) -> std::result::Result<Url, ApiError> {
        let sessions = self.sessions.lock().await;
        sessions.get(upload_id).cloned().ok_or_else(|| {
            ApiError::Service(format!("unknown upload session {}", upload_id))
        })
    }

    fn resolve_location(&self, response: &Response) -> std::result::Result<Url, ApiError> {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Service("registry response has no Location header".to_string()))?;
        Ok(self.address.join(location)?)
    }
}

async fn failure(response: Response, context: &str) -> ApiError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    HttpErrorHandler::classify(status, &text, context)
}

fn host_of(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => url.to_string(),
    }
}

/// Inclusive byte span as chunked uploads expect it
fn content_range(first_byte: u64, last_byte: u64) -> String {
    format!("{}-{}", first_byte, last_byte)
}

/// Last byte from a `Range: 0-<last>` progress header
fn parse_range_end(range: &str) -> Option<u64> {
    range
        .trim()
        .trim_start_matches("bytes=")
        .split_once('-')
        .and_then(|(_, end)| end.parse().ok())
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl DistributionClient {
    async fn send_part(
        &self,
        session: &UploadSession,
        first_byte: u64,
        last_byte: u64,
        bytes: &[u8],
    ) -> std::result::Result<PartAck, ApiError> {
        let location = self.session_location(&session.upload_id).await?;
        let request = self
            .client
            .patch(location)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("Content-Range", content_range(first_byte, last_byte))
            .header(CONTENT_LENGTH, bytes.len())
            .body(bytes.to_vec());
        let response = self.send(request, "layer part upload").await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(failure(response, "layer part upload").await);
        }

        let next = self.resolve_location(&response)?;
        let last_byte_received = header_string(&response, "Range")
            .as_deref()
            .and_then(parse_range_end)
            .unwrap_or(last_byte);
        self.sessions
            .lock()
            .await
            .insert(session.upload_id.clone(), next);

        Ok(PartAck { last_byte_received })
    }

    async fn commit_blob(&self, session: &UploadSession) -> std::result::Result<String, ApiError> {
        let blob_url = self.endpoint(&format!(
            "v2/{}/blobs/{}",
            session.repository_name, session.digest
        ))?;
        let existing = self.send(self.client.head(blob_url), "blob existence check").await?;
        if existing.status().is_success() {
            return Err(ApiError::AlreadyExists(session.digest.clone()));
        }

        let mut location = self.session_location(&session.upload_id).await?;
        location
            .query_pairs_mut()
            .append_pair("digest", &session.digest);
        let response = self
            .send(
                self.client.put(location).header(CONTENT_LENGTH, 0),
                "upload completion",
            )
            .await?;
        if !response.status().is_success() {
            return Err(failure(response, "upload completion").await);
        }

        Ok(header_string(&response, DOCKER_CONTENT_DIGEST).unwrap_or_else(|| session.digest.clone()))
    }
}

#[async_trait]
impl RegistryApi for DistributionClient {
    async fn describe_repository(
        &self,
        name: &str,
        _registry_id: &str,
    ) -> std::result::Result<Vec<Repository>, ApiError> {
        let url = self.endpoint(&format!("v2/{}/tags/list", name))?;
        let response = self.send(self.client.get(url), "repository lookup").await?;
        if !response.status().is_success() {
            return Err(failure(response, "repository lookup").await);
        }

        let host = self.registry_host();
        Ok(vec![Repository {
            name: name.to_string(),
            registry_id: host.clone(),
            arn: String::new(),
            uri: format!("{}/{}", host, name),
        }])
    }

    async fn create_repository(
        &self,
        name: &str,
        _registry_id: &str,
        _policy: &RepositoryPolicy,
    ) -> std::result::Result<Repository, ApiError> {
        let host = self.registry_host();
        Ok(Repository {
            name: name.to_string(),
            registry_id: host.clone(),
            arn: String::new(),
            uri: format!("{}/{}", host, name),
        })
    }

    async fn initiate_layer_upload(
        &self,
        repository_name: &str,
        _registry_id: &str,
    ) -> std::result::Result<String, ApiError> {
        let url = self.endpoint(&format!("v2/{}/blobs/uploads/", repository_name))?;
        let response = self
            .send(
                self.client.post(url).header(CONTENT_LENGTH, 0),
                "upload initiation",
            )
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(failure(response, "upload initiation").await);
        }

        let location = self.resolve_location(&response)?;
        let upload_id = location.to_string();
        self.sessions.lock().await.insert(upload_id.clone(), location);
        Ok(upload_id)
    }

    async fn upload_layer_part(
        &self,
        session: &UploadSession,
        first_byte: u64,
        last_byte: u64,
        bytes: &[u8],
    ) -> std::result::Result<PartAck, ApiError> {
        let result = self.send_part(session, first_byte, last_byte, bytes).await;
        if result.is_err() {
            self.forget_session(&session.upload_id).await;
        }
        result
    }

    async fn complete_layer_upload(
        &self,
        session: &UploadSession,
    ) -> std::result::Result<String, ApiError> {
        let result = self.commit_blob(session).await;
        self.forget_session(&session.upload_id).await;
        result
    }

    async fn put_image(
        &self,
        request: PutImageRequest<'_>,
    ) -> std::result::Result<PutImageOutput, ApiError> {
        let url = self.endpoint(&format!(
            "v2/{}/manifests/{}",
            request.repository_name, request.tag
        ))?;
        let response = self
            .send(
                self.client
                    .put(url)
                    .header(CONTENT_TYPE, request.media_type)
                    .body(request.manifest.to_vec()),
                "manifest put",
            )
            .await?;
        if !response.status().is_success() {
            return Err(failure(response, "manifest put").await);
        }

        let digest = header_string(&response, DOCKER_CONTENT_DIGEST)
            .unwrap_or_else(|| DigestUtils::compute_docker_digest(request.manifest));
        Ok(PutImageOutput {
            image_tag: request.tag.to_string(),
            repository_name: request.repository_name.to_string(),
            registry_id: self.registry_host(),
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_bad_urls() {
        assert!(DistributionClient::builder("not a url").build().is_err());
        assert!(DistributionClient::builder("ftp://registry.local").build().is_err());
    }

    #[test]
    fn test_registry_host_keeps_port() {
        let client = DistributionClient::builder("http://localhost:5000")
            .build()
            .unwrap();
        assert_eq!(client.registry_host(), "localhost:5000");

        let client = DistributionClient::builder("https://registry.example.com")
            .build()
            .unwrap();
        assert_eq!(client.registry_host(), "registry.example.com");
    }

    #[test]
    fn test_endpoint_accepts_leading_slash() {
        let client = DistributionClient::builder("http://localhost:5000")
            .build()
            .unwrap();
        let url = client
            .endpoint("/v2/team/app/blobs/uploads/abc?_state=xyz")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/v2/team/app/blobs/uploads/abc?_state=xyz"
        );
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let client = DistributionClient::builder("https://registry.example.com/proxy")
            .build()
            .unwrap();
        let url = client.endpoint("v2/team/app/tags/list").unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example.com/proxy/v2/team/app/tags/list"
        );
    }

    #[test]
    fn test_content_range_and_progress() {
        assert_eq!(content_range(10_485_760, 20_971_519), "10485760-20971519");
        assert_eq!(parse_range_end("0-20971519"), Some(20_971_519));
        assert_eq!(parse_range_end("bytes=0-99"), Some(99));
        assert_eq!(parse_range_end("garbage"), None);
    }
}
