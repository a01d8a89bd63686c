//! Configuration management module

use crate::cli::args::{AssembleArgs, Cli, DEFAULT_LOCAL_PATH, DEFAULT_REGION};
use crate::error::{ReassemblerError, Result};
use crate::upload::LAYER_PART_MAX_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Effective settings of one `assemble` run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleConfig {
    pub bucket: Option<String>,
    pub region: String,
    pub debug: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub prefix: Option<String>,
    pub repository_name: Option<String>,
    pub local_path: PathBuf,
    pub tag: Option<String>,
    pub put_role_to_assume: Option<String>,
    pub put_role_external_id: Option<String>,
    pub remove: bool,
    pub download_only: bool,
    pub no_download: bool,
    pub layers_path: Option<PathBuf>,
    pub build_local: bool,
    pub registry_id: Option<String>,
    pub registry_url: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub skip_tls: bool,
    pub timeout: u64,
    pub verify_digests: bool,
    pub part_size: u64,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: DEFAULT_REGION.to_string(),
            debug: false,
            dry_run: false,
            verbose: false,
            quiet: false,
            prefix: None,
            repository_name: None,
            local_path: PathBuf::from(DEFAULT_LOCAL_PATH),
            tag: None,
            put_role_to_assume: None,
            put_role_external_id: None,
            remove: false,
            download_only: false,
            no_download: false,
            layers_path: None,
            build_local: false,
            registry_id: None,
            registry_url: None,
            username: None,
            password: None,
            skip_tls: false,
            timeout: 300,
            verify_digests: false,
            part_size: LAYER_PART_MAX_SIZE,
        }
    }
}

impl AssembleConfig {
    pub fn from_args(cli: &Cli, args: &AssembleArgs) -> Self {
        Self {
            bucket: cli.s3_bucket.clone(),
            region: cli.region.clone(),
            debug: cli.debug,
            dry_run: cli.dry_run,
            verbose: cli.verbose || cli.debug,
            quiet: cli.quiet,
            prefix: args.s3_prefix.clone(),
            repository_name: args.repository_name.clone(),
            local_path: args.local_path.clone(),
            tag: args.tag.clone(),
            put_role_to_assume: args.put_role_to_assume.clone(),
            put_role_external_id: args.put_role_external_id.clone(),
            remove: args.rm,
            download_only: args.download_only,
            no_download: args.no_download,
            layers_path: args.layers_path.clone(),
            build_local: args.build_local,
            registry_id: args.registry_id.clone(),
            registry_url: args.registry_url.clone(),
            username: args.username.clone(),
            password: args.password.clone(),
            skip_tls: args.skip_tls,
            timeout: args.timeout,
            verify_digests: args.verify_digests,
            part_size: LAYER_PART_MAX_SIZE,
        }
    }

    /// Apply `REASSEMBLER_*` environment overrides
    pub fn from_env(self) -> Self {
        self.from_env_with(|key| std::env::var(key).ok())
    }

    /// Environment overrides read through `lookup`; values given on the command
    /// line win over the environment
    pub fn from_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.region == DEFAULT_REGION {
            if let Some(region) = lookup("REASSEMBLER_REGION") {
                self.region = region;
            }
        }
        if self.local_path == PathBuf::from(DEFAULT_LOCAL_PATH) {
            if let Some(path) = lookup("REASSEMBLER_LOCAL_PATH") {
                self.local_path = PathBuf::from(path);
            }
        }
        if let Some(part_size) = lookup("REASSEMBLER_PART_SIZE").and_then(|v| v.parse().ok()) {
            self.part_size = part_size;
        }
        if self.registry_url.is_none() {
            self.registry_url = lookup("REASSEMBLER_REGISTRY_URL");
        }
        if self.username.is_none() {
            self.username = lookup("REASSEMBLER_USERNAME");
        }
        if self.password.is_none() {
            self.password = lookup("REASSEMBLER_PASSWORD");
        }
        if let Some(verbose) = lookup("REASSEMBLER_VERBOSE") {
            if verbose.eq_ignore_ascii_case("true") || verbose == "1" {
                self.verbose = !self.quiet;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.as_deref().is_none_or(str::is_empty) && (!self.no_download || self.remove) {
            return Err(ReassemblerError::Validation(
                "--s3-bucket is required".to_string(),
            ));
        }
        if !self.no_download && self.prefix.as_deref().is_none_or(str::is_empty) {
            return Err(ReassemblerError::Validation(
                "--s3-prefix is required unless --no-download is set".to_string(),
            ));
        }
        if self.no_download && self.layers_path.is_none() {
            return Err(ReassemblerError::Validation(
                "--layers-path is required with --no-download".to_string(),
            ));
        }
        if self.download_only {
            if self.no_download {
                return Err(ReassemblerError::Validation(
                    "--download-only and --no-download are mutually exclusive".to_string(),
                ));
            }
            return Ok(());
        }

        if self.repository_name.as_deref().is_none_or(str::is_empty) {
            return Err(ReassemblerError::Validation(
                "--repository-name is required".to_string(),
            ));
        }
        if self.effective_tag().is_none() {
            return Err(ReassemblerError::Validation(
                "--tag is required when it cannot be derived from --s3-prefix".to_string(),
            ));
        }
        if self.part_size == 0 || self.part_size > LAYER_PART_MAX_SIZE {
            return Err(ReassemblerError::Validation(format!(
                "part size must be between 1 and {} bytes",
                LAYER_PART_MAX_SIZE
            )));
        }
        if self.timeout == 0 {
            return Err(ReassemblerError::Validation(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(url) = &self.registry_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ReassemblerError::Validation(format!(
                    "Invalid registry URL: {}. Must start with http:// or https://",
                    url
                )));
            }
            if self.put_role_to_assume.is_some() {
                return Err(ReassemblerError::Validation(
                    "--put-role-to-assume only applies when pushing to ECR".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// `--tag`, or the last path segment of the prefix
    pub fn effective_tag(&self) -> Option<String> {
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            return Some(tag.to_string());
        }
        self.prefix
            .as_deref()
            .map(|p| p.trim_end_matches('/'))
            .and_then(|p| p.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }

    /// `local_path/bucket/prefix`, what `--rm` deletes
    pub fn download_root(&self) -> Option<PathBuf> {
        let bucket = self.bucket.as_deref()?;
        let prefix = self.prefix.as_deref().unwrap_or_default();
        Some(self.local_path.join(bucket).join(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn assemble_config() -> AssembleConfig {
        AssembleConfig {
            bucket: Some("exports".to_string()),
            prefix: Some("images/app/v1".to_string()),
            repository_name: Some("team/app".to_string()),
            ..AssembleConfig::default()
        }
    }

    #[test]
    fn test_tag_defaults_to_prefix_basename() {
        let config = assemble_config();
        assert_eq!(config.effective_tag().as_deref(), Some("v1"));

        let config = AssembleConfig {
            prefix: Some("images/app/v2/".to_string()),
            ..assemble_config()
        };
        assert_eq!(config.effective_tag().as_deref(), Some("v2"));

        let config = AssembleConfig {
            tag: Some("latest".to_string()),
            ..assemble_config()
        };
        assert_eq!(config.effective_tag().as_deref(), Some("latest"));
    }

    #[test]
    fn test_validate() {
        assert!(assemble_config().validate().is_ok());

        let config = AssembleConfig {
            repository_name: None,
            ..assemble_config()
        };
        assert!(config.validate().is_err());

        let config = AssembleConfig {
            repository_name: None,
            download_only: true,
            ..assemble_config()
        };
        assert!(config.validate().is_ok());

        let config = AssembleConfig {
            part_size: LAYER_PART_MAX_SIZE + 1,
            ..assemble_config()
        };
        assert!(config.validate().is_err());

        let config = AssembleConfig {
            registry_url: Some("localhost:5000".to_string()),
            ..assemble_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_download_needs_no_bucket() {
        let config = AssembleConfig {
            bucket: None,
            prefix: None,
            tag: Some("v1".to_string()),
            no_download: true,
            layers_path: Some(PathBuf::from("/tmp/layers")),
            ..assemble_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REASSEMBLER_REGION", "us-east-1"),
            ("REASSEMBLER_PART_SIZE", "5242880"),
            ("REASSEMBLER_PASSWORD", "secret"),
            ("REASSEMBLER_USERNAME", "ignored"),
        ]
        .into_iter()
        .collect();

        let config = AssembleConfig {
            username: Some("cli-user".to_string()),
            ..assemble_config()
        }
        .from_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.part_size, 5_242_880);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.username.as_deref(), Some("cli-user"));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = AssembleConfig {
            password: Some("secret".to_string()),
            ..assemble_config()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_download_root() {
        assert_eq!(
            assemble_config().download_root(),
            Some(PathBuf::from("/tmp/docker-reassembler/exports/images/app/v1"))
        );
    }
}
