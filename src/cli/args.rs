//! Command-line argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_REGION: &str = "eu-west-2";
pub const DEFAULT_LOCAL_PATH: &str = "/tmp/docker-reassembler";

#[derive(Parser, Debug)]
#[command(name = "image-reassembler")]
#[command(about = "Reassemble container images exported to S3 and push them to a registry")]
#[command(version, author)]
pub struct Cli {
    /// Bucket holding the exported layers
    #[arg(
        long = "s3-bucket",
        short = 'b',
        global = true,
        help = "S3 bucket containing the exported image layers"
    )]
    pub s3_bucket: Option<String>,

    #[arg(
        long = "region",
        global = true,
        default_value = DEFAULT_REGION,
        help = "AWS region for S3 and ECR"
    )]
    pub region: String,

    #[arg(long = "debug", short = 'd', global = true, help = "Enable debug output")]
    pub debug: bool,

    #[arg(
        long = "dry-run",
        short = 'D',
        global = true,
        help = "Validate and plan without touching the registry"
    )]
    pub dry_run: bool,

    #[arg(long = "verbose", global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with_all = ["verbose", "debug"],
        help = "Only print errors"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the exported layers and push them as one image
    #[command(visible_alias = "a")]
    Assemble(AssembleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AssembleArgs {
    #[arg(
        long = "s3-prefix",
        short = 'p',
        conflicts_with = "no_download",
        help = "Key prefix of the exported image in the bucket"
    )]
    pub s3_prefix: Option<String>,

    #[arg(
        long = "repository-name",
        short = 'r',
        help = "Target repository name"
    )]
    pub repository_name: Option<String>,

    #[arg(
        long = "local-path",
        short = 'l',
        default_value = DEFAULT_LOCAL_PATH,
        help = "Local directory the layers are downloaded into"
    )]
    pub local_path: PathBuf,

    #[arg(
        long = "tag",
        short = 't',
        help = "Image tag (defaults to the last segment of the prefix)"
    )]
    pub tag: Option<String>,

    #[arg(
        long = "put-role-to-assume",
        short = 'P',
        help = "IAM role to assume for pushing to ECR"
    )]
    pub put_role_to_assume: Option<String>,

    #[arg(
        long = "put-role-external-id",
        requires = "put_role_to_assume",
        help = "External id used when assuming the push role"
    )]
    pub put_role_external_id: Option<String>,

    #[arg(long = "rm", help = "Remove the downloaded layers after a successful push")]
    pub rm: bool,

    #[arg(
        long = "download-only",
        conflicts_with_all = ["repository_name", "no_download", "tag", "rm"],
        help = "Only download the layers"
    )]
    pub download_only: bool,

    #[arg(
        long = "no-download",
        requires = "layers_path",
        help = "Skip the download and push from --layers-path"
    )]
    pub no_download: bool,

    #[arg(
        long = "layers-path",
        help = "Directory holding manifest.json and the layer blobs"
    )]
    pub layers_path: Option<PathBuf>,

    #[arg(long = "build-local", help = "Build a local image tarball before pushing")]
    pub build_local: bool,

    #[arg(
        long = "registry-id",
        help = "Registry id (defaults to the account of the push identity)"
    )]
    pub registry_id: Option<String>,

    #[arg(
        long = "registry-url",
        help = "Push to an OCI Distribution registry at this URL instead of ECR"
    )]
    pub registry_url: Option<String>,

    #[arg(
        long = "username",
        short = 'u',
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    #[arg(
        long = "password",
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    #[arg(
        long = "skip-tls",
        short = 'k',
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    #[arg(
        long = "timeout",
        default_value = "300",
        help = "Timeout for registry HTTP requests in seconds"
    )]
    pub timeout: u64,

    #[arg(
        long = "verify-digests",
        help = "Hash every blob locally before uploading it"
    )]
    pub verify_digests: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Print usage examples
    pub fn print_examples() {
        println!("Examples:");
        println!("  # Download an export and push it to ECR");
        println!("  image-reassembler -b exports assemble -p images/app/v1 -r team/app");
        println!();
        println!("  # Push through an assumed role");
        println!("  image-reassembler -b exports a -p images/app/v1 -r team/app \\");
        println!("                    -P arn:aws:iam::123456789012:role/push");
        println!();
        println!("  # Download only");
        println!("  image-reassembler -b exports assemble -p images/app/v1 --download-only");
        println!();
        println!("  # Push already downloaded layers to a Distribution registry");
        println!("  image-reassembler -b exports assemble --no-download \\");
        println!("                    --layers-path /tmp/docker-reassembler/exports/images/app/v1 \\");
        println!("                    -r team/app -t v1 --registry-url http://localhost:5000");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("image-reassembler").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-b", "exports", "assemble", "-p", "images/app/v1"]).unwrap();
        assert_eq!(cli.region, DEFAULT_REGION);
        let Command::Assemble(args) = cli.command;
        assert_eq!(args.local_path, PathBuf::from(DEFAULT_LOCAL_PATH));
        assert_eq!(args.s3_prefix.as_deref(), Some("images/app/v1"));
        assert!(!args.rm);
    }

    #[test]
    fn test_alias_and_global_flags_after_subcommand() {
        let cli = parse(&["a", "-p", "x/y", "-b", "exports", "-D", "--verbose"]).unwrap();
        assert_eq!(cli.s3_bucket.as_deref(), Some("exports"));
        assert!(cli.dry_run && cli.verbose);
    }

    #[test]
    fn test_exclusive_flags() {
        assert!(parse(&["-b", "x", "assemble", "-p", "a", "--no-download", "--layers-path", "/l"]).is_err());
        assert!(parse(&["-b", "x", "assemble", "-p", "a", "--download-only", "-r", "repo"]).is_err());
        assert!(parse(&["-b", "x", "assemble", "-p", "a", "--download-only", "--rm"]).is_err());
        assert!(parse(&["-b", "x", "assemble", "-p", "a", "--download-only", "-t", "v1"]).is_err());
        assert!(parse(&["-b", "x", "assemble", "--no-download"]).is_err());
    }
}
