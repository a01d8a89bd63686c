//! Command line interface module
//!
//! Argument parsing, the effective run configuration and the `assemble` workflow.

pub mod args;
pub mod config;
pub mod runner;

pub use args::{AssembleArgs, Cli, Command};
pub use config::AssembleConfig;
pub use runner::Runner;
