//! Common module - shared helpers used by every pipeline stage

pub mod aws;
pub mod utils;

pub use utils::*;
