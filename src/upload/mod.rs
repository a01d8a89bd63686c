//! Layer upload: chunking and the per-layer multi-part protocol

pub mod chunked;
pub mod layer;

pub use chunked::{ChunkReader, LAYER_PART_MAX_SIZE, LayerChunk, split_file};
pub use layer::{LayerOutcome, LayerReport, LayerTarget, LayerUploader, UploadState};
