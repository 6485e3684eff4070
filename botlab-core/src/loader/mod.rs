//! Chunked range loading.

pub mod chunk;
pub mod range_loader;

pub use chunk::{Chunk, ChunkCursor, ChunkError, ChunkGranularity, ChunkPlan};
pub use range_loader::{LoaderError, PreloadHandle, RangeLoader};
