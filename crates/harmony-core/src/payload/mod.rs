//! Payload handling module.
//!
//! Provides the update archive buffer and its upload chunking.

pub mod update;

pub use update::{Chunk, UpdateImage, UploadChunks};
