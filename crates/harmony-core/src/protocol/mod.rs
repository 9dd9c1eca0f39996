//! Protocol module - serial link protocol definitions.

pub mod constants;
pub mod header;
pub mod message;

pub use constants::*;
pub use header::{FrameError, FrameHeader, encode_frame};
pub use message::{Request, RequestBody, Response, UploadTransaction};
