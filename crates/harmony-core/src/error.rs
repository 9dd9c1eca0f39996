//! Failure classification for exit codes and user-facing reports.

use std::fmt;

use crate::archive::ArchiveError;
use crate::device::DeviceInfoError;
use crate::protocol::FrameError;
use crate::release::ReleaseError;
use crate::session::FlashError;
use crate::transport::{LinkError, TransportError};

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad frame marker, bad length field, short read or read timeout.
    Framing,
    /// Device answered with a non-2xx status or an unexpected body.
    Protocol,
    /// Device or host not in a state that allows flashing, including
    /// device space figures that do not parse.
    Precondition,
    /// Update bundle could not be parsed or patched.
    Archive,
    /// Local IO, serial port or network failure.
    Io,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Precondition => 2,
            ErrorKind::Framing => 3,
            ErrorKind::Protocol => 4,
            ErrorKind::Archive => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "framing error"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::Precondition => write!(f, "precondition failed"),
            ErrorKind::Archive => write!(f, "archive error"),
            ErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Frame(_) => ErrorKind::Framing,
            LinkError::Transport(
                TransportError::Timeout { .. }
                | TransportError::Disconnected
                | TransportError::ReadFailed(_),
            ) => ErrorKind::Framing,
            LinkError::Transport(_) => ErrorKind::Io,
            LinkError::Encode(_) | LinkError::Decode(_) | LinkError::Status { .. } => {
                ErrorKind::Protocol
            }
        }
    }
}

impl FlashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlashError::DeviceQuery(e)
            | FlashError::RemoveFile { source: e, .. }
            | FlashError::OpenUpload(e)
            | FlashError::Chunk { source: e, .. }
            | FlashError::Finalize(e) => e.kind(),
            FlashError::NoDeviceInformation
            | FlashError::NoTransaction
            | FlashError::ZeroChunkSize { .. } => ErrorKind::Protocol,
            FlashError::NotOnboarded { .. }
            | FlashError::DeviceInfo(_)
            | FlashError::MissingFirmware { .. }
            | FlashError::InsufficientSpace { .. } => ErrorKind::Precondition,
            FlashError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Classify an error chain by the first recognised cause in it.
///
/// Unrecognised errors count as IO.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<FlashError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<LinkError>() {
            return e.kind();
        }
        if cause.downcast_ref::<FrameError>().is_some() {
            return ErrorKind::Framing;
        }
        if cause.downcast_ref::<ArchiveError>().is_some() {
            return ErrorKind::Archive;
        }
        if cause.downcast_ref::<DeviceInfoError>().is_some() {
            return ErrorKind::Precondition;
        }
        if cause.downcast_ref::<ReleaseError>().is_some()
            || cause.downcast_ref::<TransportError>().is_some()
        {
            return ErrorKind::Io;
        }
    }
    ErrorKind::Io
}
