//! Frame header encoding for the serial link.
//!
//! Every message in either direction is prefixed with a 10-byte ASCII
//! header: `#` followed by the payload length as exactly nine zero-padded
//! decimal digits. There is no trailing delimiter.

use thiserror::Error;

use super::constants::{FRAME_HEADER_SIZE, FRAME_LENGTH_DIGITS, FRAME_MARKER, MAX_FRAME_PAYLOAD};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid frame marker in header: {raw:?}")]
    InvalidMarker { raw: String },
    #[error("Invalid frame length field: {raw:?}")]
    InvalidLength { raw: String },
    #[error("Payload too large to frame: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Length header preceding every JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: usize,
}

impl FrameHeader {
    pub const SIZE: usize = FRAME_HEADER_SIZE;

    pub fn new(payload_len: usize) -> Result<Self, FrameError> {
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                len: payload_len,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        Ok(Self { payload_len })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = FRAME_MARKER;
        let digits = format!("{:0width$}", self.payload_len, width = FRAME_LENGTH_DIGITS);
        buf[1..].copy_from_slice(digits.as_bytes());
        buf
    }

    /// Parse a header received from the device.
    ///
    /// The raw bytes are echoed back in the error so a desynchronised stream
    /// can be diagnosed from the log.
    pub fn from_bytes(data: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, FrameError> {
        if data[0] != FRAME_MARKER {
            return Err(FrameError::InvalidMarker {
                raw: String::from_utf8_lossy(data).into_owned(),
            });
        }
        let digits = &data[1..];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::InvalidLength {
                raw: String::from_utf8_lossy(data).into_owned(),
            });
        }
        // Nine ASCII digits always fit in a usize
        let payload_len = digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
        Ok(Self { payload_len })
    }
}

/// Build a complete outbound frame: header followed by the payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header = FrameHeader::new(payload.len())?;
    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new(42).unwrap();
        assert_eq!(&header.to_bytes(), b"#000000042");
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(br#"{"endpoint":1,"method":1}"#).unwrap();
        assert_eq!(&frame[..10], b"#000000025");
        assert_eq!(&frame[10..], br#"{"endpoint":1,"method":1}"#);
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(frame, b"#000000000");
    }

    #[test]
    fn test_invalid_marker_reports_raw_bytes() {
        let err = FrameHeader::from_bytes(b"X000000010").unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidMarker {
                raw: "X000000010".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_length_digits() {
        let err = FrameHeader::from_bytes(b"#0000 0010").unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { .. }));
    }

    #[test]
    fn test_payload_too_large() {
        assert!(FrameHeader::new(MAX_FRAME_PAYLOAD).is_ok());
        assert_eq!(
            FrameHeader::new(MAX_FRAME_PAYLOAD + 1),
            Err(FrameError::PayloadTooLarge {
                len: MAX_FRAME_PAYLOAD + 1,
                max: MAX_FRAME_PAYLOAD
            })
        );
    }

    proptest! {
        #[test]
        fn header_roundtrips_any_length(len in 0usize..=MAX_FRAME_PAYLOAD) {
            let bytes = FrameHeader::new(len).unwrap().to_bytes();
            prop_assert_eq!(bytes.len(), FrameHeader::SIZE);
            prop_assert_eq!(bytes[0], b'#');
            prop_assert_eq!(FrameHeader::from_bytes(&bytes).unwrap().payload_len, len);
        }
    }
}
