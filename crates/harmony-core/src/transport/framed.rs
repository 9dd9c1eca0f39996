//! Request/response exchange over a framed serial link.
//!
//! Each call writes exactly one frame and reads exactly one frame back.
//! There are no retries: once a frame read fails the stream position is
//! unknown and the link must not be reused.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use super::traits::{SerialTransport, TransportError};
use crate::protocol::{FrameError, FrameHeader, Request, Response, encode_frame};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Device returned status code {status}")]
    Status { status: i64, body: serde_json::Value },
}

impl LinkError {
    /// Numeric status of a non-2xx response.
    pub fn status(&self) -> Option<i64> {
        match self {
            LinkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Framed JSON request/response channel owning the transport.
pub struct FramedTransport<T: SerialTransport> {
    inner: T,
}

impl<T: SerialTransport> FramedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Send a request and return the raw response once its status is 2xx.
    ///
    /// `timeout` bounds the header and payload reads together.
    #[instrument(skip(self, request), fields(request = request.name(), endpoint = request.endpoint, method = request.method))]
    pub fn exchange(&mut self, request: &Request, timeout: Duration) -> Result<Response, LinkError> {
        let payload = serde_json::to_vec(request).map_err(LinkError::Encode)?;
        let frame = encode_frame(&payload)?;
        self.inner.write_all(&frame)?;
        trace!(len = payload.len(), "Request sent");

        let deadline = Instant::now() + timeout;

        let mut header = [0u8; FrameHeader::SIZE];
        self.inner.read_exact(&mut header, timeout)?;
        let header = FrameHeader::from_bytes(&header)?;

        let mut body = vec![0u8; header.payload_len];
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() && !body.is_empty() {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        self.inner.read_exact(&mut body, remaining)?;

        let response: Response = serde_json::from_slice(&body).map_err(LinkError::Decode)?;
        debug!(
            status = response.status,
            uuid = response.uuid,
            len = header.payload_len,
            "Response received"
        );

        if !response.is_success() {
            return Err(LinkError::Status {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    /// Send a request whose response carries no result.
    pub fn call(&mut self, request: &Request, timeout: Duration) -> Result<(), LinkError> {
        self.exchange(request, timeout).map(|_| ())
    }

    /// Send a request and decode the response body into `R`.
    ///
    /// Returns `None` when the device answers 204 No Content.
    pub fn call_for<R: DeserializeOwned>(
        &mut self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<R>, LinkError> {
        let response = self.exchange(request, timeout)?;
        if response.is_no_content() {
            return Ok(None);
        }
        serde_json::from_value(response.body)
            .map(Some)
            .map_err(LinkError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::UploadTransaction;
    use crate::transport::MockTransport;

    const T: Duration = Duration::from_millis(50);

    fn link(mock: &MockTransport) -> FramedTransport<MockTransport> {
        FramedTransport::new(mock.clone())
    }

    #[test]
    fn test_request_is_framed() {
        let mock = MockTransport::new();
        mock.queue_response(r#"{"body":{},"endpoint":1,"status":200,"uuid":1}"#);

        link(&mock).call(&Request::device_info(), T).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        let payload = br#"{"endpoint":1,"method":1}"#;
        assert_eq!(&writes[0][..10], format!("#{:09}", payload.len()).as_bytes());
        assert_eq!(&writes[0][10..], payload);
    }

    #[test]
    fn test_decode_body() {
        let mock = MockTransport::new();
        mock.queue_response(
            r#"{"body":{"chunkSize":65536,"txID":42},"endpoint":3,"status":200,"uuid":7}"#,
        );

        let tx: Option<UploadTransaction> = link(&mock)
            .call_for(&Request::start_upload(10, "00000000".into(), "f"), T)
            .unwrap();
        assert_eq!(
            tx,
            Some(UploadTransaction {
                chunk_size: 65536,
                tx_id: 42
            })
        );
    }

    #[test]
    fn test_fragmented_response() {
        let mock = MockTransport::new().with_max_read(3);
        mock.queue_response(r#"{"body":{"chunkSize":4,"txID":1},"endpoint":3,"status":201,"uuid":7}"#);

        let tx: Option<UploadTransaction> = link(&mock)
            .call_for(&Request::device_info(), T)
            .unwrap();
        assert_eq!(tx.unwrap().chunk_size, 4);
    }

    #[test]
    fn test_no_content_skips_decode() {
        let mock = MockTransport::new();
        mock.queue_response(r#"{"endpoint":3,"status":204,"uuid":7}"#);

        let tx: Option<UploadTransaction> = link(&mock)
            .call_for(&Request::device_info(), T)
            .unwrap();
        assert!(tx.is_none());
    }

    #[test]
    fn test_error_status_is_retrievable() {
        let mock = MockTransport::new();
        mock.queue_response(r#"{"body":{},"endpoint":3,"status":404,"uuid":7}"#);

        let err = link(&mock)
            .call(&Request::remove_file("/x"), T)
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_status_boundaries() {
        for (status, ok) in [(199, false), (200, true), (299, true), (300, false)] {
            let mock = MockTransport::new();
            mock.queue_response(&format!(
                r#"{{"body":null,"endpoint":1,"status":{status},"uuid":1}}"#
            ));
            assert_eq!(link(&mock).call(&Request::device_info(), T).is_ok(), ok);
        }
    }

    #[test]
    fn test_shape_mismatch_is_decode_error() {
        let mock = MockTransport::new();
        mock.queue_response(r#"{"body":{"chunkSize":"big"},"endpoint":3,"status":200,"uuid":7}"#);

        let err = link(&mock)
            .call_for::<UploadTransaction>(&Request::device_info(), T)
            .unwrap_err();
        assert!(matches!(err, LinkError::Decode(_)));
    }

    #[test]
    fn test_bad_marker() {
        let mock = MockTransport::new();
        mock.queue_reply(b"!000000002{}");

        let err = link(&mock).call(&Request::device_info(), T).unwrap_err();
        match err {
            LinkError::Frame(FrameError::InvalidMarker { raw }) => assert_eq!(raw, "!000000002"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_payload_times_out() {
        let mock = MockTransport::new();
        mock.queue_reply(b"#000000100{\"body\"");

        let err = link(&mock).call(&Request::device_info(), T).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Timeout { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[test]
    fn test_timeout_shared_by_header_and_payload() {
        let mock = MockTransport::new().with_max_read(3);
        mock.queue_response(r#"{"endpoint":1,"status":204,"uuid":1}"#);

        link(&mock).call(&Request::device_info(), T).unwrap();

        let timeouts = mock.get_read_timeouts();
        assert_eq!(timeouts.len(), 2);
        assert_eq!(timeouts[0], T);
        assert!(timeouts[1] <= T);
        assert!(timeouts.iter().all(|t| *t <= T));
    }

    #[test]
    fn test_one_write_per_call() {
        let mock = MockTransport::new();
        mock.queue_response(r#"{"endpoint":3,"status":204,"uuid":1}"#);
        mock.queue_response(r#"{"endpoint":3,"status":204,"uuid":2}"#);

        let mut link = link(&mock);
        link.call(&Request::remove_file("/a"), T).unwrap();
        link.call(&Request::remove_file("/b"), T).unwrap();
        assert_eq!(mock.get_writes().len(), 2);
    }
}
