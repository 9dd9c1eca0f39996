//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{SerialTransport, TransportError};
use crate::protocol::encode_frame;

#[derive(Debug, Default)]
struct MockState {
    /// Bytes readable right now.
    inbound: VecDeque<u8>,
    /// Replies released into `inbound`, one per write.
    scripted: VecDeque<Vec<u8>>,
    /// Captured writes.
    write_log: Vec<Vec<u8>>,
    /// Timeout passed to each `read_exact`.
    read_timeouts: Vec<Duration>,
    connected: bool,
}

/// Mock transport for unit testing the link and session logic.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    /// Maximum bytes returned per underlying read, to exercise read loops.
    max_read: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..Default::default()
            })),
            max_read: usize::MAX,
        }
    }

    /// Deliver inbound bytes in pieces of at most `max_read` bytes.
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    /// Make raw bytes readable immediately.
    pub fn queue_raw(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbound.extend(bytes);
    }

    /// Queue a reply that becomes readable only after the next write.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .push_back(bytes.to_vec());
    }

    /// Queue a framed JSON reply that becomes readable after the next write.
    pub fn queue_response(&self, json: &str) {
        let frame = encode_frame(json.as_bytes()).expect("mock response fits in a frame");
        self.queue_reply(&frame);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().write_log.clone()
    }

    /// Captured writes decoded as JSON request payloads.
    pub fn get_requests(&self) -> Vec<serde_json::Value> {
        self.get_writes()
            .iter()
            .map(|w| serde_json::from_slice(&w[10..]).expect("captured write is a framed request"))
            .collect()
    }

    /// Clear captured writes.
    /// Timeouts the caller passed to each read, in order.
    pub fn get_read_timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().read_timeouts.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().write_log.clear();
    }

    /// Replies still waiting for a write.
    pub fn pending_replies(&self) -> usize {
        self.state.lock().unwrap().scripted.len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        state.write_log.push(data.to_vec());
        if let Some(reply) = state.scripted.pop_front() {
            state.inbound.extend(reply);
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        state.read_timeouts.push(timeout);
        let mut filled = 0;
        while filled < buf.len() {
            let want = (buf.len() - filled).min(self.max_read);
            let available = want.min(state.inbound.len());
            if available == 0 {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            for slot in &mut buf[filled..filled + available] {
                // Length checked above
                *slot = state.inbound.pop_front().unwrap_or_default();
            }
            filled += available;
        }
        Ok(())
    }

    fn port_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_reply_released_on_write() {
        let mut mock = MockTransport::new();
        mock.queue_reply(b"pong");

        let mut buf = [0u8; 4];
        assert!(mock.read_exact(&mut buf, T).is_err());

        mock.write_all(b"ping").unwrap();
        mock.read_exact(&mut buf, T).unwrap();
        assert_eq!(&buf, b"pong");
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        mock.write_all(b"Hello").unwrap();
        mock.write_all(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_fragmented_reads() {
        let mut mock = MockTransport::new().with_max_read(1);
        mock.queue_raw(b"abcdef");

        let mut buf = [0u8; 6];
        mock.read_exact(&mut buf, T).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn test_mock_short_read_times_out() {
        let mut mock = MockTransport::new();
        mock.queue_raw(b"abc");

        let mut buf = [0u8; 6];
        let err = mock.read_exact(&mut buf, T).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 10 }));
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        mock.disconnect();
        assert!(matches!(
            mock.write_all(b"test"),
            Err(TransportError::Disconnected)
        ));
    }
}
