//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::protocol::{CommandFrame, HANDSHAKE_REPLY, Response};

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Data(Vec<u8>),
    /// The read times out, as when the device drops an acknowledgment.
    Timeout,
    /// The device vanishes; this and every later call fail.
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    writes: Vec<Vec<u8>>,
    disconnected: bool,
}

/// Scripted transport for unit testing protocol logic.
///
/// Clones share the same script and write log, so a test can keep a handle
/// while the engine owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            vid: 0x04E8,
            pid: 0x685D,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from other clones.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue raw bytes to be returned on a future read.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.lock().replies.push_back(MockReply::Data(bytes.to_vec()));
    }

    /// Queue an encoded response frame.
    pub fn queue_response(&self, response: Response) {
        self.queue_bytes(&response.encode());
    }

    /// Queue the handshake reply.
    pub fn queue_loke(&self) {
        self.queue_bytes(HANDSHAKE_REPLY);
    }

    /// Queue a zero-length packet.
    pub fn queue_zlp(&self) {
        self.queue_bytes(&[]);
    }

    /// Queue a read that times out.
    pub fn queue_timeout(&self) {
        self.lock().replies.push_back(MockReply::Timeout);
    }

    /// Queue a disconnect.
    pub fn queue_disconnect(&self) {
        self.lock().replies.push_back(MockReply::Disconnect);
    }

    /// Number of replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.lock().replies.len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Captured writes that decode as command frames.
    pub fn command_writes(&self) -> Vec<CommandFrame> {
        self.lock()
            .writes
            .iter()
            .filter_map(|w| CommandFrame::decode(w).ok())
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        match state.replies.pop_front() {
            Some(MockReply::Data(mut bytes)) => {
                bytes.truncate(max_len);
                Ok(bytes)
            }
            Some(MockReply::Disconnect) => {
                state.disconnected = true;
                Err(TransportError::Disconnected)
            }
            Some(MockReply::Timeout) | None => Err(TransportError::timeout(timeout)),
        }
    }

    fn is_connected(&self) -> bool {
        !self.lock().disconnected
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Opcode};

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_reply_queue() {
        let mock = MockTransport::new();
        mock.queue_loke();
        mock.queue_timeout();
        mock.queue_response(Response::Session { data: 0 });

        assert_eq!(mock.read(8, T).unwrap(), b"LOKE");
        assert!(mock.read(8, T).unwrap_err().is_timeout());
        assert_eq!(
            Response::decode(&mock.read(8, T).unwrap()).unwrap(),
            Response::Session { data: 0 }
        );

        // Queue is empty now
        assert!(mock.read(8, T).is_err());
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write(b"ODIN", T).unwrap();
        mock.write(&Command::PitDump.encode(), T).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"ODIN");

        let commands = mock.command_writes();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].opcode(), Opcode::PitFile);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        mock.queue_disconnect();
        assert!(mock.is_connected());

        assert!(mock.read(8, T).unwrap_err().is_disconnect());
        assert!(!mock.is_connected());
        assert!(mock.write(b"test", T).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        mock.write(b"abc", T).unwrap();
        assert_eq!(handle.get_writes().len(), 1);
    }
}
