//! Scripted in-memory transport for tests.
//!
//! # Why a mock transport?
//!
//! A real socket makes tests depend on timing.  `MockTransport` lets a test
//! decide exactly which bytes arrive in which read, observe every byte the
//! channel writes, and inject end-of-stream or I/O failures.
//!
//! Clones share state, so a test keeps one handle while the channel owns the
//! other:
//!
//! ```ignore
//! let transport = MockTransport::new();
//! channel.connect(Box::new(transport.clone()), None)?;
//! transport.push_inbound(server_link_reply);
//! channel.on_readable()?;
//! let sent = transport.take_written();
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::channel::Transport;

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    closed: bool,
    shut_down: bool,
    max_write: Option<usize>,
    should_fail: bool,
}

/// A transport whose reads and writes are driven by the test.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues bytes for one read.  A read with a smaller buffer leaves the
    /// rest for the next read.
    pub fn push_inbound(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().inbound.push_back(bytes.into());
    }

    /// Makes reads report end of stream once queued bytes are consumed.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Everything the channel has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Returns and forgets what the channel has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().written)
    }

    /// Caps the bytes accepted per write; `Some(0)` makes writes block.
    pub fn set_max_write(&self, max: Option<usize>) {
        self.lock().max_write = max;
    }

    /// When `true`, every read and write fails with an I/O error.
    pub fn set_should_fail(&self, fail: bool) {
        self.lock().should_fail = fail;
    }

    /// `true` once the channel released the transport.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.should_fail {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        let Some(mut chunk) = state.inbound.pop_front() else {
            return if state.closed || state.shut_down {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.inbound.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.should_fail {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = state.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn shutdown(&mut self) {
        self.lock().shut_down = true;
    }
}
