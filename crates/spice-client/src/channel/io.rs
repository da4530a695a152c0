//! I/O seams the channel engine drives: a non-blocking byte transport and an
//! optional TLS transform layered on top of it.
//!
//! Both are synchronous and never block.  "No data yet" is reported as
//! `io::ErrorKind::WouldBlock`, and the channel simply returns until the next
//! readable or writable notification.

use std::io;

use thiserror::Error;

/// A non-blocking byte stream (normally a TCP socket).
pub trait Transport: Send {
    /// Reads available bytes.  `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as many bytes as the socket accepts right now.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Closes the stream.  Further reads report end of stream.
    fn shutdown(&mut self) {}
}

/// Error surfaced by a TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TlsError(pub String);

/// A client-side TLS state machine that transforms bytes, without owning the
/// socket.
pub trait TlsSession: Send {
    /// `true` until the handshake completes.
    fn is_handshaking(&self) -> bool;

    /// `true` when encrypted records are waiting to be written.
    fn wants_write(&self) -> bool;

    /// Feeds ciphertext read from `rd` into the session.
    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize>;

    /// Writes pending ciphertext to `wr`.
    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize>;

    /// Processes records received by `read_tls`.
    ///
    /// # Errors
    ///
    /// Handshake or record-layer failures.
    fn process_new_packets(&mut self) -> Result<(), TlsError>;

    /// Reads decrypted application data.  `WouldBlock` when none is buffered.
    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queues application data for encryption.
    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Presents a `&mut dyn Transport` as `std::io::Read + Write`, which is what
/// TLS libraries consume.
pub(crate) struct TransportIo<'a>(pub &'a mut dyn Transport);

impl io::Read for TransportIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl io::Write for TransportIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
