//! # spice-proto
//!
//! Wire-level building blocks of the SPICE remote-display protocol, as used by
//! the client channel engine in `spice-client`.
//!
//! This crate has zero dependencies on sockets, TLS, or audio devices.  It
//! only turns bytes into typed records and back.
//!
//! # Architecture overview (for beginners)
//!
//! A SPICE session is one logical connection split into typed sub-channels
//! (main, display, inputs, cursor, playback, record).  Each sub-channel is its
//! own socket and goes through the same two phases:
//!
//! 1. **Link negotiation** – both sides exchange a 16-byte link header and a
//!    link body listing their capabilities.  See [`protocol::link`].
//!
//! 2. **Data messages** – a stream of `header || body` frames.  The header
//!    carries the message type and body size; [`protocol::FrameAssembler`]
//!    reassembles frames from arbitrarily fragmented reads, and
//!    [`protocol::SpiceCodec`] parses bodies into [`ServerMessage`] values.
//!
//! Message type ids are a closed, version-pinned enumeration: anything outside
//! [`ServerMessage`] is a protocol error.

pub mod protocol;

pub use protocol::caps::CapabilitySet;
pub use protocol::codec::{Demarshaller, Marshaller, ProtocolError, SpiceCodec};
pub use protocol::frame::{Frame, FrameAssembler};
pub use protocol::header::{DataHeader, HeaderLayout};
pub use protocol::messages::{ChannelType, ClientMessage, ServerMessage};
