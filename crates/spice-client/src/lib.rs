//! spice-client library entry point.
//!
//! Re-exports the public modules so that integration tests in `tests/` and the
//! binary in `main.rs` share one module tree.
//!
//! # What does spice-client do? (for beginners)
//!
//! A SPICE session is split into typed *channels* (main, display, inputs,
//! cursor, playback, record), each its own socket.  Every channel runs the same
//! engine:
//!
//! 1. Optionally completes a TLS handshake.
//! 2. Exchanges link headers and link messages with the server, agreeing on
//!    capabilities such as the compact 6-byte data header.
//! 3. Authenticates with an RSA-encrypted password ticket.
//! 4. Exchanges framed messages: every inbound frame is parsed, dispatched by
//!    type id to a handler, and acknowledged according to the server's window.
//!
//! The playback channel adds handlers that turn PLAYBACK_* messages into calls
//! on a [`channel::PlaybackSink`].

/// The channel engine: state machine, message buffers, dispatch, flow control.
pub mod channel;

/// Adapters: TCP/TLS transport, ticket auth, audio sinks, configuration.
pub mod infrastructure;

pub use channel::{
    Channel, ChannelError, ChannelEvent, ChannelIdentity, ChannelState, ChannelVariant,
    ErrorClass, MsgIn, MsgOut,
};
