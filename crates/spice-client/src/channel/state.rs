//! Connection states of a channel.
//!
//! ```text
//! UNCONNECTED ──connect──► TLS ──handshake done──► LINK_HDR
//!      │                                              │
//!      └───────────connect (no TLS)──────────────────►│
//!                                                     ▼
//!                      READY ◄──auth ok── AUTH ◄── LINK_MSG
//! ```
//!
//! States only move forward along this line.  The single way back is a reset
//! to `Unconnected`, which is legal from every state.

use std::fmt;

/// Where a channel is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ChannelState {
    #[default]
    Unconnected,
    /// TLS handshake in progress.
    Tls,
    /// Local link header sent; waiting for the peer's link header.
    LinkHdr,
    /// Waiting for the rest of the peer's link reply.
    LinkMsg,
    /// Ticket sent; waiting for the link result.
    Auth,
    /// Data messages flow in both directions.
    Ready,
}

impl ChannelState {
    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (_, Unconnected)
                | (Unconnected, Tls)
                | (Unconnected, LinkHdr)
                | (Tls, LinkHdr)
                | (LinkHdr, LinkMsg)
                | (LinkMsg, Auth)
                | (Auth, Ready)
        )
    }

    /// Returns `true` while link negotiation or the TLS handshake is running.
    pub fn is_connecting(self) -> bool {
        !matches!(self, ChannelState::Unconnected | ChannelState::Ready)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Unconnected => "UNCONNECTED",
            ChannelState::Tls => "TLS",
            ChannelState::LinkHdr => "LINK_HDR",
            ChannelState::LinkMsg => "LINK_MSG",
            ChannelState::Auth => "AUTH",
            ChannelState::Ready => "READY",
        };
        f.write_str(name)
    }
}
