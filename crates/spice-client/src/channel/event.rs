//! Lifecycle notifications a channel reports to its session.

use spice_proto::protocol::{NotifySeverity, WaitForChannel};
use tokio::sync::mpsc;

use crate::channel::error::ErrorClass;
use crate::channel::state::ChannelState;
use crate::channel::ChannelIdentity;

/// Events emitted by a channel, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Every state change, including resets.
    StateChanged {
        channel: ChannelIdentity,
        state: ChannelState,
    },
    /// A transport was attached and negotiation started.
    Connected(ChannelIdentity),
    /// Link negotiation and authentication succeeded.
    Ready(ChannelIdentity),
    /// The channel returned to `Unconnected`.
    Disconnected(ChannelIdentity),
    /// A fatal error; always followed by `Disconnected`.
    Error {
        channel: ChannelIdentity,
        class: ErrorClass,
        message: String,
    },
    /// The server announced it is about to close the channel.
    PeerDisconnecting {
        channel: ChannelIdentity,
        reason: u32,
    },
    /// A human-readable server notification.
    Notify {
        channel: ChannelIdentity,
        severity: NotifySeverity,
        message: String,
    },
    /// The server asks this session to wait for other channels to catch up.
    WaitForChannels {
        channel: ChannelIdentity,
        waits: Vec<WaitForChannel>,
    },
    /// The server announced a migration.
    Migrate { channel: ChannelIdentity, flags: u32 },
}

/// Sending side of the session's event queue.
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Receiving side of the session's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Creates an event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
