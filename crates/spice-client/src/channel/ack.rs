//! Acknowledgement-window flow control.
//!
//! # How the window works (for beginners)
//!
//! The server announces a window size `N` with SET_ACK.  From then on:
//!
//! - **Outbound**: each non-control message we send bumps `count`.  When
//!   `count` reaches `N`, further sends are parked in a queue instead of going
//!   to the socket.  The next SET_ACK resets `count` to zero and the queue
//!   drains in order.
//! - **Inbound**: every `N` messages we receive, we owe the server an ACK so
//!   it keeps sending to us.
//!
//! Control replies (ACK_SYNC, ACK, PONG) are never counted and never parked;
//! the server may be waiting on exactly those before it acknowledges anything.
//!
//! A window of 0 (nothing announced yet) means no limit.

use std::collections::VecDeque;

use crate::channel::msg_out::MsgOut;

/// Per-channel acknowledgement state.
#[derive(Debug, Default)]
pub struct AckWindow {
    /// `message_ack_window`: messages allowed between acknowledgements.
    window: u32,
    /// `message_ack_count`: outbound messages since the last acknowledgement.
    count: u32,
    /// Generation of the last SET_ACK, echoed in ACK_SYNC.
    generation: u32,
    /// Inbound messages since we last sent ACK.
    received: u32,
    /// Sends held back while the window is full.
    pending: VecDeque<MsgOut>,
}

impl AckWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// `true` when further non-control sends must wait.
    pub fn is_suspended(&self) -> bool {
        self.window > 0 && self.count >= self.window
    }

    /// Records one outbound non-control message.
    pub fn on_sent(&mut self) {
        debug_assert!(!self.is_suspended(), "send while window is full");
        self.count = self.count.saturating_add(1);
    }

    /// Applies a SET_ACK: adopt the window and reopen it.
    pub fn set_ack(&mut self, generation: u32, window: u32) {
        self.generation = generation;
        self.window = window;
        self.count = 0;
        self.received = 0;
    }

    /// Records one inbound message.  Returns `true` when an ACK is now owed.
    pub fn on_received(&mut self) -> bool {
        if self.window == 0 {
            return false;
        }
        self.received += 1;
        if self.received >= self.window {
            self.received = 0;
            true
        } else {
            false
        }
    }

    /// Parks a message until the window reopens.
    pub fn park(&mut self, msg: MsgOut) {
        self.pending.push_back(msg);
    }

    /// Takes the oldest parked message if the window has room for it.
    pub fn take_sendable(&mut self) -> Option<MsgOut> {
        if self.is_suspended() {
            None
        } else {
            self.pending.pop_front()
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops every parked message and forgets the window.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use spice_proto::protocol::ChannelType;

    use super::*;
    use crate::channel::ChannelIdentity;

    fn msg(msg_type: u16) -> MsgOut {
        MsgOut::new(ChannelIdentity::new(0, ChannelType::Record, 0), msg_type)
    }

    #[test]
    fn test_no_window_never_suspends() {
        let mut ack = AckWindow::new();
        for _ in 0..1000 {
            ack.on_sent();
        }
        assert!(!ack.is_suspended());
        assert!(!ack.on_received());
    }

    #[test]
    fn test_window_suspends_after_n_sends() {
        // Arrange
        let mut ack = AckWindow::new();
        ack.set_ack(1, 3);

        // Act
        for _ in 0..3 {
            assert!(!ack.is_suspended());
            ack.on_sent();
        }

        // Assert
        assert!(ack.is_suspended());
        assert_eq!(ack.count(), 3);
    }

    #[test]
    fn test_set_ack_reopens_window_and_releases_in_order() {
        // Arrange
        let mut ack = AckWindow::new();
        ack.set_ack(1, 1);
        ack.on_sent();
        ack.park(msg(200));
        ack.park(msg(201));
        assert!(ack.take_sendable().is_none());

        // Act
        ack.set_ack(2, 1);

        // Assert – one slot, so only the oldest leaves
        let first = ack.take_sendable().unwrap();
        assert_eq!(first.msg_type(), 200);
        ack.on_sent();
        assert!(ack.take_sendable().is_none());
        assert_eq!(ack.pending_len(), 1);
        assert_eq!(ack.generation(), 2);
    }

    #[test]
    fn test_inbound_ack_every_window_messages() {
        let mut ack = AckWindow::new();
        ack.set_ack(1, 2);

        assert!(!ack.on_received());
        assert!(ack.on_received());
        assert!(!ack.on_received());
        assert!(ack.on_received());
    }

    #[test]
    fn test_reset_drops_parked_messages() {
        let mut ack = AckWindow::new();
        ack.set_ack(1, 1);
        ack.on_sent();
        ack.park(msg(200));

        ack.reset();

        assert_eq!(ack.pending_len(), 0);
        assert_eq!(ack.window(), 0);
    }
}
