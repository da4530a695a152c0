//! The part of a channel that message handlers may touch.
//!
//! [`ChannelCore`] owns everything needed to *produce* outbound traffic and
//! report events: identity, serial counter, ack window, negotiated caps, and
//! the buffer of encoded bytes waiting for the transport.  It never touches a
//! socket; the owning [`Channel`](crate::channel::Channel) drains
//! [`ChannelCore::outgoing`] when the transport is writable.

use std::sync::Arc;

use spice_proto::protocol::{
    ClientMessage, HeaderLayout, Marshaller, SerialCounter, VERSION_MINOR,
};
use tracing::{debug, trace};

use crate::channel::ack::AckWindow;
use crate::channel::error::ChannelError;
use crate::channel::event::{ChannelEvent, EventSender};
use crate::channel::link::NegotiatedCaps;
use crate::channel::msg_out::MsgOut;
use crate::channel::ChannelIdentity;

/// Outbound side and bookkeeping of one channel.
pub struct ChannelCore {
    identity: ChannelIdentity,
    serials: SerialCounter,
    ack: AckWindow,
    caps: Option<NegotiatedCaps>,
    layout: HeaderLayout,
    peer_minor: u32,
    marshaller: Arc<dyn Marshaller>,
    ready: bool,
    outgoing: Vec<u8>,
    events: EventSender,
}

impl ChannelCore {
    pub fn new(
        identity: ChannelIdentity,
        marshaller: Arc<dyn Marshaller>,
        events: EventSender,
    ) -> Self {
        Self {
            identity,
            serials: SerialCounter::new(),
            ack: AckWindow::new(),
            caps: None,
            layout: HeaderLayout::Full,
            peer_minor: VERSION_MINOR,
            marshaller,
            ready: false,
            outgoing: Vec::new(),
            events,
        }
    }

    pub fn identity(&self) -> ChannelIdentity {
        self.identity
    }

    /// Capabilities agreed with the peer, once link negotiation finished.
    pub fn caps(&self) -> Option<&NegotiatedCaps> {
        self.caps.as_ref()
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    /// Protocol minor version spoken by the peer.
    pub fn peer_minor(&self) -> u32 {
        self.peer_minor
    }

    pub fn ack(&self) -> &AckWindow {
        &self.ack
    }

    pub fn serials(&self) -> &SerialCounter {
        &self.serials
    }

    /// Marshals `msg` and submits it.
    ///
    /// # Errors
    ///
    /// Propagates marshalling failures as protocol errors.
    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), ChannelError> {
        let channel_caps = self.caps.as_ref().map(|c| c.channel.clone()).unwrap_or_default();
        let out = MsgOut::from_message(
            self.identity,
            msg,
            self.marshaller.as_ref(),
            self.peer_minor,
            &channel_caps,
        )?;
        self.submit(out);
        Ok(())
    }

    /// Queues `msg` for the transport, or parks it while the channel is not
    /// ready or the ack window is full.  Control replies are never parked.
    pub fn submit(&mut self, msg: MsgOut) {
        if msg.is_control() && self.ready {
            self.write_out(msg);
        } else if !self.ready || self.ack.is_suspended() {
            trace!(
                "{}: parking type {} (window {}/{})",
                self.identity,
                msg.msg_type(),
                self.ack.count(),
                self.ack.window()
            );
            self.ack.park(msg);
        } else {
            self.write_out(msg);
        }
    }

    /// Adopts the window announced by SET_ACK and reopens it.
    pub(crate) fn set_ack(&mut self, generation: u32, window: u32) {
        debug!("{}: ack window {} (generation {})", self.identity, window, generation);
        self.ack.set_ack(generation, window);
    }

    /// Counts one inbound message; sends ACK when a window's worth arrived.
    pub(crate) fn on_message_received(&mut self) -> Result<(), ChannelError> {
        if self.ack.on_received() {
            self.send(&ClientMessage::Ack)?;
        }
        Ok(())
    }

    /// Writes parked messages while the window has room.
    pub(crate) fn release_parked(&mut self) {
        if !self.ready {
            return;
        }
        while let Some(msg) = self.ack.take_sendable() {
            self.write_out(msg);
        }
    }

    /// Records the capabilities agreed during link negotiation.  The first
    /// set stays in force until [`ChannelCore::reset`].
    pub(crate) fn freeze_caps(&mut self, caps: NegotiatedCaps) {
        self.layout = self.caps.get_or_insert(caps).header_layout();
    }

    /// Opens the channel for sends and flushes what was parked meanwhile.
    pub(crate) fn on_ready(&mut self, peer_minor: u32) {
        self.peer_minor = peer_minor;
        self.ready = true;
        self.release_parked();
    }

    /// Appends raw bytes (link negotiation, authentication) to the outbound
    /// buffer, bypassing message framing.
    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        self.outgoing.extend_from_slice(bytes);
    }

    /// Encoded bytes waiting for the transport.
    pub(crate) fn outgoing(&self) -> &[u8] {
        &self.outgoing
    }

    /// Drops the first `n` bytes of the outbound buffer after a write.
    pub(crate) fn consume_outgoing(&mut self, n: usize) {
        self.outgoing.drain(..n);
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        // A session that stopped listening is not an error for the channel.
        let _ = self.events.send(event);
    }

    /// Forgets everything tied to the current connection.  Serials keep
    /// counting so they are never reused on this channel.
    pub(crate) fn reset(&mut self) {
        self.ack.reset();
        self.caps = None;
        self.layout = HeaderLayout::Full;
        self.peer_minor = VERSION_MINOR;
        self.ready = false;
        self.outgoing.clear();
    }

    fn write_out(&mut self, mut msg: MsgOut) {
        let control = msg.is_control();
        msg.stamp(&self.serials);
        msg.hexdump();
        msg.write_to(self.layout, &mut self.outgoing);
        if !control {
            self.ack.on_sent();
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use spice_proto::protocol::{
        client_msg, CapabilitySet, ChannelType, DataHeader, SpiceCodec,
    };

    use super::*;
    use crate::channel::event::event_channel;

    fn core() -> ChannelCore {
        let (tx, _rx) = event_channel();
        ChannelCore::new(
            ChannelIdentity::new(1, ChannelType::Record, 0),
            Arc::new(SpiceCodec::new(ChannelType::Record)),
            tx,
        )
    }

    fn ready(core: &mut ChannelCore) {
        core.freeze_caps(NegotiatedCaps {
            common: CapabilitySet::new(),
            channel: CapabilitySet::new(),
        });
        core.on_ready(2);
    }

    fn frames(bytes: &[u8]) -> Vec<DataHeader> {
        let mut out = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let header = DataHeader::decode(HeaderLayout::Full, rest).unwrap();
            rest = &rest[18 + header.size as usize..];
            out.push(header);
        }
        out
    }

    fn raw(msg_type: u16) -> MsgOut {
        let mut msg = MsgOut::new(ChannelIdentity::new(1, ChannelType::Record, 0), msg_type);
        msg.marshaller().put_u8(0);
        msg
    }

    #[test]
    fn test_sends_before_ready_are_parked() {
        // Arrange
        let mut core = core();

        // Act
        core.submit(raw(200));

        // Assert
        assert!(core.outgoing().is_empty());
        assert_eq!(core.ack().pending_len(), 1);
        ready(&mut core);
        assert_eq!(frames(core.outgoing()).len(), 1);
    }

    #[test]
    fn test_window_suspends_the_send_after_n() {
        // Arrange
        let mut core = core();
        ready(&mut core);
        core.set_ack(1, 2);

        // Act
        core.submit(raw(200));
        core.submit(raw(201));
        core.submit(raw(202));

        // Assert – the third waits
        assert_eq!(frames(core.outgoing()).len(), 2);
        assert_eq!(core.ack().pending_len(), 1);

        // Act – the server acknowledges
        core.set_ack(2, 2);
        core.release_parked();

        // Assert – released with the next serial
        let headers = frames(core.outgoing());
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[2].msg_type, 202);
        assert_eq!(headers[2].serial, 3);
    }

    #[test]
    fn test_control_replies_bypass_full_window() {
        // Arrange
        let mut core = core();
        ready(&mut core);
        core.set_ack(1, 1);
        core.submit(raw(200));
        assert!(core.ack().is_suspended());

        // Act
        core.send(&ClientMessage::Pong { id: 1, timestamp: 2 }).unwrap();

        // Assert
        let headers = frames(core.outgoing());
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].msg_type, client_msg::PONG);
        assert_eq!(core.ack().count(), 1, "control replies are not counted");
    }

    #[test]
    fn test_ack_sent_every_window_received_messages() {
        // Arrange
        let mut core = core();
        ready(&mut core);
        core.set_ack(1, 3);

        // Act
        for _ in 0..6 {
            core.on_message_received().unwrap();
        }

        // Assert
        let headers = frames(core.outgoing());
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().all(|h| h.msg_type == client_msg::ACK && h.size == 0));
    }

    #[test]
    fn test_body_copied_before_submit_matches_wire() {
        // Arrange
        let mut core = core();
        ready(&mut core);
        let mut msg = MsgOut::new(ChannelIdentity::new(1, ChannelType::Record, 0), 200);
        msg.marshaller().put_slice(&[7, 8, 9]);
        let kept = msg.body().to_vec();

        // Act
        core.submit(msg);

        // Assert
        assert_eq!(&core.outgoing()[18..], &kept[..]);
    }

    #[test]
    fn test_reset_keeps_serials_counting() {
        let mut core = core();
        ready(&mut core);
        core.submit(raw(200));
        core.reset();
        ready(&mut core);
        core.submit(raw(200));

        let headers = frames(core.outgoing());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].serial, 2);
    }
}
