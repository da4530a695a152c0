//! Outbound message buffers.
//!
//! A [`MsgOut`] accumulates a body for one message type.  It has no serial
//! until it is handed to the transport: messages held back by the
//! acknowledgement window receive their serial when they are finally written,
//! so serials on the wire are always in send order.
//!
//! Ownership is single: `submit` takes the message and the channel drops it
//! once the bytes are queued for the transport.  A caller that still needs the
//! body afterwards copies [`MsgOut::body`] before submitting.

use bytes::BytesMut;
use spice_proto::protocol::{
    is_control_reply, CapabilitySet, ClientMessage, DataHeader, HeaderLayout, Marshaller,
    ProtocolError, SerialCounter,
};
use tracing::trace;

use crate::channel::msg_in::format_hexdump;
use crate::channel::ChannelIdentity;

/// One outbound data message.
#[derive(Debug)]
pub struct MsgOut {
    channel: ChannelIdentity,
    msg_type: u16,
    body: BytesMut,
    serial: Option<u64>,
}

impl MsgOut {
    /// Starts an empty message of `msg_type` for `channel`.
    pub fn new(channel: ChannelIdentity, msg_type: u16) -> Self {
        Self {
            channel,
            msg_type,
            body: BytesMut::new(),
            serial: None,
        }
    }

    /// Builds a message from a typed record.
    ///
    /// # Errors
    ///
    /// Propagates the marshaller's [`ProtocolError`].
    pub fn from_message(
        channel: ChannelIdentity,
        msg: &ClientMessage,
        marshaller: &dyn Marshaller,
        minor_version: u32,
        caps: &CapabilitySet,
    ) -> Result<Self, ProtocolError> {
        let mut out = Self::new(channel, msg.message_type());
        marshaller.marshal(msg, minor_version, caps, &mut out.body)?;
        Ok(out)
    }

    /// The body under construction.
    pub fn marshaller(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn channel(&self) -> ChannelIdentity {
        self.channel
    }

    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The serial, once the message has been submitted.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    /// `true` for ACK_SYNC, ACK and PONG.
    pub fn is_control(&self) -> bool {
        is_control_reply(self.msg_type)
    }

    /// Assigns the next serial from `serials` unless one is already set, and
    /// returns it.
    pub(crate) fn stamp(&mut self, serials: &SerialCounter) -> u64 {
        *self.serial.get_or_insert_with(|| serials.next())
    }

    /// Writes header and body to `out`.  Must be stamped first.
    pub(crate) fn write_to(&self, layout: HeaderLayout, out: &mut Vec<u8>) {
        DataHeader {
            serial: self.serial.unwrap_or_default(),
            msg_type: self.msg_type,
            size: self.body.len() as u32,
            sub_list: 0,
        }
        .encode(layout, out);
        out.extend_from_slice(&self.body);
    }

    /// Logs the body at trace level.
    pub fn hexdump(&self) {
        trace!(
            "{} > type {} serial {:?} size {}\n{}",
            self.channel,
            self.msg_type,
            self.serial,
            self.body.len(),
            format_hexdump(&self.body)
        );
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use spice_proto::protocol::{client_msg, ChannelType, SpiceCodec};

    use super::*;

    fn identity() -> ChannelIdentity {
        ChannelIdentity::new(0, ChannelType::Playback, 0)
    }

    #[test]
    fn test_serial_is_assigned_once() {
        // Arrange
        let serials = SerialCounter::new();
        let mut msg = MsgOut::new(identity(), client_msg::ACK);

        // Act
        let first = msg.stamp(&serials);
        let again = msg.stamp(&serials);

        // Assert
        assert_eq!(first, 1);
        assert_eq!(again, 1);
        assert_eq!(serials.last(), 1);
    }

    #[test]
    fn test_serials_follow_submission_order() {
        let serials = SerialCounter::new();
        let mut early = MsgOut::new(identity(), 200);
        let mut late = MsgOut::new(identity(), 201);

        // `late` is submitted first, so it gets the lower serial.
        assert_eq!(late.stamp(&serials), 1);
        assert_eq!(early.stamp(&serials), 2);
    }

    #[test]
    fn test_write_to_full_header() {
        // Arrange
        let serials = SerialCounter::new();
        let mut msg = MsgOut::new(identity(), 250);
        msg.marshaller().put_u32_le(0xAABBCCDD);
        msg.stamp(&serials);
        let mut wire = Vec::new();

        // Act
        msg.write_to(HeaderLayout::Full, &mut wire);

        // Assert
        let header = DataHeader::decode(HeaderLayout::Full, &wire).unwrap();
        assert_eq!(header.serial, 1);
        assert_eq!(header.msg_type, 250);
        assert_eq!(header.size, 4);
        assert_eq!(&wire[18..], &0xAABBCCDDu32.to_le_bytes());
    }

    #[test]
    fn test_from_message_uses_marshaller() {
        let codec = SpiceCodec::new(ChannelType::Playback);
        let msg = MsgOut::from_message(
            identity(),
            &ClientMessage::AckSync { generation: 3 },
            &codec,
            2,
            &CapabilitySet::new(),
        )
        .unwrap();

        assert_eq!(msg.msg_type(), client_msg::ACK_SYNC);
        assert_eq!(msg.body(), &3u32.to_le_bytes());
        assert!(msg.is_control());
        assert_eq!(msg.serial(), None);
    }
}
