//! Inbound message buffers.
//!
//! # Ownership model (for beginners)
//!
//! A [`MsgIn`] is a cheap handle to a shared, immutable message.  Cloning the
//! handle takes another reference; dropping it releases one.  When the last
//! handle goes away the raw bytes and the parsed record are freed, exactly
//! once, by `Arc`.
//!
//! Handlers and sinks may keep a `MsgIn` past the end of dispatch (an audio
//! sink queueing packets, for example).  The message only remembers the
//! *identity* of the channel that received it, so a retained message never
//! keeps the channel itself alive.
//!
//! A sub-message is a `MsgIn` whose bytes are a range of its parent's body.
//! It holds a strong reference to the parent, so the parent lives at least as
//! long as any of its sub-messages, and the parent is released once when the
//! last sub-message and the last direct handle are both gone.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use spice_proto::protocol::{DataHeader, ProtocolError, ServerMessage, SubMessageDescriptor};
use tracing::trace;

use crate::channel::ChannelIdentity;

/// A shared handle to one received data message.
#[derive(Clone)]
pub struct MsgIn {
    inner: Arc<Inner>,
}

struct Inner {
    channel: ChannelIdentity,
    header: DataHeader,
    data: Bytes,
    parsed: OnceLock<ServerMessage>,
    parent: Option<MsgIn>,
}

impl MsgIn {
    /// Wraps a complete frame received on `channel`.
    pub fn new(channel: ChannelIdentity, header: DataHeader, data: Bytes) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                header,
                data,
                parsed: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Creates the sub-message described by `sub` inside `parent`.
    ///
    /// The sub-message's bytes are a view into the parent's storage; no copy
    /// is made.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the range lies outside
    /// the parent body.
    pub fn sub_new(parent: &MsgIn, sub: &SubMessageDescriptor) -> Result<Self, ProtocolError> {
        let end = sub.offset.checked_add(sub.size).filter(|&end| end <= parent.inner.data.len());
        let Some(end) = end else {
            return Err(ProtocolError::MalformedPayload(format!(
                "sub-message {}..+{} outside parent of {} bytes",
                sub.offset,
                sub.size,
                parent.inner.data.len()
            )));
        };
        Ok(Self {
            inner: Arc::new(Inner {
                channel: parent.inner.channel,
                header: DataHeader {
                    serial: parent.inner.header.serial,
                    msg_type: sub.msg_type,
                    size: sub.size as u32,
                    sub_list: 0,
                },
                data: parent.inner.data.slice(sub.offset..end),
                parsed: OnceLock::new(),
                parent: Some(parent.clone()),
            }),
        })
    }

    /// The channel this message arrived on.
    pub fn channel(&self) -> ChannelIdentity {
        self.inner.channel
    }

    pub fn header(&self) -> &DataHeader {
        &self.inner.header
    }

    /// Message type id from the header.
    pub fn msg_type(&self) -> u16 {
        self.inner.header.msg_type
    }

    pub fn serial(&self) -> u64 {
        self.inner.header.serial
    }

    /// The raw body bytes.
    pub fn raw(&self) -> &Bytes {
        &self.inner.data
    }

    /// The typed record, once the demarshaller has attached one.
    pub fn parsed(&self) -> Option<&ServerMessage> {
        self.inner.parsed.get()
    }

    /// The message this one was carved out of, for sub-messages.
    pub fn parent(&self) -> Option<&MsgIn> {
        self.inner.parent.as_ref()
    }

    /// Number of live handles to this message.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Attaches the parsed record.  A message is parsed at most once; a second
    /// attachment is ignored and handed back.
    pub(crate) fn attach_parsed(&self, msg: ServerMessage) -> Result<(), ServerMessage> {
        self.inner.parsed.set(msg)
    }

    /// Logs the raw body at trace level.
    pub fn hexdump(&self) {
        trace!(
            "{} < type {} serial {} size {}\n{}",
            self.inner.channel,
            self.msg_type(),
            self.serial(),
            self.inner.data.len(),
            format_hexdump(&self.inner.data)
        );
    }
}

impl std::fmt::Debug for MsgIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgIn")
            .field("channel", &self.inner.channel)
            .field("header", &self.inner.header)
            .field("parsed", &self.inner.parsed.get().is_some())
            .field("sub", &self.inner.parent.is_some())
            .finish()
    }
}

/// Formats `data` as 16-byte hex rows with an offset column.
pub(crate) fn format_hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + data.len() / 16 * 8);
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", row * 16);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use spice_proto::protocol::{server_msg, ChannelType, SetAckMessage};

    use super::*;

    fn identity() -> ChannelIdentity {
        ChannelIdentity::new(1, ChannelType::Playback, 0)
    }

    fn header(msg_type: u16, size: u32) -> DataHeader {
        DataHeader {
            serial: 7,
            msg_type,
            size,
            sub_list: 0,
        }
    }

    fn weak(msg: &MsgIn) -> Weak<Inner> {
        Arc::downgrade(&msg.inner)
    }

    #[test]
    fn test_new_message_has_no_parsed_data() {
        let msg = MsgIn::new(identity(), header(4, 0), Bytes::new());
        assert!(msg.parsed().is_none());
        assert_eq!(msg.msg_type(), 4);
        assert_eq!(msg.ref_count(), 1);
    }

    #[test]
    fn test_clone_and_drop_track_references() {
        // Arrange
        let msg = MsgIn::new(identity(), header(4, 0), Bytes::new());
        let tracker = weak(&msg);

        // Act
        let second = msg.clone();
        assert_eq!(msg.ref_count(), 2);
        drop(msg);

        // Assert – still alive through the second handle, gone after it
        assert!(tracker.upgrade().is_some());
        drop(second);
        assert!(tracker.upgrade().is_none());
    }

    #[test]
    fn test_parsed_record_is_attached_once() {
        let msg = MsgIn::new(identity(), header(server_msg::SET_ACK, 8), Bytes::new());
        let record = ServerMessage::SetAck(SetAckMessage {
            generation: 1,
            window: 2,
        });

        assert!(msg.attach_parsed(record.clone()).is_ok());
        assert_eq!(msg.attach_parsed(record.clone()), Err(record.clone()));
        assert_eq!(msg.parsed(), Some(&record));
    }

    #[test]
    fn test_sub_message_bytes_equal_parent_range() {
        // Arrange
        let body = Bytes::from((0u8..32).collect::<Vec<_>>());
        let parent = MsgIn::new(identity(), header(4, 32), body.clone());
        let descriptor = SubMessageDescriptor {
            msg_type: server_msg::SET_ACK,
            offset: 10,
            size: 8,
        };

        // Act
        let sub = MsgIn::sub_new(&parent, &descriptor).unwrap();

        // Assert
        assert_eq!(&sub.raw()[..], &body[10..18]);
        assert_eq!(sub.raw().as_ptr(), parent.raw()[10..].as_ptr());
        assert_eq!(sub.msg_type(), server_msg::SET_ACK);
        assert_eq!(sub.serial(), 7);
        assert_eq!(sub.channel(), parent.channel());
    }

    #[test]
    fn test_sub_message_keeps_parent_alive_and_releases_it_once() {
        // Arrange
        let parent = MsgIn::new(identity(), header(4, 16), Bytes::from(vec![0u8; 16]));
        let parent_tracker = weak(&parent);
        let descriptor = SubMessageDescriptor {
            msg_type: 3,
            offset: 0,
            size: 8,
        };
        let first = MsgIn::sub_new(&parent, &descriptor).unwrap();
        let second = MsgIn::sub_new(&parent, &descriptor).unwrap();
        assert_eq!(parent.ref_count(), 3);

        // Act – the direct handle goes first
        drop(parent);

        // Assert – parent lives until the last sub-message is released
        assert_eq!(parent_tracker.strong_count(), 2);
        drop(first);
        assert_eq!(parent_tracker.strong_count(), 1);
        drop(second);
        assert!(parent_tracker.upgrade().is_none());
    }

    #[test]
    fn test_sub_message_outside_parent_is_rejected() {
        let parent = MsgIn::new(identity(), header(4, 4), Bytes::from(vec![0u8; 4]));
        let descriptor = SubMessageDescriptor {
            msg_type: 3,
            offset: 2,
            size: 8,
        };
        assert!(matches!(
            MsgIn::sub_new(&parent, &descriptor),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert_eq!(parent.ref_count(), 1);
    }

    #[test]
    fn test_message_outlives_identity_source() {
        // A retained message only copies the identity; nothing else is shared.
        let msg = MsgIn::new(identity(), header(101, 2), Bytes::from_static(&[1, 2]));
        let kept = msg.clone();
        drop(msg);
        assert_eq!(kept.channel().channel_type, ChannelType::Playback);
        assert_eq!(&kept.raw()[..], &[1, 2]);
    }

    #[test]
    fn test_format_hexdump_rows() {
        let dump = format_hexdump(&(0u8..18).collect::<Vec<_>>());
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 00 01"));
        assert_eq!(lines[1], "0010: 10 11");
    }
}
