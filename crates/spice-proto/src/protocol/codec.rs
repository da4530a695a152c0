//! Message body codec: turns data-message bodies into typed records and back.
//!
//! The channel engine never looks inside a body itself.  It hands the bytes to
//! a [`Demarshaller`] keyed by message type and protocol version, and builds
//! outbound bodies through a [`Marshaller`].  [`SpiceCodec`] is the built-in
//! implementation of both for the messages this client understands.
//!
//! Body layouts (little-endian):
//! ```text
//! SET_ACK            [generation:4][window:4]
//! PING               [id:4][timestamp:8][padding:*]
//! WAIT_FOR_CHANNELS  [count:1]{[type:1][id:1][serial:8]}*count
//! DISCONNECTING      [time_stamp:8][reason:4]
//! NOTIFY             [time_stamp:8][severity:4][visibility:4][what:4][len:4][message:len][NUL]
//! MIGRATE            [flags:4]
//! PLAYBACK_DATA      [time:4][audio:*]
//! PLAYBACK_MODE      [time:4][mode:2][codec data:*]
//! PLAYBACK_START     [channels:4][format:2][frequency:4][time:4]
//! PLAYBACK_STOP      (empty)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol::caps::CapabilitySet;
use crate::protocol::messages::{
    client_msg, server_msg, AudioFormat, AudioMode, ChannelType, ClientMessage,
    DisconnectingMessage, LinkErrorCode, MigrateMessage, NotifyMessage, NotifySeverity,
    PingMessage, PlaybackModeMessage, PlaybackPacketMessage, PlaybackStartMessage,
    ServerMessage, SetAckMessage, WaitForChannel, WaitForChannelsMessage,
};

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type id has no meaning on this channel type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    /// The link header did not start with `"REDQ"`.
    #[error("invalid link magic: 0x{0:08X}")]
    InvalidMagic(u32),

    /// The peer speaks a different major protocol version.
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// The server refused the link.
    #[error("link rejected by server: {0:?}")]
    LinkRejected(LinkErrorCode),

    /// A declared size exceeds what this client accepts.
    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge { size: u32, max: u32 },

    /// The body could not be parsed (field out of range, bad offset, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Codec boundaries ──────────────────────────────────────────────────────────

/// Parses a data-message body into a typed record.
///
/// A parse failure is fatal for the channel that received the message.
pub trait Demarshaller: Send + Sync {
    /// Parses `body` as message `msg_type` of the given protocol minor version.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the type is unknown or the body is malformed.
    fn parse(
        &self,
        msg_type: u16,
        minor_version: u32,
        body: &Bytes,
    ) -> Result<ServerMessage, ProtocolError>;
}

/// Serializes a typed client record into an outbound body.
pub trait Marshaller: Send + Sync {
    /// Appends the body of `msg` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the message cannot be represented.
    fn marshal(
        &self,
        msg: &ClientMessage,
        minor_version: u32,
        caps: &CapabilitySet,
        out: &mut BytesMut,
    ) -> Result<(), ProtocolError>;
}

/// Built-in codec for the common messages and the playback channel.
#[derive(Debug, Clone, Copy)]
pub struct SpiceCodec {
    channel_type: ChannelType,
}

impl SpiceCodec {
    /// Creates a codec for messages arriving on a `channel_type` channel.
    pub fn new(channel_type: ChannelType) -> Self {
        Self { channel_type }
    }
}

impl Demarshaller for SpiceCodec {
    fn parse(
        &self,
        msg_type: u16,
        _minor_version: u32,
        body: &Bytes,
    ) -> Result<ServerMessage, ProtocolError> {
        match msg_type {
            server_msg::MIGRATE => Ok(ServerMessage::Migrate(MigrateMessage {
                flags: read_u32(body, 0)?,
            })),
            server_msg::SET_ACK => {
                require_len(body, 8, "SetAck")?;
                Ok(ServerMessage::SetAck(SetAckMessage {
                    generation: read_u32(body, 0)?,
                    window: read_u32(body, 4)?,
                }))
            }
            server_msg::PING => {
                require_len(body, 12, "Ping")?;
                Ok(ServerMessage::Ping(PingMessage {
                    id: read_u32(body, 0)?,
                    timestamp: read_u64(body, 4)?,
                }))
            }
            server_msg::WAIT_FOR_CHANNELS => {
                decode_wait_for_channels(body).map(ServerMessage::WaitForChannels)
            }
            server_msg::DISCONNECTING => {
                require_len(body, 12, "Disconnecting")?;
                Ok(ServerMessage::Disconnecting(DisconnectingMessage {
                    time_stamp: read_u64(body, 0)?,
                    reason: read_u32(body, 8)?,
                }))
            }
            server_msg::NOTIFY => decode_notify(body).map(ServerMessage::Notify),
            id if id >= server_msg::BASE_LAST && self.channel_type == ChannelType::Playback => {
                decode_playback(id, body)
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl Marshaller for SpiceCodec {
    fn marshal(
        &self,
        msg: &ClientMessage,
        _minor_version: u32,
        _caps: &CapabilitySet,
        out: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match msg {
            ClientMessage::AckSync { generation } => out.put_u32_le(*generation),
            ClientMessage::Ack => {} // empty body
            ClientMessage::Pong { id, timestamp } => {
                out.put_u32_le(*id);
                out.put_u64_le(*timestamp);
            }
            ClientMessage::Disconnecting { time_stamp, reason } => {
                out.put_u64_le(*time_stamp);
                out.put_u32_le(*reason);
            }
        }
        Ok(())
    }
}

// ── Peer-side helpers ─────────────────────────────────────────────────────────

/// Encodes the body of a server message.
///
/// The client never sends these; the function exists for test peers, replay
/// tools, and benchmarks that need to produce server traffic.
pub fn encode_server_message(msg: &ServerMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        ServerMessage::Migrate(m) => buf.extend_from_slice(&m.flags.to_le_bytes()),
        ServerMessage::SetAck(m) => {
            buf.extend_from_slice(&m.generation.to_le_bytes());
            buf.extend_from_slice(&m.window.to_le_bytes());
        }
        ServerMessage::Ping(m) => {
            buf.extend_from_slice(&m.id.to_le_bytes());
            buf.extend_from_slice(&m.timestamp.to_le_bytes());
        }
        ServerMessage::WaitForChannels(m) => {
            buf.push(m.channels.len() as u8);
            for wait in &m.channels {
                buf.push(wait.channel_type);
                buf.push(wait.channel_id);
                buf.extend_from_slice(&wait.message_serial.to_le_bytes());
            }
        }
        ServerMessage::Disconnecting(m) => {
            buf.extend_from_slice(&m.time_stamp.to_le_bytes());
            buf.extend_from_slice(&m.reason.to_le_bytes());
        }
        ServerMessage::Notify(m) => {
            buf.extend_from_slice(&m.time_stamp.to_le_bytes());
            buf.extend_from_slice(&m.severity.as_u32().to_le_bytes());
            buf.extend_from_slice(&m.visibility.to_le_bytes());
            buf.extend_from_slice(&m.what.to_le_bytes());
            buf.extend_from_slice(&(m.message.len() as u32).to_le_bytes());
            buf.extend_from_slice(m.message.as_bytes());
            buf.push(0);
        }
        ServerMessage::PlaybackData(m) => {
            buf.extend_from_slice(&m.time.to_le_bytes());
            buf.extend_from_slice(&m.data);
        }
        ServerMessage::PlaybackMode(m) => {
            buf.extend_from_slice(&m.time.to_le_bytes());
            buf.extend_from_slice(&m.mode.as_u16().to_le_bytes());
            buf.extend_from_slice(&m.data);
        }
        ServerMessage::PlaybackStart(m) => {
            buf.extend_from_slice(&m.channels.to_le_bytes());
            buf.extend_from_slice(&m.format.as_u16().to_le_bytes());
            buf.extend_from_slice(&m.frequency.to_le_bytes());
            buf.extend_from_slice(&m.time.to_le_bytes());
        }
        ServerMessage::PlaybackStop => {}
    }
    buf
}

/// Decodes the body of a client message, as a server would.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the type is unknown or the body is short.
pub fn decode_client_message(msg_type: u16, body: &[u8]) -> Result<ClientMessage, ProtocolError> {
    match msg_type {
        client_msg::ACK_SYNC => Ok(ClientMessage::AckSync {
            generation: read_u32(body, 0)?,
        }),
        client_msg::ACK => Ok(ClientMessage::Ack),
        client_msg::PONG => Ok(ClientMessage::Pong {
            id: read_u32(body, 0)?,
            timestamp: read_u64(body, 4)?,
        }),
        client_msg::DISCONNECTING => Ok(ClientMessage::Disconnecting {
            time_stamp: read_u64(body, 0)?,
            reason: read_u32(body, 8)?,
        }),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_playback(msg_type: u16, body: &Bytes) -> Result<ServerMessage, ProtocolError> {
    match msg_type {
        server_msg::PLAYBACK_DATA => {
            require_len(body, 4, "PlaybackData")?;
            Ok(ServerMessage::PlaybackData(PlaybackPacketMessage {
                time: read_u32(body, 0)?,
                data: body.slice(4..),
            }))
        }
        server_msg::PLAYBACK_MODE => {
            require_len(body, 6, "PlaybackMode")?;
            Ok(ServerMessage::PlaybackMode(PlaybackModeMessage {
                time: read_u32(body, 0)?,
                mode: AudioMode::from(read_u16(body, 4)?),
                data: body.slice(6..),
            }))
        }
        server_msg::PLAYBACK_START => {
            require_len(body, 14, "PlaybackStart")?;
            Ok(ServerMessage::PlaybackStart(PlaybackStartMessage {
                channels: read_u32(body, 0)?,
                format: AudioFormat::from(read_u16(body, 4)?),
                frequency: read_u32(body, 6)?,
                time: read_u32(body, 10)?,
            }))
        }
        server_msg::PLAYBACK_STOP => Ok(ServerMessage::PlaybackStop),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn decode_wait_for_channels(p: &[u8]) -> Result<WaitForChannelsMessage, ProtocolError> {
    // 1 (count) + count * (1 type + 1 id + 8 serial)
    require_len(p, 1, "WaitForChannels")?;
    let count = p[0] as usize;
    const ENTRY_SIZE: usize = 10;
    require_len(p, 1 + count * ENTRY_SIZE, "WaitForChannels entries")?;
    let mut channels = Vec::with_capacity(count);
    let mut off = 1;
    for _ in 0..count {
        channels.push(WaitForChannel {
            channel_type: p[off],
            channel_id: p[off + 1],
            message_serial: read_u64(p, off + 2)?,
        });
        off += ENTRY_SIZE;
    }
    Ok(WaitForChannelsMessage { channels })
}

fn decode_notify(p: &[u8]) -> Result<NotifyMessage, ProtocolError> {
    // 8 + 4 + 4 + 4 + 4 = 24 fixed bytes, then the message text
    require_len(p, 24, "Notify")?;
    let message_len = read_u32(p, 20)? as usize;
    require_len(p, 24 + message_len, "Notify.message")?;
    let text = &p[24..24 + message_len];
    // Servers include the terminating NUL in some versions; drop it if present.
    let text = text.strip_suffix(&[0]).unwrap_or(text);
    Ok(NotifyMessage {
        time_stamp: read_u64(p, 0)?,
        severity: NotifySeverity::from(read_u32(p, 8)?),
        visibility: read_u32(p, 12)?,
        what: read_u32(p, 16)?,
        message: String::from_utf8_lossy(text).into_owned(),
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

pub(crate) fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    match buf.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        }),
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        }),
    }
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    match buf.get(offset..offset + 8) {
        Some(b) => {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            Ok(u64::from_le_bytes(word))
        }
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
