//! All SPICE protocol constants and typed message records used by the client
//! channel engine.
//!
//! Messages follow SPICE protocol version 2.2.  Every multi-byte integer on the
//! wire is little-endian.  The message-type numbering space is per channel
//! type, with a shared low range (1–100) for connection-management messages
//! that every channel understands.

use bytes::Bytes;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Magic number that opens every link header: the ASCII bytes `"REDQ"`.
pub const LINK_MAGIC: u32 = u32::from_le_bytes(*b"REDQ");

/// Protocol major version spoken by this client.  A mismatch is fatal.
pub const VERSION_MAJOR: u32 = 2;

/// Protocol minor version spoken by this client.
pub const VERSION_MINOR: u32 = 2;

/// Size of the link header in bytes (magic, major, minor, size).
pub const LINK_HEADER_SIZE: usize = 16;

/// Size of the fixed part of the client link message.
pub const LINK_MESS_SIZE: usize = 18;

/// Size of the server's RSA public key inside the link reply.
pub const TICKET_PUBKEY_BYTES: usize = 162;

/// Size of the fixed part of the server link reply.
pub const LINK_REPLY_SIZE: usize = 4 + TICKET_PUBKEY_BYTES + 12;

/// Longest password accepted by ticket authentication (excluding the NUL).
pub const MAX_PASSWORD_LENGTH: usize = 60;

/// Upper bound on the body of a single data message.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

// ── Channel types ─────────────────────────────────────────────────────────────

/// The typed sub-channels a session can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    Main = 1,
    Display = 2,
    Inputs = 3,
    Cursor = 4,
    Playback = 5,
    Record = 6,
}

impl ChannelType {
    /// Short lowercase name used in channel names and log lines.
    pub fn name(self) -> &'static str {
        match self {
            ChannelType::Main => "main",
            ChannelType::Display => "display",
            ChannelType::Inputs => "inputs",
            ChannelType::Cursor => "cursor",
            ChannelType::Playback => "playback",
            ChannelType::Record => "record",
        }
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChannelType::Main),
            2 => Ok(ChannelType::Display),
            3 => Ok(ChannelType::Inputs),
            4 => Ok(ChannelType::Cursor),
            5 => Ok(ChannelType::Playback),
            6 => Ok(ChannelType::Record),
            _ => Err(()),
        }
    }
}

// ── Message type codes ────────────────────────────────────────────────────────

/// Server → client message type ids.
pub mod server_msg {
    // Shared by every channel type (1–100).
    pub const MIGRATE: u16 = 1;
    pub const MIGRATE_DATA: u16 = 2;
    pub const SET_ACK: u16 = 3;
    pub const PING: u16 = 4;
    pub const WAIT_FOR_CHANNELS: u16 = 5;
    pub const DISCONNECTING: u16 = 6;
    pub const NOTIFY: u16 = 7;

    /// First id of the channel-specific range.
    pub const BASE_LAST: u16 = 101;

    // Playback channel.
    pub const PLAYBACK_DATA: u16 = 101;
    pub const PLAYBACK_MODE: u16 = 102;
    pub const PLAYBACK_START: u16 = 103;
    pub const PLAYBACK_STOP: u16 = 104;
}

/// Client → server message type ids.
pub mod client_msg {
    pub const ACK_SYNC: u16 = 1;
    pub const ACK: u16 = 2;
    pub const PONG: u16 = 3;
    pub const MIGRATE_FLUSH_MARK: u16 = 4;
    pub const MIGRATE_DATA: u16 = 5;
    pub const DISCONNECTING: u16 = 6;
}

// ── Link result codes ─────────────────────────────────────────────────────────

/// Result code carried in the link reply and after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorCode {
    Ok,
    Error,
    InvalidMagic,
    InvalidData,
    VersionMismatch,
    NeedSecured,
    NeedUnsecured,
    PermissionDenied,
    BadConnectionId,
    ChannelNotAvailable,
    Unknown(u32),
}

impl From<u32> for LinkErrorCode {
    fn from(value: u32) -> Self {
        match value {
            0 => LinkErrorCode::Ok,
            1 => LinkErrorCode::Error,
            2 => LinkErrorCode::InvalidMagic,
            3 => LinkErrorCode::InvalidData,
            4 => LinkErrorCode::VersionMismatch,
            5 => LinkErrorCode::NeedSecured,
            6 => LinkErrorCode::NeedUnsecured,
            7 => LinkErrorCode::PermissionDenied,
            8 => LinkErrorCode::BadConnectionId,
            9 => LinkErrorCode::ChannelNotAvailable,
            other => LinkErrorCode::Unknown(other),
        }
    }
}

impl LinkErrorCode {
    /// Wire value of this code.
    pub fn as_u32(self) -> u32 {
        match self {
            LinkErrorCode::Ok => 0,
            LinkErrorCode::Error => 1,
            LinkErrorCode::InvalidMagic => 2,
            LinkErrorCode::InvalidData => 3,
            LinkErrorCode::VersionMismatch => 4,
            LinkErrorCode::NeedSecured => 5,
            LinkErrorCode::NeedUnsecured => 6,
            LinkErrorCode::PermissionDenied => 7,
            LinkErrorCode::BadConnectionId => 8,
            LinkErrorCode::ChannelNotAvailable => 9,
            LinkErrorCode::Unknown(other) => other,
        }
    }
}

// ── Authentication mechanisms ─────────────────────────────────────────────────

/// Mechanism id sent when the server supports auth selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuthMechanism {
    /// RSA-encrypted password ticket.
    Spice = 1,
    /// SASL exchange.
    Sasl = 2,
}

// ── Audio ─────────────────────────────────────────────────────────────────────

/// Audio data encoding announced by the server's PLAYBACK_MODE message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    #[default]
    Invalid,
    Raw,
    Celt051,
    Opus,
    /// A value this protocol version does not define.
    Unknown(u16),
}

impl From<u16> for AudioMode {
    fn from(value: u16) -> Self {
        match value {
            0 => AudioMode::Invalid,
            1 => AudioMode::Raw,
            2 => AudioMode::Celt051,
            3 => AudioMode::Opus,
            other => AudioMode::Unknown(other),
        }
    }
}

impl AudioMode {
    /// Wire value of this mode.
    pub fn as_u16(self) -> u16 {
        match self {
            AudioMode::Invalid => 0,
            AudioMode::Raw => 1,
            AudioMode::Celt051 => 2,
            AudioMode::Opus => 3,
            AudioMode::Unknown(other) => other,
        }
    }
}

/// PCM sample format carried in PLAYBACK_START.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Invalid,
    /// Signed 16-bit little-endian samples.
    S16,
    Unknown(u16),
}

impl From<u16> for AudioFormat {
    fn from(value: u16) -> Self {
        match value {
            0 => AudioFormat::Invalid,
            1 => AudioFormat::S16,
            other => AudioFormat::Unknown(other),
        }
    }
}

impl AudioFormat {
    /// Wire value of this format.
    pub fn as_u16(self) -> u16 {
        match self {
            AudioFormat::Invalid => 0,
            AudioFormat::S16 => 1,
            AudioFormat::Unknown(other) => other,
        }
    }
}

// ── Per-message payload structs (server → client) ─────────────────────────────

/// SET_ACK (3): the server announces its acknowledgement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetAckMessage {
    /// Echoed back in ACK_SYNC so the server can match the reply.
    pub generation: u32,
    /// Number of messages allowed between acknowledgements.
    pub window: u32,
}

/// PING (4): latency probe, answered with PONG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub id: u32,
    pub timestamp: u64,
}

/// Severity of a NOTIFY message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifySeverity {
    Info,
    Warn,
    Error,
    Unknown(u32),
}

impl From<u32> for NotifySeverity {
    fn from(value: u32) -> Self {
        match value {
            0 => NotifySeverity::Info,
            1 => NotifySeverity::Warn,
            2 => NotifySeverity::Error,
            other => NotifySeverity::Unknown(other),
        }
    }
}

impl NotifySeverity {
    pub fn as_u32(self) -> u32 {
        match self {
            NotifySeverity::Info => 0,
            NotifySeverity::Warn => 1,
            NotifySeverity::Error => 2,
            NotifySeverity::Unknown(other) => other,
        }
    }
}

/// NOTIFY (7): human-readable server notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyMessage {
    pub time_stamp: u64,
    pub severity: NotifySeverity,
    pub visibility: u32,
    pub what: u32,
    pub message: String,
}

/// DISCONNECTING (6): the server is about to close the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectingMessage {
    pub time_stamp: u64,
    pub reason: u32,
}

/// One entry of WAIT_FOR_CHANNELS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitForChannel {
    pub channel_type: u8,
    pub channel_id: u8,
    pub message_serial: u64,
}

/// WAIT_FOR_CHANNELS (5): ordering barrier across channels of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitForChannelsMessage {
    pub channels: Vec<WaitForChannel>,
}

/// MIGRATE (1): the session is moving to another host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateMessage {
    pub flags: u32,
}

/// PLAYBACK_MODE (102).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackModeMessage {
    pub time: u32,
    pub mode: AudioMode,
    /// Codec-specific parameters; a view into the message buffer.
    pub data: Bytes,
}

/// PLAYBACK_START (103).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStartMessage {
    pub channels: u32,
    pub format: AudioFormat,
    pub frequency: u32,
    pub time: u32,
}

/// PLAYBACK_DATA (101).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPacketMessage {
    pub time: u32,
    /// Audio bytes; a view into the message buffer, not a copy.
    pub data: Bytes,
}

/// Every server message this client can parse.
///
/// The set is closed and pinned to the protocol version: a type id outside
/// this enumeration is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Migrate(MigrateMessage),
    SetAck(SetAckMessage),
    Ping(PingMessage),
    WaitForChannels(WaitForChannelsMessage),
    Disconnecting(DisconnectingMessage),
    Notify(NotifyMessage),
    PlaybackData(PlaybackPacketMessage),
    PlaybackMode(PlaybackModeMessage),
    PlaybackStart(PlaybackStartMessage),
    PlaybackStop,
}

impl ServerMessage {
    /// Returns the wire type id of this message.
    pub fn message_type(&self) -> u16 {
        match self {
            ServerMessage::Migrate(_) => server_msg::MIGRATE,
            ServerMessage::SetAck(_) => server_msg::SET_ACK,
            ServerMessage::Ping(_) => server_msg::PING,
            ServerMessage::WaitForChannels(_) => server_msg::WAIT_FOR_CHANNELS,
            ServerMessage::Disconnecting(_) => server_msg::DISCONNECTING,
            ServerMessage::Notify(_) => server_msg::NOTIFY,
            ServerMessage::PlaybackData(_) => server_msg::PLAYBACK_DATA,
            ServerMessage::PlaybackMode(_) => server_msg::PLAYBACK_MODE,
            ServerMessage::PlaybackStart(_) => server_msg::PLAYBACK_START,
            ServerMessage::PlaybackStop => server_msg::PLAYBACK_STOP,
        }
    }
}

// ── Client → server messages ──────────────────────────────────────────────────

/// Every message this client sends once the channel is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Reply to SET_ACK carrying the server's generation.
    AckSync { generation: u32 },
    /// Acknowledges one full window of received messages.
    Ack,
    /// Reply to PING.
    Pong { id: u32, timestamp: u64 },
    /// The client is closing the channel.
    Disconnecting { time_stamp: u64, reason: u32 },
}

impl ClientMessage {
    /// Returns the wire type id of this message.
    pub fn message_type(&self) -> u16 {
        match self {
            ClientMessage::AckSync { .. } => client_msg::ACK_SYNC,
            ClientMessage::Ack => client_msg::ACK,
            ClientMessage::Pong { .. } => client_msg::PONG,
            ClientMessage::Disconnecting { .. } => client_msg::DISCONNECTING,
        }
    }
}

/// Returns `true` for client message types that answer connection-management
/// traffic.  These are never held back by the acknowledgement window, because
/// the server may be waiting on them before it acknowledges anything.
pub fn is_control_reply(msg_type: u16) -> bool {
    matches!(
        msg_type,
        client_msg::ACK_SYNC | client_msg::ACK | client_msg::PONG
    )
}
