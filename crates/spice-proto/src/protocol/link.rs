//! Link negotiation records: the link header, the client link message, and the
//! server link reply.
//!
//! # The link exchange (for beginners)
//!
//! Before any data message flows, each side sends a 16-byte *link header*
//! followed by a variable-size body:
//!
//! ```text
//! client                                server
//!   │ LinkHeader(size = 18 + caps)        │
//!   │ LinkMess { conn id, type, id, caps }│
//!   │────────────────────────────────────►│
//!   │        LinkHeader(size = 178 + caps)│
//!   │        LinkReply { error, key, caps}│
//!   │◄────────────────────────────────────│
//! ```
//!
//! The header's `size` field tells the reader how many body bytes follow, so
//! the reply can be consumed incrementally even though its capability lists
//! have variable length.

use crate::protocol::caps::CapabilitySet;
use crate::protocol::codec::{read_u32, require_len, ProtocolError};
use crate::protocol::messages::{
    LinkErrorCode, LINK_HEADER_SIZE, LINK_MAGIC, LINK_MESS_SIZE, LINK_REPLY_SIZE,
    TICKET_PUBKEY_BYTES, VERSION_MAJOR, VERSION_MINOR,
};

/// The fixed 16-byte header that precedes both link bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    /// Size of the link body that follows.
    pub size: u32,
}

impl LinkHeader {
    /// Creates a header announcing a body of `size` bytes at this client's
    /// protocol version.
    pub fn new(size: u32) -> Self {
        Self {
            magic: LINK_MAGIC,
            major_version: VERSION_MAJOR,
            minor_version: VERSION_MINOR,
            size,
        }
    }

    pub fn encode(&self) -> [u8; LINK_HEADER_SIZE] {
        let mut buf = [0u8; LINK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.major_version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decodes a header without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if fewer than 16 bytes are given.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < LINK_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: LINK_HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            magic: read_u32(buf, 0)?,
            major_version: read_u32(buf, 4)?,
            minor_version: read_u32(buf, 8)?,
            size: read_u32(buf, 12)?,
        })
    }

    /// Checks magic and major version.  A different minor version is accepted;
    /// the codec is told which minor the peer speaks.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidMagic`] or [`ProtocolError::UnsupportedVersion`].
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != LINK_MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        if self.major_version != VERSION_MAJOR {
            return Err(ProtocolError::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
            });
        }
        Ok(())
    }
}

/// The client's link body: who it is and what it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMess {
    /// 0 for the main channel of a new session; the session id otherwise.
    pub connection_id: u32,
    pub channel_type: u8,
    pub channel_id: u8,
    pub common_caps: CapabilitySet,
    pub channel_caps: CapabilitySet,
}

impl LinkMess {
    /// Size of the encoded body including capability words.
    pub fn encoded_len(&self) -> usize {
        LINK_MESS_SIZE
            + 4 * (self.common_caps.words().len() + self.channel_caps.words().len())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.connection_id.to_le_bytes());
        buf.push(self.channel_type);
        buf.push(self.channel_id);
        buf.extend_from_slice(&self.common_caps.word_count().to_le_bytes());
        buf.extend_from_slice(&self.channel_caps.word_count().to_le_bytes());
        buf.extend_from_slice(&(LINK_MESS_SIZE as u32).to_le_bytes());
        for word in self.common_caps.words().iter().chain(self.channel_caps.words()) {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decodes a link message, as a server would.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the body or the
    /// capability lists are truncated.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        require_len(buf, LINK_MESS_SIZE, "LinkMess")?;
        let num_common = read_u32(buf, 6)? as usize;
        let num_channel = read_u32(buf, 10)? as usize;
        let caps_offset = read_u32(buf, 14)? as usize;
        let (common_caps, channel_caps) =
            read_caps(buf, caps_offset, num_common, num_channel, "LinkMess caps")?;
        Ok(Self {
            connection_id: read_u32(buf, 0)?,
            channel_type: buf[4],
            channel_id: buf[5],
            common_caps,
            channel_caps,
        })
    }
}

/// The server's link body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReply {
    pub error: LinkErrorCode,
    /// DER-encoded RSA public key used to encrypt the ticket.
    pub pub_key: [u8; TICKET_PUBKEY_BYTES],
    pub common_caps: CapabilitySet,
    pub channel_caps: CapabilitySet,
}

impl LinkReply {
    /// Decodes a complete link reply body (the `size` bytes announced by the
    /// server's link header).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the fixed part or a
    /// capability list lies outside `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        require_len(buf, LINK_REPLY_SIZE, "LinkReply")?;
        let mut pub_key = [0u8; TICKET_PUBKEY_BYTES];
        pub_key.copy_from_slice(&buf[4..4 + TICKET_PUBKEY_BYTES]);

        let fixed = 4 + TICKET_PUBKEY_BYTES;
        let num_common = read_u32(buf, fixed)? as usize;
        let num_channel = read_u32(buf, fixed + 4)? as usize;
        let caps_offset = read_u32(buf, fixed + 8)? as usize;
        let (common_caps, channel_caps) =
            read_caps(buf, caps_offset, num_common, num_channel, "LinkReply caps")?;

        Ok(Self {
            error: LinkErrorCode::from(read_u32(buf, 0)?),
            pub_key,
            common_caps,
            channel_caps,
        })
    }

    /// Encodes the reply body, as a server would.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            LINK_REPLY_SIZE
                + 4 * (self.common_caps.words().len() + self.channel_caps.words().len()),
        );
        buf.extend_from_slice(&self.error.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.pub_key);
        buf.extend_from_slice(&self.common_caps.word_count().to_le_bytes());
        buf.extend_from_slice(&self.channel_caps.word_count().to_le_bytes());
        buf.extend_from_slice(&(LINK_REPLY_SIZE as u32).to_le_bytes());
        for word in self.common_caps.words().iter().chain(self.channel_caps.words()) {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }
}

fn read_caps(
    buf: &[u8],
    offset: usize,
    num_common: usize,
    num_channel: usize,
    context: &str,
) -> Result<(CapabilitySet, CapabilitySet), ProtocolError> {
    let end = num_common
        .checked_add(num_channel)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| ProtocolError::MalformedPayload(format!("{context}: count overflow")))?;
    require_len(buf, end, context)?;

    let mut words = Vec::with_capacity(num_common + num_channel);
    for i in 0..num_common + num_channel {
        words.push(read_u32(buf, offset + i * 4)?);
    }
    let channel = words.split_off(num_common);
    Ok((CapabilitySet::from_words(words), CapabilitySet::from_words(channel)))
}
