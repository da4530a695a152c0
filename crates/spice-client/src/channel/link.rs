//! Resumable link negotiation.
//!
//! The peer's link header, link reply, and link result can each arrive split
//! over any number of reads.  [`LinkNegotiator`] keeps "consumed N of M" state
//! for each of them, so the channel can feed it whatever bytes a readable
//! notification produced and call again later.

use bytes::{Buf, BytesMut};
use spice_proto::protocol::{
    common_cap, CapabilitySet, HeaderLayout, LinkErrorCode, LinkHeader, LinkMess, LinkReply,
    ProtocolError, LINK_HEADER_SIZE, LINK_MAGIC, LINK_REPLY_SIZE,
};

use crate::channel::ChannelIdentity;

/// Largest link reply accepted; capability lists are a handful of words.
pub const MAX_LINK_REPLY_SIZE: u32 = 4096;

/// Capability sets agreed with the peer.  Frozen once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCaps {
    pub common: CapabilitySet,
    pub channel: CapabilitySet,
}

impl NegotiatedCaps {
    /// Data header layout both sides can use.
    pub fn header_layout(&self) -> HeaderLayout {
        if self.common.has(common_cap::MINI_HEADER) {
            HeaderLayout::Mini
        } else {
            HeaderLayout::Full
        }
    }
}

/// Link negotiation scratch state for one connection attempt.
#[derive(Debug)]
pub struct LinkNegotiator {
    local_header: LinkHeader,
    local_mess: LinkMess,

    peer_header_buf: [u8; LINK_HEADER_SIZE],
    header_pos: usize,
    peer_header: Option<LinkHeader>,

    peer_reply_buf: Vec<u8>,
    /// Bytes of the link reply received so far.
    peer_pos: usize,
    peer_reply: Option<LinkReply>,

    result_buf: [u8; 4],
    result_pos: usize,
}

impl LinkNegotiator {
    /// Prepares the local link header and message for `identity`.
    pub fn new(
        identity: ChannelIdentity,
        common_caps: CapabilitySet,
        channel_caps: CapabilitySet,
    ) -> Self {
        let local_mess = LinkMess {
            connection_id: identity.connection_id,
            channel_type: identity.channel_type as u8,
            channel_id: identity.channel_id,
            common_caps,
            channel_caps,
        };
        Self {
            local_header: LinkHeader::new(local_mess.encoded_len() as u32),
            local_mess,
            peer_header_buf: [0; LINK_HEADER_SIZE],
            header_pos: 0,
            peer_header: None,
            peer_reply_buf: Vec::new(),
            peer_pos: 0,
            peer_reply: None,
            result_buf: [0; 4],
            result_pos: 0,
        }
    }

    /// Local link header followed by the link message, ready for the wire.
    pub fn client_link(&self) -> Vec<u8> {
        let mut out = self.local_header.encode().to_vec();
        out.extend(self.local_mess.encode());
        out
    }

    pub fn local_mess(&self) -> &LinkMess {
        &self.local_mess
    }

    pub fn peer_header(&self) -> Option<&LinkHeader> {
        self.peer_header.as_ref()
    }

    pub fn peer_reply(&self) -> Option<&LinkReply> {
        self.peer_reply.as_ref()
    }

    /// Bytes of the peer link reply consumed so far.
    pub fn peer_pos(&self) -> usize {
        self.peer_pos
    }

    /// Consumes bytes of the peer link header from `input`.
    ///
    /// Returns the header once all 16 bytes are in and it validates.
    ///
    /// # Errors
    ///
    /// Wrong magic, major version mismatch, or an implausible reply size.
    pub fn feed_header(&mut self, input: &mut BytesMut) -> Result<Option<LinkHeader>, ProtocolError> {
        if self.peer_header.is_some() {
            return Ok(self.peer_header);
        }
        self.header_pos += take_into(&mut self.peer_header_buf[self.header_pos..], input);
        if self.header_pos < LINK_HEADER_SIZE {
            return Ok(None);
        }

        let header = LinkHeader::decode(&self.peer_header_buf)?;
        header.validate()?;
        if header.size < LINK_REPLY_SIZE as u32 || header.size > MAX_LINK_REPLY_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "link reply size {} outside {}..={}",
                header.size, LINK_REPLY_SIZE, MAX_LINK_REPLY_SIZE
            )));
        }
        self.peer_reply_buf = vec![0; header.size as usize];
        self.peer_header = Some(header);
        Ok(Some(header))
    }

    /// Consumes bytes of the peer link reply from `input`.
    ///
    /// Returns the reply once `size` bytes have been read.
    ///
    /// # Errors
    ///
    /// A malformed reply, a second link header in place of the reply, or a
    /// reply carrying a non-OK link error.
    pub fn feed_reply(&mut self, input: &mut BytesMut) -> Result<Option<&LinkReply>, ProtocolError> {
        if self.peer_reply.is_none() {
            self.peer_pos += take_into(&mut self.peer_reply_buf[self.peer_pos..], input);
            if self.peer_pos >= 4 && self.peer_reply_buf[..4] == LINK_MAGIC.to_le_bytes() {
                return Err(ProtocolError::MalformedPayload(
                    "link header repeated where the link reply was expected".into(),
                ));
            }
            if self.peer_pos < self.peer_reply_buf.len() {
                return Ok(None);
            }
            let reply = LinkReply::decode(&self.peer_reply_buf)?;
            if reply.error != LinkErrorCode::Ok {
                return Err(ProtocolError::LinkRejected(reply.error));
            }
            self.peer_reply = Some(reply);
        }
        Ok(self.peer_reply.as_ref())
    }

    /// Intersects local and peer capabilities.  Only valid after the reply.
    pub fn negotiated_caps(&self) -> Option<NegotiatedCaps> {
        let reply = self.peer_reply.as_ref()?;
        Some(NegotiatedCaps {
            common: self.local_mess.common_caps.intersection(&reply.common_caps),
            channel: self.local_mess.channel_caps.intersection(&reply.channel_caps),
        })
    }

    /// Consumes bytes of the 4-byte link result that follows authentication.
    pub fn feed_link_result(&mut self, input: &mut BytesMut) -> Option<LinkErrorCode> {
        self.result_pos += take_into(&mut self.result_buf[self.result_pos..], input);
        if self.result_pos < self.result_buf.len() {
            return None;
        }
        Some(LinkErrorCode::from(u32::from_le_bytes(self.result_buf)))
    }
}

/// Moves as many bytes as fit from the front of `input` into `dst`.
fn take_into(dst: &mut [u8], input: &mut BytesMut) -> usize {
    let n = dst.len().min(input.len());
    dst[..n].copy_from_slice(&input[..n]);
    input.advance(n);
    n
}

#[cfg(test)]
mod tests {
    use spice_proto::protocol::{ChannelType, TICKET_PUBKEY_BYTES};

    use super::*;

    fn negotiator() -> LinkNegotiator {
        LinkNegotiator::new(
            ChannelIdentity::new(42, ChannelType::Playback, 0),
            CapabilitySet::with_bits(&[
                common_cap::AUTH_SELECTION,
                common_cap::AUTH_SPICE,
                common_cap::MINI_HEADER,
            ]),
            CapabilitySet::new(),
        )
    }

    fn server_link(common: &[u32]) -> Vec<u8> {
        let reply = LinkReply {
            error: LinkErrorCode::Ok,
            pub_key: [1; TICKET_PUBKEY_BYTES],
            common_caps: CapabilitySet::with_bits(common),
            channel_caps: CapabilitySet::with_bits(&[0, 3]),
        }
        .encode();
        let mut out = LinkHeader::new(reply.len() as u32).encode().to_vec();
        out.extend(reply);
        out
    }

    #[test]
    fn test_repeated_link_header_is_rejected_as_reply() {
        // Arrange
        let mut link = negotiator();
        let server = server_link(&[common_cap::MINI_HEADER]);
        let mut input = BytesMut::from(&server[..LINK_HEADER_SIZE]);
        input.extend_from_slice(&server[..LINK_HEADER_SIZE]);
        link.feed_header(&mut input).unwrap();

        // Act
        let result = link.feed_reply(&mut input);

        // Assert
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
        assert!(link.peer_reply().is_none());
    }

    #[test]
    fn test_client_link_announces_identity() {
        let bytes = negotiator().client_link();
        let header = LinkHeader::decode(&bytes).unwrap();
        let mess = LinkMess::decode(&bytes[16..]).unwrap();

        assert_eq!(header.size as usize, bytes.len() - 16);
        assert_eq!(mess.connection_id, 42);
        assert_eq!(mess.channel_type, ChannelType::Playback as u8);
    }

    #[test]
    fn test_reply_split_at_every_offset() {
        let stream = server_link(&[common_cap::AUTH_SPICE]);
        for split in 1..stream.len() {
            // Arrange
            let mut link = negotiator();
            let mut first = BytesMut::from(&stream[..split]);
            let mut second = BytesMut::from(&stream[split..]);

            // Act
            let mut header = link.feed_header(&mut first).unwrap();
            if header.is_none() {
                header = link.feed_header(&mut second).unwrap();
            }
            assert!(header.is_some(), "split {split}");
            let early = link.feed_reply(&mut first).unwrap().is_some();
            let complete = early || link.feed_reply(&mut second).unwrap().is_some();

            // Assert
            assert!(complete, "split {split}");
            assert_eq!(link.peer_pos(), stream.len() - 16);
            assert!(first.is_empty() && second.is_empty());
        }
    }

    #[test]
    fn test_negotiated_caps_are_the_intersection() {
        // Arrange
        let mut link = negotiator();
        let mut input = BytesMut::from(&server_link(&[common_cap::AUTH_SPICE])[..]);

        // Act
        link.feed_header(&mut input).unwrap();
        link.feed_reply(&mut input).unwrap();
        let caps = link.negotiated_caps().unwrap();

        // Assert
        assert!(caps.common.has(common_cap::AUTH_SPICE));
        assert!(!caps.common.has(common_cap::MINI_HEADER));
        assert_eq!(caps.header_layout(), HeaderLayout::Full);
        assert!(!caps.channel.has(3), "local side advertises no channel caps");
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut link = negotiator();
        let mut input = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(matches!(
            link.feed_header(&mut input),
            Err(ProtocolError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_link_error_in_reply_is_rejected() {
        // Arrange
        let reply = LinkReply {
            error: LinkErrorCode::NeedSecured,
            pub_key: [0; TICKET_PUBKEY_BYTES],
            common_caps: CapabilitySet::new(),
            channel_caps: CapabilitySet::new(),
        }
        .encode();
        let mut input = BytesMut::from(&LinkHeader::new(reply.len() as u32).encode()[..]);
        input.extend_from_slice(&reply);
        let mut link = negotiator();

        // Act
        link.feed_header(&mut input).unwrap();
        let result = link.feed_reply(&mut input);

        // Assert
        assert_eq!(
            result.map(|r| r.cloned()),
            Err(ProtocolError::LinkRejected(LinkErrorCode::NeedSecured))
        );
    }

    #[test]
    fn test_link_result_may_arrive_bytewise() {
        let mut link = negotiator();
        for (i, byte) in 7u32.to_le_bytes().iter().enumerate() {
            let mut input = BytesMut::from(&[*byte][..]);
            let result = link.feed_link_result(&mut input);
            if i < 3 {
                assert!(result.is_none());
            } else {
                assert_eq!(result, Some(LinkErrorCode::PermissionDenied));
            }
        }
    }
}
