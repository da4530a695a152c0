//! A scripted SPICE server for the integration tests.
//!
//! The helpers produce exactly the bytes a server would send at each stage of
//! the link and decode what the client wrote back.

#![allow(dead_code)]

use spice_client::channel::{
    event_channel, AuthError, Authenticator, Channel, ChannelEvent, ChannelState, ChannelVariant,
    EventReceiver, PlaybackChannel,
};
use spice_client::infrastructure::audio::mock::RecordingSink;
use spice_client::infrastructure::network::mock::MockTransport;
use spice_proto::protocol::{
    common_cap, encode_frame, encode_server_message, AuthMechanism, CapabilitySet, DataHeader,
    HeaderLayout, LinkErrorCode, LinkHeader, LinkReply, ServerMessage, TICKET_PUBKEY_BYTES,
};

/// Bytes of the client's link header plus its link message with one word
/// of common caps and no channel caps.
pub const CLIENT_LINK_LEN: usize = 16 + 18 + 4;

/// Mechanism word plus ticket.
pub const AUTH_PAYLOAD_LEN: usize = 4 + 128;

/// Returns a fixed ticket without any cryptography.
pub struct FixedTicket;

impl Authenticator for FixedTicket {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Spice
    }

    fn ticket(&mut self, _pub_key: &[u8]) -> Result<Vec<u8>, AuthError> {
        Ok(vec![0xA5; 128])
    }
}

pub struct Harness {
    pub channel: Channel,
    pub transport: MockTransport,
    pub events: EventReceiver,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn playback() -> Self {
        let (tx, events) = event_channel();
        let sink = RecordingSink::new();
        let channel = Channel::new(
            7,
            0,
            ChannelVariant::Playback(PlaybackChannel::new(Box::new(sink.clone()))),
            Box::new(FixedTicket),
            tx,
        );
        Self {
            channel,
            transport: MockTransport::new(),
            events,
            sink,
        }
    }

    pub fn with_channel(channel: Channel, events: EventReceiver) -> Self {
        Self {
            channel,
            transport: MockTransport::new(),
            events,
            sink: RecordingSink::new(),
        }
    }

    pub fn connect(&mut self) {
        self.channel
            .connect(Box::new(self.transport.clone()), None)
            .unwrap();
    }

    /// Connects and completes the link with a server offering `server_caps`.
    pub fn connect_to_ready(&mut self, server_caps: &[u32]) {
        self.connect();
        self.transport.push_inbound(server_link(server_caps));
        self.channel.on_readable().unwrap();
        self.transport.push_inbound(link_result(LinkErrorCode::Ok));
        self.channel.on_readable().unwrap();
        assert_eq!(self.channel.state(), ChannelState::Ready);
    }

    /// Delivers server bytes and processes them.
    pub fn deliver(&mut self, bytes: Vec<u8>) -> Result<(), spice_client::ChannelError> {
        self.transport.push_inbound(bytes);
        self.channel.on_readable()
    }

    pub fn drain_events(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Caps a typical server offers.
pub fn server_caps() -> Vec<u32> {
    vec![
        common_cap::AUTH_SELECTION,
        common_cap::AUTH_SPICE,
        common_cap::MINI_HEADER,
    ]
}

pub fn link_reply(error: LinkErrorCode, common: &[u32]) -> Vec<u8> {
    let reply = LinkReply {
        error,
        pub_key: [0x30; TICKET_PUBKEY_BYTES],
        common_caps: CapabilitySet::with_bits(common),
        channel_caps: CapabilitySet::new(),
    }
    .encode();
    let mut out = LinkHeader::new(reply.len() as u32).encode().to_vec();
    out.extend(reply);
    out
}

/// Server link header and an OK link reply.
pub fn server_link(common: &[u32]) -> Vec<u8> {
    link_reply(LinkErrorCode::Ok, common)
}

pub fn link_result(code: LinkErrorCode) -> Vec<u8> {
    code.as_u32().to_le_bytes().to_vec()
}

/// Encodes server messages as consecutive frames.
pub fn frames(layout: HeaderLayout, msgs: &[ServerMessage]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, msg) in msgs.iter().enumerate() {
        out.extend(encode_frame(
            layout,
            i as u64 + 1,
            msg.message_type(),
            &encode_server_message(msg),
        ));
    }
    out
}

/// Splits client output into `(header, body)` pairs.
pub fn client_frames(layout: HeaderLayout, mut bytes: &[u8]) -> Vec<(DataHeader, Vec<u8>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let header = DataHeader::decode(layout, bytes).unwrap();
        let start = layout.size();
        let end = start + header.size as usize;
        out.push((header, bytes[start..end].to_vec()));
        bytes = &bytes[end..];
    }
    out
}

/// The `state` of every `StateChanged` event, in order.
pub fn states(events: &[ChannelEvent]) -> Vec<ChannelState> {
    events
        .iter()
        .filter_map(|e| match e {
            ChannelEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}
