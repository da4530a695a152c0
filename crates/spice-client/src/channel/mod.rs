//! The channel protocol engine.
//!
//! # How a channel runs (for beginners)
//!
//! A [`Channel`] is a *sans-IO* state machine.  It never waits on a socket by
//! itself.  The caller attaches a non-blocking [`Transport`] with
//! [`Channel::connect`] and then calls [`Channel::on_readable`] /
//! [`Channel::on_writable`] whenever the socket becomes ready.  Each call does
//! as much work as the available bytes allow and returns; partially received
//! link headers, link replies, and data frames are kept until the next call.
//!
//! ```text
//!  socket bytes ─► [TLS] ─► link negotiation ─► FrameAssembler ─► MsgIn
//!                                                                  │
//!                               DispatchTable lookup ◄─────────────┘
//!                                      │
//!                     demarshal, then common or variant handler
//!                                      │
//!                      events / sink callbacks / outbound MsgOut
//! ```
//!
//! Any fatal error tears the connection down to `Unconnected`, reports an
//! [`ChannelEvent::Error`] followed by [`ChannelEvent::Disconnected`], and is
//! returned to the caller.  The channel can then be connected again.

pub mod ack;
pub mod auth;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod io;
pub mod link;
pub mod msg_in;
pub mod msg_out;
pub mod playback;
pub mod state;

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use spice_proto::protocol::{
    common_cap, parse_sub_list, AuthMechanism, CapabilitySet, ChannelType, ClientMessage,
    Demarshaller, FrameAssembler, HeaderLayout, LinkErrorCode, Marshaller, ProtocolError,
    SpiceCodec,
};
use tracing::{debug, error, info, warn};

pub use self::auth::{AuthError, Authenticator};
pub use self::core::ChannelCore;
pub use self::dispatch::{DispatchTable, Handler};
pub use self::error::{ChannelError, ErrorClass};
pub use self::event::{event_channel, ChannelEvent, EventReceiver, EventSender};
pub use self::io::{TlsError, TlsSession, Transport};
pub use self::link::NegotiatedCaps;
pub use self::msg_in::MsgIn;
pub use self::msg_out::MsgOut;
pub use self::playback::{PlaybackChannel, PlaybackSink, SinkError};
pub use self::state::ChannelState;

use self::io::TransportIo;
use self::link::LinkNegotiator;

const READ_CHUNK: usize = 16 * 1024;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Immutable identity of a channel within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelIdentity {
    pub connection_id: u32,
    pub channel_type: ChannelType,
    pub channel_id: u8,
}

impl ChannelIdentity {
    pub const fn new(connection_id: u32, channel_type: ChannelType, channel_id: u8) -> Self {
        Self {
            connection_id,
            channel_type,
            channel_id,
        }
    }
}

impl fmt::Display for ChannelIdentity {
    /// `playback-5:0`: type name, type number, channel id.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}",
            self.channel_type.name(),
            self.channel_type as u8,
            self.channel_id
        )
    }
}

// ── Channel variants ──────────────────────────────────────────────────────────

/// The closed set of channel behaviours, chosen at construction.
pub enum ChannelVariant {
    /// Audio playback with its own handlers.
    Playback(PlaybackChannel),
    /// Any other channel type: shares the engine and the common handlers only.
    Passive(ChannelType),
}

impl ChannelVariant {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelVariant::Playback(_) => ChannelType::Playback,
            ChannelVariant::Passive(channel_type) => *channel_type,
        }
    }
}

impl fmt::Debug for ChannelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelVariant::Playback(p) => write!(f, "Playback(mode {:?})", p.mode()),
            ChannelVariant::Passive(t) => write!(f, "Passive({t:?})"),
        }
    }
}

/// Common capabilities this client advertises on every link.
pub fn default_common_caps() -> CapabilitySet {
    CapabilitySet::with_bits(&[
        common_cap::AUTH_SELECTION,
        common_cap::AUTH_SPICE,
        common_cap::MINI_HEADER,
    ])
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// One sub-channel connection: state machine, transport, and handlers.
pub struct Channel {
    core: ChannelCore,
    state: ChannelState,
    variant: ChannelVariant,
    table: DispatchTable,
    demarshaller: Arc<dyn Demarshaller>,
    authenticator: Box<dyn Authenticator>,
    common_caps: CapabilitySet,
    channel_caps: CapabilitySet,
    transport: Option<Box<dyn Transport>>,
    tls: Option<Box<dyn TlsSession>>,
    link: Option<LinkNegotiator>,
    /// Bytes received but not yet consumed by the current state.
    inbound: BytesMut,
    assembler: FrameAssembler,
}

impl Channel {
    /// Creates an unconnected channel using the built-in codec.
    pub fn new(
        connection_id: u32,
        channel_id: u8,
        variant: ChannelVariant,
        authenticator: Box<dyn Authenticator>,
        events: EventSender,
    ) -> Self {
        let codec = Arc::new(SpiceCodec::new(variant.channel_type()));
        Self::with_codec(
            connection_id,
            channel_id,
            variant,
            authenticator,
            events,
            codec.clone(),
            codec,
        )
    }

    /// Creates an unconnected channel with caller-supplied codecs.
    pub fn with_codec(
        connection_id: u32,
        channel_id: u8,
        variant: ChannelVariant,
        authenticator: Box<dyn Authenticator>,
        events: EventSender,
        demarshaller: Arc<dyn Demarshaller>,
        marshaller: Arc<dyn Marshaller>,
    ) -> Self {
        let channel_type = variant.channel_type();
        let identity = ChannelIdentity::new(connection_id, channel_type, channel_id);
        Self {
            core: ChannelCore::new(identity, marshaller, events),
            state: ChannelState::Unconnected,
            table: DispatchTable::for_channel(channel_type),
            variant,
            demarshaller,
            authenticator,
            common_caps: default_common_caps(),
            // The playback channel decodes no compressed modes, so it
            // advertises no channel capabilities.
            channel_caps: CapabilitySet::new(),
            transport: None,
            tls: None,
            link: None,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            assembler: FrameAssembler::new(HeaderLayout::Full),
        }
    }

    /// Replaces the common capabilities advertised on the next link.
    pub fn with_common_caps(mut self, caps: CapabilitySet) -> Self {
        self.common_caps = caps;
        self
    }

    pub fn identity(&self) -> ChannelIdentity {
        self.core.identity()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn core(&self) -> &ChannelCore {
        &self.core
    }

    pub fn variant(&self) -> &ChannelVariant {
        &self.variant
    }

    /// Bytes of the peer's link reply consumed so far, during negotiation.
    pub fn link_progress(&self) -> Option<usize> {
        self.link.as_ref().map(LinkNegotiator::peer_pos)
    }

    /// `true` when bytes are waiting for the transport to become writable.
    pub fn wants_write(&self) -> bool {
        !self.core.outgoing().is_empty() || self.tls.as_ref().is_some_and(|tls| tls.wants_write())
    }

    // ── Driving the state machine ─────────────────────────────────────────────

    /// Attaches a transport and starts negotiation: TLS first when a session
    /// is given, otherwise straight to the link header.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidState`] if already connected; any failure while
    /// writing the first bytes (the channel is reset in that case).
    pub fn connect(
        &mut self,
        transport: Box<dyn Transport>,
        tls: Option<Box<dyn TlsSession>>,
    ) -> Result<(), ChannelError> {
        if self.state != ChannelState::Unconnected {
            return Err(ChannelError::InvalidState(self.state));
        }
        info!("{}: connecting{}", self.identity(), if tls.is_some() { " (TLS)" } else { "" });
        self.transport = Some(transport);
        self.tls = tls;
        self.core.emit(ChannelEvent::Connected(self.identity()));
        let result = self.start();
        self.guard(result)
    }

    /// Processes whatever the transport has to offer.
    ///
    /// # Errors
    ///
    /// Any fatal error; the channel is back in `Unconnected` when one is returned.
    pub fn on_readable(&mut self) -> Result<(), ChannelError> {
        if self.state == ChannelState::Unconnected {
            return Ok(());
        }
        let result = self.handle_readable();
        self.guard(result)
    }

    /// Writes pending bytes.
    ///
    /// # Errors
    ///
    /// Transport failures; the channel is reset when one is returned.
    pub fn on_writable(&mut self) -> Result<(), ChannelError> {
        if self.state == ChannelState::Unconnected {
            return Ok(());
        }
        let result = self.flush();
        self.guard(result)
    }

    /// Sends a typed message.  Before `Ready` the message waits for the link
    /// to complete; afterwards it is subject to the ack window.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidState`] when unconnected, or a fatal send error.
    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), ChannelError> {
        if self.state == ChannelState::Unconnected {
            return Err(ChannelError::InvalidState(self.state));
        }
        let result = self.core.send(msg).and_then(|()| self.flush());
        self.guard(result)
    }

    /// Sends a pre-built message.  See [`Channel::send`].
    ///
    /// # Errors
    ///
    /// As for [`Channel::send`].
    pub fn submit(&mut self, msg: MsgOut) -> Result<(), ChannelError> {
        if self.state == ChannelState::Unconnected {
            return Err(ChannelError::InvalidState(self.state));
        }
        self.core.submit(msg);
        let result = self.flush();
        self.guard(result)
    }

    /// Closes the connection without reporting an error.
    pub fn disconnect(&mut self) {
        if self.state != ChannelState::Unconnected {
            info!("{}: disconnecting", self.identity());
            self.teardown();
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn start(&mut self) -> Result<(), ChannelError> {
        if self.tls.is_some() {
            self.set_state(ChannelState::Tls)?;
        } else {
            self.enter_link()?;
        }
        self.flush()
    }

    fn handle_readable(&mut self) -> Result<(), ChannelError> {
        let eof = self.read_available()?;
        self.process_inbound()?;
        self.flush()?;
        if eof {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// Moves every byte the transport has into `inbound`.  Returns `true` at
    /// end of stream.
    fn read_available(&mut self) -> Result<bool, ChannelError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ChannelError::InvalidState(self.state));
        };
        let mut buf = [0u8; READ_CHUNK];

        let Some(tls) = self.tls.as_mut() else {
            return read_plain(transport.as_mut(), &mut buf, &mut self.inbound);
        };

        // The session buffers a bounded amount of plaintext, so it is drained
        // after every batch of records rather than once at the end.
        let mut eof = drain_plaintext(tls.as_mut(), &mut buf, &mut self.inbound)?;
        while !eof {
            match tls.read_tls(&mut TransportIo(transport.as_mut())) {
                Ok(0) => eof = true,
                Ok(_) => {
                    tls.process_new_packets()?;
                    eof = drain_plaintext(tls.as_mut(), &mut buf, &mut self.inbound)?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(eof)
    }

    /// Advances the state machine as far as the buffered bytes allow.
    fn process_inbound(&mut self) -> Result<(), ChannelError> {
        loop {
            match self.state {
                ChannelState::Unconnected => return Ok(()),
                ChannelState::Tls => {
                    if self.tls.as_ref().is_some_and(|tls| tls.is_handshaking()) {
                        return Ok(());
                    }
                    debug!("{}: TLS handshake complete", self.identity());
                    self.enter_link()?;
                }
                ChannelState::LinkHdr => {
                    let link = self
                        .link
                        .as_mut()
                        .ok_or(ChannelError::InvalidState(self.state))?;
                    let Some(header) = link.feed_header(&mut self.inbound)? else {
                        return Ok(());
                    };
                    if header.minor_version != spice_proto::protocol::VERSION_MINOR {
                        debug!(
                            "{}: peer speaks protocol {}.{}",
                            self.identity(),
                            header.major_version,
                            header.minor_version
                        );
                    }
                    self.set_state(ChannelState::LinkMsg)?;
                }
                ChannelState::LinkMsg => {
                    let link = self
                        .link
                        .as_mut()
                        .ok_or(ChannelError::InvalidState(self.state))?;
                    if link.feed_reply(&mut self.inbound)?.is_none() {
                        return Ok(());
                    }
                    self.authenticate()?;
                    self.set_state(ChannelState::Auth)?;
                }
                ChannelState::Auth => {
                    let link = self
                        .link
                        .as_mut()
                        .ok_or(ChannelError::InvalidState(self.state))?;
                    match link.feed_link_result(&mut self.inbound) {
                        None => return Ok(()),
                        Some(LinkErrorCode::Ok) => self.enter_ready()?,
                        Some(LinkErrorCode::PermissionDenied) => {
                            return Err(AuthError::PermissionDenied.into())
                        }
                        Some(code) => return Err(ProtocolError::LinkRejected(code).into()),
                    }
                }
                ChannelState::Ready => return self.process_frames(),
            }
        }
    }

    fn enter_link(&mut self) -> Result<(), ChannelError> {
        self.set_state(ChannelState::LinkHdr)?;
        let link = LinkNegotiator::new(
            self.identity(),
            self.common_caps.clone(),
            self.channel_caps.clone(),
        );
        self.core.write_raw(&link.client_link());
        self.link = Some(link);
        Ok(())
    }

    /// Freezes capabilities and writes the authentication payload.
    fn authenticate(&mut self) -> Result<(), ChannelError> {
        let link = self
            .link
            .as_ref()
            .ok_or(ChannelError::InvalidState(self.state))?;
        let (Some(reply), Some(caps)) = (link.peer_reply(), link.negotiated_caps()) else {
            return Err(ChannelError::InvalidState(self.state));
        };

        let mechanism = self.authenticator.mechanism();
        let mut payload = Vec::new();
        if reply.common_caps.has(common_cap::AUTH_SELECTION) {
            let required = match mechanism {
                AuthMechanism::Spice => common_cap::AUTH_SPICE,
                AuthMechanism::Sasl => common_cap::AUTH_SASL,
            };
            if !reply.common_caps.has(required) {
                return Err(AuthError::NoCommonMechanism.into());
            }
            payload.extend_from_slice(&(mechanism as u32).to_le_bytes());
        } else if mechanism != AuthMechanism::Spice {
            return Err(AuthError::NoCommonMechanism.into());
        }
        payload.extend(self.authenticator.ticket(&reply.pub_key)?);

        debug!("{}: authenticating with {:?}", self.core.identity(), mechanism);
        self.core.freeze_caps(caps);
        self.core.write_raw(&payload);
        Ok(())
    }

    fn enter_ready(&mut self) -> Result<(), ChannelError> {
        let peer_minor = self
            .link
            .as_ref()
            .and_then(LinkNegotiator::peer_header)
            .map_or(spice_proto::protocol::VERSION_MINOR, |h| h.minor_version);
        self.set_state(ChannelState::Ready)?;
        self.assembler.reset();
        self.assembler.set_layout(self.core.layout());
        self.core.on_ready(peer_minor);
        info!(
            "{}: ready ({:?} headers)",
            self.identity(),
            self.core.layout()
        );
        self.core.emit(ChannelEvent::Ready(self.identity()));
        Ok(())
    }

    /// Splits buffered bytes into frames and dispatches each, sub-messages
    /// first.
    fn process_frames(&mut self) -> Result<(), ChannelError> {
        if !self.inbound.is_empty() {
            let bytes = self.inbound.split();
            self.assembler.extend(&bytes);
        }
        while let Some(frame) = self.assembler.next_frame()? {
            let sub_list = frame.header.sub_list;
            let msg = MsgIn::new(self.identity(), frame.header, frame.body);
            msg.hexdump();
            if sub_list != 0 {
                for sub in parse_sub_list(msg.raw(), sub_list)? {
                    let sub_msg = MsgIn::sub_new(&msg, &sub)?;
                    self.dispatch(&sub_msg)?;
                }
            }
            self.dispatch(&msg)?;
            self.core.on_message_received()?;
        }
        Ok(())
    }

    /// Looks up, parses, and runs the handler for one message.
    fn dispatch(&mut self, msg: &MsgIn) -> Result<(), ChannelError> {
        let Some(handler) = self.table.lookup(msg.msg_type()) else {
            return Err(ProtocolError::UnknownMessageType(msg.msg_type()).into());
        };
        let record = self
            .demarshaller
            .parse(msg.msg_type(), self.core.peer_minor(), msg.raw())?;
        // A message is dispatched once, so the slot is always empty here.
        let _ = msg.attach_parsed(record);

        match handler {
            Handler::Common(handle) => handle(&mut self.core, msg),
            Handler::Playback(handle) => match &mut self.variant {
                ChannelVariant::Playback(playback) => handle(playback, msg),
                ChannelVariant::Passive(_) => Err(ChannelError::HandlerMismatch {
                    channel_type: "playback",
                    msg_type: msg.msg_type(),
                }),
            },
        }
    }

    /// Writes pending bytes until the transport would block.
    fn flush(&mut self) -> Result<(), ChannelError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };

        let Some(tls) = self.tls.as_mut() else {
            while !self.core.outgoing().is_empty() {
                match transport.write(self.core.outgoing()) {
                    Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                    Ok(n) => self.core.consume_outgoing(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(());
        };

        if !tls.is_handshaking() && !self.core.outgoing().is_empty() {
            let n = tls.write_plaintext(self.core.outgoing())?;
            self.core.consume_outgoing(n);
        }
        while tls.wants_write() {
            match tls.write_tls(&mut TransportIo(transport.as_mut())) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn set_state(&mut self, next: ChannelState) -> Result<(), ChannelError> {
        if !self.state.can_advance_to(next) {
            return Err(ChannelError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("{}: {} -> {}", self.identity(), self.state, next);
        self.state = next;
        self.core.emit(ChannelEvent::StateChanged {
            channel: self.identity(),
            state: next,
        });
        Ok(())
    }

    /// Tears the connection down on a fatal error and hands the error back.
    fn guard(&mut self, result: Result<(), ChannelError>) -> Result<(), ChannelError> {
        let Err(err) = result else {
            return Ok(());
        };
        if self.state == ChannelState::Unconnected && matches!(err, ChannelError::InvalidState(_)) {
            return Err(err);
        }
        match err.class() {
            ErrorClass::Transport => warn!("{}: {err}", self.identity()),
            ErrorClass::Protocol | ErrorClass::Authentication => {
                error!("{}: {err}", self.identity())
            }
        }
        self.core.emit(ChannelEvent::Error {
            channel: self.identity(),
            class: err.class(),
            message: err.to_string(),
        });
        self.teardown();
        Err(err)
    }

    /// Returns to `Unconnected`, releasing the transport and every buffer
    /// tied to this connection.
    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.tls = None;
        self.link = None;
        self.inbound.clear();
        self.assembler.reset();
        self.core.reset();
        if self.state != ChannelState::Unconnected {
            // Reset is legal from every state.
            let _ = self.set_state(ChannelState::Unconnected);
            self.core.emit(ChannelEvent::Disconnected(self.identity()));
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("identity", &self.identity())
            .field("state", &self.state)
            .field("variant", &self.variant)
            .finish()
    }
}

fn read_plain(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    inbound: &mut BytesMut,
) -> Result<bool, ChannelError> {
    loop {
        match transport.read(buf) {
            Ok(0) => return Ok(true),
            Ok(n) => inbound.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Moves decrypted bytes into `inbound` until the session has none left.
/// Returns `true` when the peer closed the TLS stream.
fn drain_plaintext(
    tls: &mut dyn TlsSession,
    buf: &mut [u8],
    inbound: &mut BytesMut,
) -> Result<bool, ChannelError> {
    if tls.is_handshaking() {
        return Ok(false);
    }
    loop {
        match tls.read_plaintext(buf) {
            Ok(0) => return Ok(true),
            Ok(n) => inbound.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}
