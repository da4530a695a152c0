//! Message dispatch: type id → handler.
//!
//! Every channel type gets a [`DispatchTable`] built once at construction.
//! The shared connection-management ids are registered for all of them; a
//! channel variant adds its own ids on top.  The table is consulted *before*
//! a body is parsed, so an id with no entry never reaches the demarshaller.

use std::collections::HashMap;

use spice_proto::protocol::{server_msg, ChannelType, ClientMessage, NotifySeverity, ServerMessage};
use tracing::{debug, error, info, warn};

use crate::channel::core::ChannelCore;
use crate::channel::error::ChannelError;
use crate::channel::event::ChannelEvent;
use crate::channel::msg_in::MsgIn;
use crate::channel::playback::PlaybackChannel;

/// Handler for a message every channel type understands.
pub type CommonHandler = fn(&mut ChannelCore, &MsgIn) -> Result<(), ChannelError>;

/// Handler for a playback channel message.
pub type PlaybackHandler = fn(&mut PlaybackChannel, &MsgIn) -> Result<(), ChannelError>;

/// A registered handler, tagged with the state it operates on.
#[derive(Clone, Copy)]
pub enum Handler {
    Common(CommonHandler),
    Playback(PlaybackHandler),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Common(_) => f.write_str("Handler::Common"),
            Handler::Playback(_) => f.write_str("Handler::Playback"),
        }
    }
}

/// Handler lookup for one channel type.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<u16, Handler>,
}

impl DispatchTable {
    /// A table with only the shared connection-management handlers.
    pub fn common() -> Self {
        let mut table = Self::default();
        table.register(server_msg::SET_ACK, Handler::Common(handle_set_ack));
        table.register(server_msg::PING, Handler::Common(handle_ping));
        table.register(server_msg::NOTIFY, Handler::Common(handle_notify));
        table.register(server_msg::DISCONNECTING, Handler::Common(handle_disconnecting));
        table.register(
            server_msg::WAIT_FOR_CHANNELS,
            Handler::Common(handle_wait_for_channels),
        );
        table.register(server_msg::MIGRATE, Handler::Common(handle_migrate));
        table
    }

    /// The full table for `channel_type`.
    pub fn for_channel(channel_type: ChannelType) -> Self {
        let mut table = Self::common();
        if channel_type == ChannelType::Playback {
            PlaybackChannel::register_handlers(&mut table);
        }
        table
    }

    /// Adds or replaces the handler for `msg_type`.
    pub fn register(&mut self, msg_type: u16, handler: Handler) {
        self.entries.insert(msg_type, handler);
    }

    pub fn lookup(&self, msg_type: u16) -> Option<Handler> {
        self.entries.get(&msg_type).copied()
    }

    pub fn contains(&self, msg_type: u16) -> bool {
        self.entries.contains_key(&msg_type)
    }
}

/// Returns the typed record attached to `msg`.
///
/// # Errors
///
/// A handler was reached without a parse, which the dispatcher never allows.
pub(crate) fn parsed(msg: &MsgIn) -> Result<&ServerMessage, ChannelError> {
    msg.parsed()
        .ok_or_else(|| ChannelError::malformed(format!("type {} dispatched unparsed", msg.msg_type())))
}

fn unexpected(msg: &MsgIn) -> ChannelError {
    ChannelError::malformed(format!("unexpected record for type {}", msg.msg_type()))
}

// ── Common handlers ───────────────────────────────────────────────────────────

fn handle_set_ack(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::SetAck(set_ack) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    core.set_ack(set_ack.generation, set_ack.window);
    core.send(&ClientMessage::AckSync {
        generation: set_ack.generation,
    })?;
    core.release_parked();
    Ok(())
}

fn handle_ping(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::Ping(ping) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    debug!("{}: ping {}", core.identity(), ping.id);
    core.send(&ClientMessage::Pong {
        id: ping.id,
        timestamp: ping.timestamp,
    })
}

fn handle_notify(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::Notify(notify) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    let channel = core.identity();
    match notify.severity {
        NotifySeverity::Info => info!("{channel}: server notify: {}", notify.message),
        NotifySeverity::Warn => warn!("{channel}: server notify: {}", notify.message),
        NotifySeverity::Error => error!("{channel}: server notify: {}", notify.message),
        NotifySeverity::Unknown(level) => {
            warn!("{channel}: server notify (severity {level}): {}", notify.message)
        }
    }
    core.emit(ChannelEvent::Notify {
        channel,
        severity: notify.severity,
        message: notify.message.clone(),
    });
    Ok(())
}

fn handle_disconnecting(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::Disconnecting(disconnecting) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    info!(
        "{}: server disconnecting (reason {})",
        core.identity(),
        disconnecting.reason
    );
    core.emit(ChannelEvent::PeerDisconnecting {
        channel: core.identity(),
        reason: disconnecting.reason,
    });
    Ok(())
}

fn handle_wait_for_channels(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::WaitForChannels(wait) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    debug!(
        "{}: asked to wait for {} channel(s)",
        core.identity(),
        wait.channels.len()
    );
    core.emit(ChannelEvent::WaitForChannels {
        channel: core.identity(),
        waits: wait.channels.clone(),
    });
    Ok(())
}

fn handle_migrate(core: &mut ChannelCore, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::Migrate(migrate) = parsed(msg)? else {
        return Err(unexpected(msg));
    };
    info!("{}: migration announced (flags {:#x})", core.identity(), migrate.flags);
    core.emit(ChannelEvent::Migrate {
        channel: core.identity(),
        flags: migrate.flags,
    });
    Ok(())
}
