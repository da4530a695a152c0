//! Playback channel: server → client audio.
//!
//! The server first announces an encoding with PLAYBACK_MODE, then brackets a
//! stream of PLAYBACK_DATA packets with PLAYBACK_START / PLAYBACK_STOP.  This
//! client only plays RAW (uncompressed PCM) audio; in any other mode start and
//! data are dropped with a log line, while stop is always forwarded so a sink
//! never stays open.
//!
//! Audio output itself sits behind [`PlaybackSink`]; the file writer and the
//! recording test sink live in `infrastructure::audio`.

use bytes::Bytes;
use spice_proto::protocol::{server_msg, AudioFormat, AudioMode, ServerMessage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::dispatch::{parsed, DispatchTable, Handler};
use crate::channel::error::ChannelError;
use crate::channel::msg_in::MsgIn;
use crate::channel::ChannelIdentity;

/// Error type for audio sink operations.  Never fatal for the channel.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audio output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported stream: {0}")]
    Unsupported(String),
}

/// Receives playback events synchronously, in wire order.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackSink: Send {
    /// A RAW stream begins.
    fn start(
        &mut self,
        format: AudioFormat,
        channels: u32,
        frequency: u32,
        time: u32,
    ) -> Result<(), SinkError>;

    /// One packet of PCM samples.  `data` is a view of the received message;
    /// cloning it keeps the bytes without copying.
    fn data(&mut self, time: u32, data: &Bytes) -> Result<(), SinkError>;

    /// The stream ends.
    fn stop(&mut self) -> Result<(), SinkError>;
}

/// Per-channel playback state.
pub struct PlaybackChannel {
    mode: AudioMode,
    sink: Box<dyn PlaybackSink>,
}

impl PlaybackChannel {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            mode: AudioMode::Invalid,
            sink,
        }
    }

    /// The encoding most recently announced by the server.
    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    /// Adds the playback ids to `table`.
    pub fn register_handlers(table: &mut DispatchTable) {
        table.register(server_msg::PLAYBACK_DATA, Handler::Playback(handle_data));
        table.register(server_msg::PLAYBACK_MODE, Handler::Playback(handle_mode));
        table.register(server_msg::PLAYBACK_START, Handler::Playback(handle_start));
        table.register(server_msg::PLAYBACK_STOP, Handler::Playback(handle_stop));
    }

    fn set_mode(&mut self, channel: ChannelIdentity, mode: AudioMode) {
        match mode {
            AudioMode::Raw | AudioMode::Celt051 | AudioMode::Opus => {
                debug!("{channel}: audio mode {mode:?}")
            }
            AudioMode::Invalid | AudioMode::Unknown(_) => {
                warn!("{channel}: unhandled audio mode {}", mode.as_u16())
            }
        }
        self.mode = mode;
    }
}

fn report(channel: ChannelIdentity, what: &str, result: Result<(), SinkError>) {
    if let Err(e) = result {
        warn!("{channel}: audio sink {what} failed: {e}");
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn handle_mode(channel: &mut PlaybackChannel, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::PlaybackMode(mode) = parsed(msg)? else {
        return Err(ChannelError::malformed("PLAYBACK_MODE without mode record"));
    };
    channel.set_mode(msg.channel(), mode.mode);
    Ok(())
}

fn handle_start(channel: &mut PlaybackChannel, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::PlaybackStart(start) = parsed(msg)? else {
        return Err(ChannelError::malformed("PLAYBACK_START without start record"));
    };
    if channel.mode != AudioMode::Raw {
        debug!("{}: start ignored in mode {:?}", msg.channel(), channel.mode);
        return Ok(());
    }
    debug!(
        "{}: start {:?} {}ch {}Hz",
        msg.channel(), start.format, start.channels, start.frequency
    );
    let result = channel
        .sink
        .start(start.format, start.channels, start.frequency, start.time);
    report(msg.channel(), "start", result);
    Ok(())
}

fn handle_data(channel: &mut PlaybackChannel, msg: &MsgIn) -> Result<(), ChannelError> {
    let ServerMessage::PlaybackData(packet) = parsed(msg)? else {
        return Err(ChannelError::malformed("PLAYBACK_DATA without packet record"));
    };
    if channel.mode != AudioMode::Raw {
        debug!(
            "{}: {} bytes dropped in mode {:?}",
            msg.channel(),
            packet.data.len(),
            channel.mode
        );
        return Ok(());
    }
    let result = channel.sink.data(packet.time, &packet.data);
    report(msg.channel(), "data", result);
    Ok(())
}

fn handle_stop(channel: &mut PlaybackChannel, msg: &MsgIn) -> Result<(), ChannelError> {
    debug!("{}: stop", msg.channel());
    let result = channel.sink.stop();
    report(msg.channel(), "stop", result);
    Ok(())
}
