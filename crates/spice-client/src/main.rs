//! `spice-playback`: connects a single playback channel and writes the audio
//! it receives to a PCM file.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config (file + CLI overrides), init tracing
//!  └─ network::connect()           -- tokio TCP stream
//!  └─ Channel::connect()           -- optional TLS, then link negotiation
//!  └─ readiness loop
//!       ├─ stream.readable()  -> Channel::on_readable()
//!       ├─ stream.writable()  -> Channel::on_writable()   (only when needed)
//!       ├─ Ctrl-C             -> Channel::disconnect()
//!       └─ drain ChannelEvent queue; stop on Disconnected
//! ```
//!
//! # Why the channel never awaits (for beginners)
//!
//! The channel engine is synchronous.  It reads with `try_read`, which returns
//! `WouldBlock` instead of waiting.  All waiting happens here, in one place:
//! `tokio::select!` sleeps until the socket is readable or writable, then hands
//! control to the channel, which does as much work as the bytes allow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use spice_client::channel::{
    event_channel, Channel, ChannelError, ChannelEvent, ChannelVariant, PlaybackChannel,
    TlsSession,
};
use spice_client::infrastructure::audio::PcmFileSink;
use spice_client::infrastructure::network::tls::{client_config, RustlsSession, TlsSetupError};
use spice_client::infrastructure::network::{self, TcpTransport};
use spice_client::infrastructure::storage::config::{
    load_config, load_config_from, AppConfig, ConfigError,
};
use spice_client::infrastructure::ticket::TicketAuthenticator;

/// Command-line arguments.  Every option overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "spice-playback", version, about = "Record a SPICE playback channel to a PCM file")]
struct Args {
    /// Config file (default: platform config directory).
    #[arg(short, long, env = "SPICE_PLAYBACK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Connect to this TLS port instead of the plain port.
    #[arg(long)]
    tls_port: Option<u16>,

    /// PEM file with trusted CA certificates.
    #[arg(long)]
    ca_file: Option<PathBuf>,

    #[arg(long, env = "SPICE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Session id from the main channel.
    #[arg(long)]
    connection_id: Option<u32>,

    /// PCM output file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        let connection = &mut config.connection;
        if let Some(host) = self.host {
            connection.host = host;
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if self.tls_port.is_some() {
            connection.tls_port = self.tls_port;
        }
        if self.ca_file.is_some() {
            connection.ca_file = self.ca_file;
        }
        if let Some(id) = self.connection_id {
            connection.connection_id = id;
        }
        if self.password.is_some() {
            config.auth.password = self.password;
        }
        if let Some(output) = self.output {
            config.playback.pcm_output = output;
        }
    }
}

fn load(path: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => load_config_from(path),
        None => match load_config() {
            Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
            other => other,
        },
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load(args.config.as_ref()).context("loading configuration")?;
    args.apply(&mut config);

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    info!("spice-playback starting");

    // ── Channel ───────────────────────────────────────────────────────────────
    let (events_tx, mut events_rx) = event_channel();
    let sink = PcmFileSink::new(&config.playback.pcm_output);
    let password = config.auth.password.clone().unwrap_or_default();
    let mut channel = Channel::new(
        config.connection.connection_id,
        config.connection.channel_id,
        ChannelVariant::Playback(PlaybackChannel::new(Box::new(sink))),
        Box::new(TicketAuthenticator::new(password)),
        events_tx,
    );

    // ── Transport ─────────────────────────────────────────────────────────────
    let stream = network::connect(&config.connection.address()).await?;
    let tls: Option<Box<dyn TlsSession>> = if config.connection.uses_tls() {
        let ca_file = config
            .connection
            .ca_file
            .as_deref()
            .ok_or(TlsSetupError::NoTrustAnchors)?;
        let session = RustlsSession::new(client_config(ca_file)?, config.connection.server_name())?;
        Some(Box::new(session))
    } else {
        None
    };
    channel.connect(Box::new(TcpTransport::new(Arc::clone(&stream))), tls)?;

    // ── Readiness loop ────────────────────────────────────────────────────────
    let mut failure: Option<ChannelError> = None;
    let mut running = true;
    while running {
        let result = tokio::select! {
            ready = stream.readable() => match ready {
                Ok(()) => channel.on_readable(),
                Err(e) => Err(e.into()),
            },
            ready = stream.writable(), if channel.wants_write() => match ready {
                Ok(()) => channel.on_writable(),
                Err(e) => Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                channel.disconnect();
                Ok(())
            }
        };
        if let Err(e) = result {
            // Engine errors already reset the channel; readiness errors did not.
            channel.disconnect();
            failure = Some(e);
        }

        while let Ok(event) = events_rx.try_recv() {
            match event {
                ChannelEvent::StateChanged { channel, state } => debug!("{channel}: {state}"),
                ChannelEvent::Connected(id) => info!("{id}: transport attached"),
                ChannelEvent::Ready(id) => info!("{id}: receiving audio"),
                ChannelEvent::PeerDisconnecting { channel, reason } => {
                    info!("{channel}: server is closing the channel (reason {reason})")
                }
                ChannelEvent::Error { channel, class, message } => {
                    error!("{channel}: {class:?} error: {message}")
                }
                ChannelEvent::WaitForChannels { channel, waits } => {
                    debug!("{channel}: ignoring wait for {} channel(s)", waits.len())
                }
                ChannelEvent::Migrate { channel, .. } => {
                    warn!("{channel}: migration is not supported by this client")
                }
                ChannelEvent::Notify { .. } => {}
                ChannelEvent::Disconnected(id) => {
                    info!("{id}: disconnected");
                    running = false;
                }
            }
        }
    }

    info!("spice-playback stopped");
    match failure {
        // A close after the server announced DISCONNECTING is a normal end.
        Some(ChannelError::Closed) | None => Ok(()),
        Some(e) => Err(e.into()),
    }
}
