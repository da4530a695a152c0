//! TLS for the secure port, backed by rustls.
//!
//! The server certificate is verified against the CA file from the
//! configuration (the server's self-signed CA in a typical deployment).

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use thiserror::Error;
use tracing::debug;

use crate::channel::{TlsError, TlsSession};

/// Errors building a TLS client configuration or session.
#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("cannot read CA file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no CA certificates configured; set connection.ca_file")]
    NoTrustAnchors,
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Loads the CA certificates in `ca_file` and builds a client config.
///
/// # Errors
///
/// Unreadable or empty CA files, and rustls configuration failures.
pub fn client_config(ca_file: &Path) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let file = File::open(ca_file).map_err(|source| TlsSetupError::Io {
        path: ca_file.to_path_buf(),
        source,
    })?;
    let roots = load_roots(&mut BufReader::new(file)).map_err(|source| TlsSetupError::Io {
        path: ca_file.to_path_buf(),
        source,
    })?;
    if roots.is_empty() {
        return Err(TlsSetupError::NoTrustAnchors);
    }
    debug!("loaded {} CA certificate(s) from {}", roots.len(), ca_file.display());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

fn load_roots(reader: &mut dyn io::BufRead) -> io::Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(reader) {
        let (added, ignored) = roots.add_parsable_certificates([cert?]);
        if ignored > 0 {
            debug!("skipped {ignored} unparsable CA certificate(s), kept {added}");
        }
    }
    Ok(roots)
}

/// [`TlsSession`] over a rustls client connection.
pub struct RustlsSession {
    conn: ClientConnection,
}

impl RustlsSession {
    /// Starts a handshake for `server_name`.
    ///
    /// # Errors
    ///
    /// [`TlsSetupError::InvalidServerName`] when the name is neither a DNS
    /// name nor an IP address.
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsSetupError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TlsSetupError::InvalidServerName(server_name.to_owned()))?;
        Ok(Self {
            conn: ClientConnection::new(config, name)?,
        })
    }
}

impl TlsSession for RustlsSession {
    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        self.conn.read_tls(rd)
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        self.conn.write_tls(wr)
    }

    fn process_new_packets(&mut self) -> Result<(), TlsError> {
        self.conn
            .process_new_packets()
            .map(|_| ())
            .map_err(|e| TlsError(e.to_string()))
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn.reader().read(buf)
    }

    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.writer().write(buf)
    }
}
