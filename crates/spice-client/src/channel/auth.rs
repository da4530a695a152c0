//! Authentication boundary used during the AUTH step of link negotiation.
//!
//! The engine only knows *that* a ticket must be produced from the server's
//! public key; how it is produced lives behind [`Authenticator`].  The RSA
//! ticket implementation is in `infrastructure::ticket`.

use spice_proto::protocol::AuthMechanism;
use thiserror::Error;

/// Errors raised while authenticating a channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("server public key is invalid: {0}")]
    InvalidKey(String),

    #[error("password longer than {max} bytes")]
    PasswordTooLong { max: usize },

    #[error("ticket encryption failed: {0}")]
    Encrypt(String),

    #[error("server has no authentication mechanism in common with this client")]
    NoCommonMechanism,

    #[error("server denied access")]
    PermissionDenied,
}

/// Produces the authentication payload for one link.
pub trait Authenticator: Send {
    /// Mechanism announced when the server lets the client choose.
    fn mechanism(&self) -> AuthMechanism;

    /// Builds the bytes sent after the mechanism selection, given the
    /// DER-encoded public key from the server's link reply.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the key is unusable or encryption fails.
    fn ticket(&mut self, pub_key: &[u8]) -> Result<Vec<u8>, AuthError>;
}
