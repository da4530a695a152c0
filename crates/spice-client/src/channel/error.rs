//! Channel error type and its classification.

use spice_proto::protocol::ProtocolError;
use thiserror::Error;

use crate::channel::auth::AuthError;
use crate::channel::io::TlsError;
use crate::channel::state::ChannelState;

/// Broad class of a channel failure, reported upward with every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Socket or TLS failure.  Not retried at this layer.
    Transport,
    /// The peer violated the protocol.
    Protocol,
    /// The server refused our credentials.
    Authentication,
}

/// Errors that end a channel connection (or reject an API call).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: ChannelState, to: ChannelState },

    #[error("operation not valid in state {0}")]
    InvalidState(ChannelState),

    /// A handler was registered for the wrong channel variant.
    #[error("no {channel_type} handler state for message type {msg_type}")]
    HandlerMismatch {
        channel_type: &'static str,
        msg_type: u16,
    },
}

impl ChannelError {
    /// Classifies this error for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelError::Io(_) | ChannelError::Closed | ChannelError::Tls(_) => {
                ErrorClass::Transport
            }
            ChannelError::Authentication(_) => ErrorClass::Authentication,
            ChannelError::Protocol(_)
            | ChannelError::IllegalTransition { .. }
            | ChannelError::InvalidState(_)
            | ChannelError::HandlerMismatch { .. } => ErrorClass::Protocol,
        }
    }

    /// Shorthand for a malformed-payload protocol error.
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        ChannelError::Protocol(ProtocolError::MalformedPayload(detail.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(ChannelError::Closed.class(), ErrorClass::Transport);
        assert_eq!(
            ChannelError::Protocol(ProtocolError::InvalidMagic(0)).class(),
            ErrorClass::Protocol
        );
        assert_eq!(
            ChannelError::Authentication(AuthError::PermissionDenied).class(),
            ErrorClass::Authentication
        );
    }

    #[test]
    fn test_tls_failure_is_a_transport_error() {
        let err: ChannelError = TlsError("bad certificate".into()).into();
        assert_eq!(err.class(), ErrorClass::Transport);
        assert_eq!(err.to_string(), "TLS error: bad certificate");
    }
}
