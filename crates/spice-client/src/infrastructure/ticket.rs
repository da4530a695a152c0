//! Password ticket authentication.
//!
//! The server sends a 1024-bit RSA public key (SubjectPublicKeyInfo DER) in
//! its link reply.  The client answers with the password, NUL-terminated,
//! encrypted with RSA-OAEP using SHA-1.  One 128-byte block fits 60 password
//! bytes plus the terminator after OAEP padding.

use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use spice_proto::protocol::AuthMechanism;

use crate::channel::{AuthError, Authenticator};

/// Longest password a ticket can carry.
pub const MAX_PASSWORD_LEN: usize = 60;

/// [`Authenticator`] for the RSA ticket mechanism.
#[derive(Debug, Clone, Default)]
pub struct TicketAuthenticator {
    password: String,
}

impl TicketAuthenticator {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl Authenticator for TicketAuthenticator {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Spice
    }

    fn ticket(&mut self, pub_key: &[u8]) -> Result<Vec<u8>, AuthError> {
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(AuthError::PasswordTooLong {
                max: MAX_PASSWORD_LEN,
            });
        }
        let key = RsaPublicKey::from_public_key_der(pub_key)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;

        let mut plain = Vec::with_capacity(self.password.len() + 1);
        plain.extend_from_slice(self.password.as_bytes());
        plain.push(0);

        key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), &plain)
            .map_err(|e| AuthError::Encrypt(e.to_string()))
    }
}
