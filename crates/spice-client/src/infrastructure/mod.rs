//! Infrastructure layer: adapters behind the channel engine's traits.
//!
//! **Dependency rule**: this layer may depend on `channel` and `spice_proto`,
//! but the `channel` layer never imports it.
//!
//! # Sub-modules
//!
//! - **`network`** – tokio TCP transport, the rustls TLS session, and a
//!   scripted `MockTransport` for tests.
//! - **`ticket`** – RSA-OAEP password ticket (`Authenticator`).
//! - **`audio`** – `PlaybackSink` implementations: a PCM file writer and a
//!   recording sink for tests.
//! - **`storage`** – TOML configuration file.

pub mod audio;
pub mod network;
pub mod storage;
pub mod ticket;
