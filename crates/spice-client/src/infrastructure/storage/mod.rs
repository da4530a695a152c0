//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file, falls back to
//! defaults when none exists yet, and writes changes back to disk.

pub mod config;
