//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform-appropriate directory and falls back to defaults when it does not
//! exist yet.  Writing settings back is the job of the settings UI, not of the
//! synchroniser.

pub mod config;
