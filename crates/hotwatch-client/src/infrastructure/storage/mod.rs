//! Storage infrastructure: the configuration file.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory (or an explicit path) and supplies defaults
//! when the file does not exist yet.

pub mod config;
