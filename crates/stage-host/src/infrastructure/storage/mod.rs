//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate
//!   directory (or an explicit path).
//! - Providing sensible defaults when the file does not exist yet.
//! - Writing a config back to disk.

pub mod config;
