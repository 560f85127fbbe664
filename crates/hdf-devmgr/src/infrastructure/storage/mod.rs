//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML file that lists the hosts and their devices.
//! - Validating it before the manager is built from it.
//! - Writing a config back out (used to seed a default file).
//! - Providing sensible defaults when the file does not exist yet.

pub mod config;
