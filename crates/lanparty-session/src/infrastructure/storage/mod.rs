//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from an explicit path
//! or the platform config directory, supplies defaults on first run, and
//! converts the stored settings into the types the discovery layer and the
//! coordinator consume.

pub mod config;
