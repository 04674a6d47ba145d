//! # stam-client
//!
//! Command-line front end: logs in with the configured account, runs one
//! subcommand through [`stam_core::Client`] and prints the answer.

pub mod commands;
pub mod config;

pub use commands::{Action, Outcome, execute};
pub use config::ClientConfig;
