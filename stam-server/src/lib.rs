//! # stam-server
//!
//! UDP server for the StamOrga protocol.
//!
//! - **Discovery**: the well-known port hands out one session port per
//!   `CONNECT_USER`, together with the login challenge.
//! - **Sessions**: one task per session port, reassembling frames and
//!   answering them through the [`handler::Handler`].
//! - **Store**: users, season tickets and games kept in memory and seeded
//!   from the TOML configuration.

pub mod config;
pub mod discovery;
pub mod handler;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use discovery::Server;
pub use store::{Entry, EntryKind, Store};
