//! # stam-core
//!
//! Client side of the StamOrga UDP protocol, plus the wire pieces a
//! server needs.
//!
//! This crate contains:
//! - **Wire types**: `FrameHeader`, `Message`, `Command`, `ResultCode`
//! - **Reassembly**: `ReassemblyBuffer` turning datagrams into frames, and
//!   `StamCodec` for byte streams
//! - **Protocol payloads**: typed `Request`s, decoded `Response`s and list bodies
//! - **Session**: credentials and login material derivation
//! - **State**: the sans-IO `ConnectionMachine` and its request queue
//! - **Network**: `UdpLink`, one socket per peer
//! - **Client**: the async `Client` handle driving the machine
//! - **Error**: `StamError`, a `thiserror`-based error type

pub mod buffer;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod frame;
pub mod header;
pub mod message;
pub mod network;
pub mod protocol;
pub mod session;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::ReassemblyBuffer;
pub use client::Client;
pub use codec::StamCodec;
pub use config::ConnectionConfig;
pub use error::StamError;
pub use flags::UserProperties;
pub use frame::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Message};
pub use header::{HEADER_SIZE, FrameHeader};
pub use message::{ACK_NOT_LOGGED_IN, Command, OpCode, ResultCode};
pub use network::{LinkEvent, LinkMessage, UdpLink};
pub use protocol::{Request, Response, ResponseBody};
pub use session::{SessionCredentials, SessionSnapshot, login_material};
pub use state::{Action, ConnectionEvent, ConnectionMachine, ConnectionState, Input, Link};
