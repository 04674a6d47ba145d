//! Opcodes, logical commands and result codes.
//!
//! Uses proper enums with `TryFrom`; no panics on unknown values.
//!
//! # Opcode space
//!
//! ```text
//!  0x0RRR_CCCC   request   (high nibble 0x0)
//!  0x1RRR_CCCC   ack       (request | ACK_FLAG)
//!  0x1F00_FFFF   generic "not logged in" ack
//! ```
//!
//! The middle digits group commands by area:
//! - `0x0001xxxx`: discovery
//! - `0x0002xxxx`: login
//! - `0x0003xxxx`: version and user settings
//! - `0x0004xxxx`: games
//! - `0x0005xxxx`: season tickets
//! - `0x0006xxxx`: meeting info

use crate::error::StamError;
use std::fmt;

/// Bit that turns a request opcode into its ack opcode.
pub const ACK_FLAG: u32 = 0x1000_0000;

/// Mask selecting the request/ack nibble of an opcode.
pub const KIND_MASK: u32 = 0xF000_0000;

/// Generic ack sent for any command received before a successful login.
pub const ACK_NOT_LOGGED_IN: u32 = 0x1F00_FFFF;

// ── Command ──────────────────────────────────────────────────────

/// Every logical command of the protocol.
///
/// The discriminant is the request opcode; the ack opcode is derived with
/// [`ACK_FLAG`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Discovery / login ────────────────────────────────────────
    /// Ask the discovery port for a session port.
    ConnectUser = 0x0001_0001,
    /// Authenticate on the session port.
    LoginUser = 0x0002_0001,

    // ── Version / user (0x0003xxxx) ──────────────────────────────
    /// Exchange program versions.
    GetVersion = 0x0003_0002,
    /// Read permission flags, user index and readable name.
    GetUserProps = 0x0003_0003,
    /// Change the login password.
    UserChangeLogin = 0x0003_0004,
    /// Change the readable (display) name.
    UserChangeReadName = 0x0003_0005,

    // ── Games (0x0004xxxx) ───────────────────────────────────────
    /// List the scheduled games.
    GetGamesList = 0x0004_0001,
    /// List per-game info (ticket counts, meeting state).
    GetGamesInfoList = 0x0004_0002,
    /// Add or edit a game.
    ChangeGame = 0x0004_0003,
    /// Mark a game's kick-off time as fixed or not yet fixed.
    SetFixedGameTime = 0x0004_0004,

    // ── Season tickets (0x0005xxxx) ──────────────────────────────
    /// List the season tickets.
    GetTicketsList = 0x0005_0001,
    /// Add a season ticket.
    AddTicket = 0x0005_0002,
    /// Remove a season ticket.
    RemoveTicket = 0x0005_0003,
    /// Change the seat of a season ticket.
    ChangeTicketPlace = 0x0005_0004,
    /// Free, block or reserve a ticket for one game.
    ChangeTicketState = 0x0005_0005,
    /// List tickets available for one game.
    GetAvailableTickets = 0x0005_0006,
    /// Edit name, seat and discount of a season ticket.
    ChangeTicket = 0x0005_0007,

    // ── Meetings (0x0006xxxx) ────────────────────────────────────
    /// Set when/where/info of the meeting for one game.
    ChangeMeetingInfo = 0x0006_0001,
    /// Read the meeting for one game.
    GetMeetingInfo = 0x0006_0002,
    /// Accept, maybe-accept or decline a meeting.
    AcceptMeeting = 0x0006_0003,
}

impl Command {
    /// All commands, in opcode order.
    pub const ALL: [Command; 20] = [
        Command::ConnectUser,
        Command::LoginUser,
        Command::GetVersion,
        Command::GetUserProps,
        Command::UserChangeLogin,
        Command::UserChangeReadName,
        Command::GetGamesList,
        Command::GetGamesInfoList,
        Command::ChangeGame,
        Command::SetFixedGameTime,
        Command::GetTicketsList,
        Command::AddTicket,
        Command::RemoveTicket,
        Command::ChangeTicketPlace,
        Command::ChangeTicketState,
        Command::GetAvailableTickets,
        Command::ChangeTicket,
        Command::ChangeMeetingInfo,
        Command::GetMeetingInfo,
        Command::AcceptMeeting,
    ];

    /// Opcode carried by the request frame.
    pub fn request_opcode(self) -> u32 {
        self as u32
    }

    /// Opcode carried by the matching ack frame.
    pub fn ack_opcode(self) -> u32 {
        self as u32 | ACK_FLAG
    }

    /// The `(request, ack)` opcode pair.
    pub fn opcodes(self) -> (u32, u32) {
        (self.request_opcode(), self.ack_opcode())
    }

    /// Look up the command for a request opcode.
    pub fn from_request(opcode: u32) -> Result<Self, StamError> {
        Self::ALL
            .into_iter()
            .find(|c| c.request_opcode() == opcode)
            .ok_or(StamError::UnknownVariant {
                type_name: "Command",
                value: opcode as u64,
            })
    }

    /// Look up the command for an ack opcode.
    pub fn from_ack(opcode: u32) -> Result<Self, StamError> {
        if opcode & KIND_MASK != ACK_FLAG {
            return Err(StamError::UnknownVariant {
                type_name: "Command ack",
                value: opcode as u64,
            });
        }
        Self::from_request(opcode & !ACK_FLAG)
    }

    /// Commands travelling on the session (data) port rather than the
    /// discovery port.
    pub fn uses_data_link(self) -> bool {
        !matches!(self, Command::ConnectUser)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── OpCode ───────────────────────────────────────────────────────

/// A decoded opcode: a request, an ack, or the generic not-logged-in ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Request(Command),
    Ack(Command),
    NotLoggedIn,
}

impl OpCode {
    /// Raw wire value.
    pub fn value(self) -> u32 {
        match self {
            OpCode::Request(c) => c.request_opcode(),
            OpCode::Ack(c) => c.ack_opcode(),
            OpCode::NotLoggedIn => ACK_NOT_LOGGED_IN,
        }
    }

    /// Returns `true` for any server → client opcode.
    pub fn is_ack(self) -> bool {
        !matches!(self, OpCode::Request(_))
    }
}

impl TryFrom<u32> for OpCode {
    type Error = StamError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value == ACK_NOT_LOGGED_IN {
            return Ok(OpCode::NotLoggedIn);
        }
        match value & KIND_MASK {
            0 => Command::from_request(value).map(OpCode::Request),
            ACK_FLAG => Command::from_ack(value).map(OpCode::Ack),
            _ => Err(StamError::UnknownVariant {
                type_name: "OpCode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Request(c) => write!(f, "REQ_{c}"),
            OpCode::Ack(c) => write!(f, "ACK_{c}"),
            OpCode::NotLoggedIn => write!(f, "ACK_NOT_LOGGED_IN"),
        }
    }
}

// ── ResultCode ───────────────────────────────────────────────────

/// Result / error code shared by every response.
///
/// Sent as the first little-endian `i32` of nearly every ack payload.
/// `ConnectionClosed`, `MalformedResponse` and `TransportError` are produced
/// locally by the client and never appear on the wire.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    NoError = 0,
    Success = 1,
    Common = -1,
    WrongPassword = -2,
    WrongSize = -3,
    WrongParameter = -4,
    NotFound = -5,
    AlreadyExists = -6,
    Timeout = -7,
    NotLoggedIn = -8,
    MissingTicket = -9,
    /// The cached games/tickets list is outdated; refresh and retry.
    UpdateList = -10,
    NewVersion = -11,
    NoUser = -12,

    // ── Local only ───────────────────────────────────────────────
    ConnectionClosed = -100,
    MalformedResponse = -101,
    TransportError = -102,
}

impl ResultCode {
    /// Returns `true` for the codes a caller treats as "it worked".
    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Success | ResultCode::NoError)
    }

    /// Returns `true` for the stale-list code that triggers a refresh.
    pub fn is_stale_list(self) -> bool {
        self == ResultCode::UpdateList
    }

    /// Map a raw wire value, folding unknown negatives into `Common`.
    ///
    /// Positive values other than `Success` only carry meaning for the
    /// connect ack (a port number) and are decoded there.
    pub fn from_wire(value: i32) -> Self {
        ResultCode::try_from(value).unwrap_or(ResultCode::Common)
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = StamError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => ResultCode::NoError,
            1 => ResultCode::Success,
            -1 => ResultCode::Common,
            -2 => ResultCode::WrongPassword,
            -3 => ResultCode::WrongSize,
            -4 => ResultCode::WrongParameter,
            -5 => ResultCode::NotFound,
            -6 => ResultCode::AlreadyExists,
            -7 => ResultCode::Timeout,
            -8 => ResultCode::NotLoggedIn,
            -9 => ResultCode::MissingTicket,
            -10 => ResultCode::UpdateList,
            -11 => ResultCode::NewVersion,
            -12 => ResultCode::NoUser,
            -100 => ResultCode::ConnectionClosed,
            -101 => ResultCode::MalformedResponse,
            -102 => ResultCode::TransportError,
            _ => {
                return Err(StamError::UnknownVariant {
                    type_name: "ResultCode",
                    value: value as i64 as u64,
                });
            }
        };
        Ok(code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResultCode::NoError => "no error",
            ResultCode::Success => "success",
            ResultCode::Common => "common error",
            ResultCode::WrongPassword => "wrong password",
            ResultCode::WrongSize => "wrong size",
            ResultCode::WrongParameter => "wrong parameter",
            ResultCode::NotFound => "not found",
            ResultCode::AlreadyExists => "already exists",
            ResultCode::Timeout => "timeout",
            ResultCode::NotLoggedIn => "not logged in",
            ResultCode::MissingTicket => "missing ticket",
            ResultCode::UpdateList => "list needs update",
            ResultCode::NewVersion => "new version available",
            ResultCode::NoUser => "unknown user",
            ResultCode::ConnectionClosed => "connection closed",
            ResultCode::MalformedResponse => "malformed response",
            ResultCode::TransportError => "transport error",
        };
        f.write_str(text)
    }
}
