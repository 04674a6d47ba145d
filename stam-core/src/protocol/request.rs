//! Typed request arguments and their payload layouts.

use bytes::Bytes;

use crate::error::StamError;
use crate::frame::Message;
use crate::message::Command;
use crate::protocol::{PayloadReader, PayloadWriter};

/// Highest season index a game may carry.
pub const MAX_SEASON_INDEX: u32 = 34;

/// Highest competition number; the bit above it marks a fixed kick-off.
pub const MAX_COMPETITION: u32 = 0x7F;

/// Past games requested when a games list is refreshed internally.
pub const REFRESH_PAST_GAMES: u32 = 5;

// ── Argument types ───────────────────────────────────────────────

/// State of one season ticket for one game.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketState {
    Blocked = 1,
    Free = 2,
    Reserved = 3,
}

impl TryFrom<u32> for TicketState {
    type Error = StamError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TicketState::Blocked),
            2 => Ok(TicketState::Free),
            3 => Ok(TicketState::Reserved),
            _ => Err(StamError::UnknownVariant {
                type_name: "TicketState",
                value: value as u64,
            }),
        }
    }
}

/// Answer to a meeting.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptState {
    Accept = 1,
    Maybe = 2,
    Decline = 3,
}

impl TryFrom<u32> for AcceptState {
    type Error = StamError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AcceptState::Accept),
            2 => Ok(AcceptState::Maybe),
            3 => Ok(AcceptState::Decline),
            _ => Err(StamError::UnknownVariant {
                type_name: "AcceptState",
                value: value as u64,
            }),
        }
    }
}

/// A game to add (`index == 0`) or edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameChange {
    pub index: u32,
    pub season_index: u32,
    pub competition: u32,
    pub home: String,
    pub away: String,
    /// Kick-off as unix milliseconds, kept as text on the wire.
    pub date: i64,
    pub score: String,
}

impl GameChange {
    /// Check the fields before anything is sent.
    pub fn validate(&self) -> Result<(), StamError> {
        if self.season_index > MAX_SEASON_INDEX {
            return Err(StamError::InvalidArgument(format!(
                "season index {} above {MAX_SEASON_INDEX}",
                self.season_index
            )));
        }
        if self.competition == 0 || self.competition > MAX_COMPETITION {
            return Err(StamError::InvalidArgument(format!(
                "competition {} out of range",
                self.competition
            )));
        }
        if self.home.is_empty() || self.away.is_empty() {
            return Err(StamError::InvalidArgument("empty team name".into()));
        }
        for field in [&self.home, &self.away, &self.score] {
            if field.contains(';') || field.contains('\0') {
                return Err(StamError::InvalidArgument(format!(
                    "separator inside field {field:?}"
                )));
            }
        }
        Ok(())
    }

    fn to_line(&self) -> String {
        format!(
            "{};{};{};{};{};{};{}",
            self.home,
            self.away,
            self.date,
            self.score,
            self.index,
            self.season_index,
            self.competition
        )
    }

    fn from_line(line: &str) -> Result<Self, StamError> {
        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() != 7 {
            return Err(StamError::Encoding(format!(
                "game line has {} fields, expected 7",
                parts.len()
            )));
        }
        let date = parts[2]
            .parse::<i64>()
            .map_err(|e| StamError::Encoding(format!("bad date {:?}: {e}", parts[2])))?;
        let field = |s: &str| {
            s.parse::<u32>()
                .map_err(|e| StamError::Encoding(format!("bad field {s:?}: {e}")))
        };
        let game = Self {
            home: parts[0].to_string(),
            away: parts[1].to_string(),
            date,
            score: parts[3].to_string(),
            index: field(parts[4])?,
            season_index: field(parts[5])?,
            competition: field(parts[6])?,
        };
        Ok(game)
    }
}

// ── Request ──────────────────────────────────────────────────────

/// A request with its typed arguments.
///
/// `ConnectUser` and `Login` are produced by the connection itself and
/// rejected when submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ConnectUser { user_name: String },
    Login { material: String },
    GetVersion { version: u32, version_text: String },
    GetUserProps,
    ChangePassword { old_material: String, new_password: String },
    ChangeReadableName { name: String },
    GetGamesList { max_past_games: u32 },
    GetGamesInfoList,
    ChangeGame(GameChange),
    SetFixedGameTime { game_index: u32, fixed: bool },
    GetTicketsList,
    AddTicket { name: String, discount: u32 },
    RemoveTicket { index: u32 },
    ChangeTicketPlace { index: u32, place: String },
    ChangeTicketState {
        ticket_index: u32,
        game_index: u32,
        state: TicketState,
        reserve_name: String,
    },
    GetAvailableTickets { game_index: u32 },
    ChangeTicket {
        index: u32,
        name: String,
        place: String,
        discount: u32,
    },
    ChangeMeetingInfo {
        game_index: u32,
        when: String,
        place: String,
        info: String,
    },
    GetMeetingInfo { game_index: u32 },
    AcceptMeeting {
        game_index: u32,
        accept: AcceptState,
        accept_index: u32,
        name: String,
    },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::ConnectUser { .. } => Command::ConnectUser,
            Request::Login { .. } => Command::LoginUser,
            Request::GetVersion { .. } => Command::GetVersion,
            Request::GetUserProps => Command::GetUserProps,
            Request::ChangePassword { .. } => Command::UserChangeLogin,
            Request::ChangeReadableName { .. } => Command::UserChangeReadName,
            Request::GetGamesList { .. } => Command::GetGamesList,
            Request::GetGamesInfoList => Command::GetGamesInfoList,
            Request::ChangeGame(_) => Command::ChangeGame,
            Request::SetFixedGameTime { .. } => Command::SetFixedGameTime,
            Request::GetTicketsList => Command::GetTicketsList,
            Request::AddTicket { .. } => Command::AddTicket,
            Request::RemoveTicket { .. } => Command::RemoveTicket,
            Request::ChangeTicketPlace { .. } => Command::ChangeTicketPlace,
            Request::ChangeTicketState { .. } => Command::ChangeTicketState,
            Request::GetAvailableTickets { .. } => Command::GetAvailableTickets,
            Request::ChangeTicket { .. } => Command::ChangeTicket,
            Request::ChangeMeetingInfo { .. } => Command::ChangeMeetingInfo,
            Request::GetMeetingInfo { .. } => Command::GetMeetingInfo,
            Request::AcceptMeeting { .. } => Command::AcceptMeeting,
        }
    }

    /// Reject arguments that can be refused without asking the server.
    pub fn validate(&self) -> Result<(), StamError> {
        match self {
            Request::ChangeGame(game) => game.validate(),
            Request::AddTicket { name, .. } | Request::ChangeTicket { name, .. }
                if name.is_empty() =>
            {
                Err(StamError::InvalidArgument("empty ticket name".into()))
            }
            Request::ChangeReadableName { name } if name.is_empty() => {
                Err(StamError::InvalidArgument("empty readable name".into()))
            }
            _ => Ok(()),
        }
    }

    /// The list request that refreshes the data behind this request, if a
    /// stale-list answer can occur for it.
    pub fn stale_refresh(&self) -> Option<Request> {
        match self {
            Request::GetGamesInfoList => Some(Request::GetGamesList {
                max_past_games: REFRESH_PAST_GAMES,
            }),
            Request::GetAvailableTickets { .. } => Some(Request::GetTicketsList),
            _ => None,
        }
    }

    /// Build the request frame.
    pub fn encode(&self) -> Result<Message, StamError> {
        let payload = self.encode_payload()?;
        Message::new(self.command().request_opcode(), payload)
    }

    fn encode_payload(&self) -> Result<Bytes, StamError> {
        let mut w = PayloadWriter::new();
        match self {
            Request::ConnectUser { user_name } => {
                w.put_bytes(user_name.as_bytes());
            }
            Request::Login { material } => {
                w.put_str_prefixed(material)?;
            }
            Request::GetVersion {
                version,
                version_text,
            } => {
                w.put_u32(*version).put_str_prefixed(version_text)?;
            }
            Request::GetUserProps | Request::GetGamesInfoList | Request::GetTicketsList => {}
            Request::ChangePassword {
                old_material,
                new_password,
            } => {
                w.put_str_prefixed(old_material)?
                    .put_str_prefixed(new_password)?;
            }
            Request::ChangeReadableName { name } => {
                w.put_str_prefixed(name)?;
            }
            Request::GetGamesList { max_past_games } => {
                w.put_u32(*max_past_games);
            }
            Request::ChangeGame(game) => {
                w.put_str_terminated(&game.to_line())?;
            }
            Request::AddTicket { name, discount } => {
                w.put_u32(*discount).put_str_prefixed(name)?;
            }
            Request::RemoveTicket { index } => {
                w.put_u32(*index);
            }
            Request::SetFixedGameTime { game_index, fixed } => {
                w.put_u32(*game_index).put_u32(u32::from(*fixed));
            }
            Request::ChangeTicket {
                index,
                name,
                place,
                discount,
            } => {
                w.put_u32(*index)
                    .put_u32(*discount)
                    .put_str_prefixed(name)?
                    .put_str_prefixed(place)?;
            }
            Request::GetAvailableTickets { game_index } | Request::GetMeetingInfo { game_index } => {
                w.put_u32(*game_index);
            }
            Request::ChangeTicketPlace { index, place } => {
                w.put_u32(*index).put_str_prefixed(place)?;
            }
            Request::ChangeTicketState {
                ticket_index,
                game_index,
                state,
                reserve_name,
            } => {
                w.put_u32(*ticket_index)
                    .put_u32(*game_index)
                    .put_u32(*state as u32)
                    .put_str_prefixed(reserve_name)?;
            }
            Request::ChangeMeetingInfo {
                game_index,
                when,
                place,
                info,
            } => {
                w.put_u32(*game_index)
                    .put_str_terminated(when)?
                    .put_str_terminated(place)?
                    .put_str_terminated(info)?;
            }
            Request::AcceptMeeting {
                game_index,
                accept,
                accept_index,
                name,
            } => {
                w.put_u32(*game_index)
                    .put_u32(*accept as u32)
                    .put_u32(*accept_index)
                    .put_str_terminated(name)?;
            }
        }
        Ok(w.finish())
    }

    /// Parse a request frame (server side).
    pub fn decode(message: &Message) -> Result<Self, StamError> {
        let command = Command::from_request(message.opcode())?;
        let mut r = PayloadReader::new(message.payload());
        let request = match command {
            Command::ConnectUser => Request::ConnectUser {
                user_name: String::from_utf8(r.rest().to_vec())?,
            },
            Command::LoginUser => Request::Login {
                material: r.str_prefixed()?,
            },
            Command::GetVersion => Request::GetVersion {
                version: r.u32()?,
                version_text: r.str_prefixed()?,
            },
            Command::GetUserProps => Request::GetUserProps,
            Command::UserChangeLogin => Request::ChangePassword {
                old_material: r.str_prefixed()?,
                new_password: r.str_prefixed()?,
            },
            Command::UserChangeReadName => Request::ChangeReadableName {
                name: r.str_prefixed()?,
            },
            Command::GetGamesList => Request::GetGamesList {
                max_past_games: r.u32()?,
            },
            Command::GetGamesInfoList => Request::GetGamesInfoList,
            Command::ChangeGame => Request::ChangeGame(GameChange::from_line(&r.str_terminated()?)?),
            Command::SetFixedGameTime => Request::SetFixedGameTime {
                game_index: r.u32()?,
                fixed: r.u32()? != 0,
            },
            Command::GetTicketsList => Request::GetTicketsList,
            Command::ChangeTicket => {
                let index = r.u32()?;
                let discount = r.u32()?;
                Request::ChangeTicket {
                    index,
                    name: r.str_prefixed()?,
                    place: r.str_prefixed()?,
                    discount,
                }
            }
            Command::AddTicket => {
                let discount = r.u32()?;
                Request::AddTicket {
                    name: r.str_prefixed()?,
                    discount,
                }
            }
            Command::RemoveTicket => Request::RemoveTicket { index: r.u32()? },
            Command::ChangeTicketPlace => Request::ChangeTicketPlace {
                index: r.u32()?,
                place: r.str_prefixed()?,
            },
            Command::ChangeTicketState => Request::ChangeTicketState {
                ticket_index: r.u32()?,
                game_index: r.u32()?,
                state: TicketState::try_from(r.u32()?)?,
                reserve_name: r.str_prefixed()?,
            },
            Command::GetAvailableTickets => Request::GetAvailableTickets {
                game_index: r.u32()?,
            },
            Command::ChangeMeetingInfo => Request::ChangeMeetingInfo {
                game_index: r.u32()?,
                when: r.str_terminated()?,
                place: r.str_terminated()?,
                info: r.str_terminated()?,
            },
            Command::GetMeetingInfo => Request::GetMeetingInfo {
                game_index: r.u32()?,
            },
            Command::AcceptMeeting => Request::AcceptMeeting {
                game_index: r.u32()?,
                accept: AcceptState::try_from(r.u32()?)?,
                accept_index: r.u32()?,
                name: r.str_terminated()?,
            },
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> GameChange {
        GameChange {
            index: 0,
            season_index: 12,
            competition: 1,
            home: "Home FC".into(),
            away: "Away United".into(),
            date: 1_500_000_000_000,
            score: "2:1".into(),
        }
    }

    #[test]
    fn get_version_layout() {
        let msg = Request::GetVersion {
            version: 0x0102_0300,
            version_text: "V1.2.3".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(msg.opcode(), 0x0003_0002);
        assert_eq!(&msg.payload()[..4], &0x0102_0300u32.to_le_bytes());
        assert_eq!(&msg.payload()[4..6], &[6, 0]);
        assert_eq!(&msg.payload()[6..], b"V1.2.3");
    }

    #[test]
    fn connect_user_is_raw_name() {
        let msg = Request::ConnectUser {
            user_name: "alice".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(msg.payload(), b"alice");
    }

    #[test]
    fn change_game_line() {
        let msg = Request::ChangeGame(game()).encode().unwrap();
        assert_eq!(
            msg.payload(),
            b"Home FC;Away United;1500000000000;2:1;0;12;1\0"
        );
    }

    #[test]
    fn decode_mirrors_encode() {
        let requests = [
            Request::ChangeGame(game()),
            Request::AddTicket {
                name: "Block A".into(),
                discount: 1,
            },
            Request::ChangeTicketState {
                ticket_index: 3,
                game_index: 9,
                state: TicketState::Reserved,
                reserve_name: "bob".into(),
            },
            Request::ChangeMeetingInfo {
                game_index: 4,
                when: "12:00".into(),
                place: "Station".into(),
                info: "".into(),
            },
            Request::AcceptMeeting {
                game_index: 4,
                accept: AcceptState::Maybe,
                accept_index: 0,
                name: "carol".into(),
            },
        ];
        for req in requests {
            let back = Request::decode(&req.encode().unwrap()).unwrap();
            assert_eq!(back, req);
        }
    }

    #[test]
    fn change_game_validation() {
        assert!(game().validate().is_ok());

        let mut g = game();
        g.season_index = MAX_SEASON_INDEX + 1;
        assert!(g.validate().is_err());

        let mut g = game();
        g.home.clear();
        assert!(g.validate().is_err());

        let mut g = game();
        g.score = "1;0".into();
        assert!(g.validate().is_err());

        let mut g = game();
        g.competition = 0;
        assert!(Request::ChangeGame(g).validate().is_err());
    }

    #[test]
    fn stale_refresh_targets() {
        assert_eq!(
            Request::GetGamesInfoList.stale_refresh().map(|r| r.command()),
            Some(Command::GetGamesList)
        );
        assert_eq!(
            Request::GetAvailableTickets { game_index: 1 }
                .stale_refresh()
                .map(|r| r.command()),
            Some(Command::GetTicketsList)
        );
        assert!(Request::GetUserProps.stale_refresh().is_none());
    }

    #[test]
    fn out_of_range_game_fields_are_rejected() {
        for line in [
            "H;A;0;;-1;12;1\0",
            "H;A;0;;0;4294967296;1\0",
            "H;A;0;;0;12;-7\0",
        ] {
            let msg = Message::new(Command::ChangeGame.request_opcode(), line.as_bytes().to_vec())
                .unwrap();
            assert!(
                matches!(Request::decode(&msg), Err(StamError::Encoding(_))),
                "{line:?}"
            );
        }
    }

    #[test]
    fn truncated_request_fails() {
        let msg = Message::new(Command::RemoveTicket.request_opcode(), vec![1u8, 2]).unwrap();
        assert!(Request::decode(&msg).is_err());
    }
}
