//! List bodies carried after the result code of list acks.
//!
//! Every list is a `u16` entry count followed by the entries. Meeting info
//! is a single record followed by its accept list.

use bytes::Bytes;

use crate::error::StamError;
use crate::protocol::request::{AcceptState, TicketState};

/// Competition byte bit marking a fixed kick-off time.
const TIME_FIXED_FLAG: u8 = 0x80;
use crate::protocol::{PayloadReader, PayloadWriter};

/// One entry of a list body.
pub trait ListItem: Sized {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError>;
    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError>;
}

pub fn encode_list<T: ListItem>(items: &[T]) -> Result<Bytes, StamError> {
    let count = u16::try_from(items.len())
        .map_err(|_| StamError::Encoding(format!("{} list entries", items.len())))?;
    let mut w = PayloadWriter::new();
    w.put_u16(count);
    for item in items {
        item.write(&mut w)?;
    }
    Ok(w.finish())
}

pub fn decode_list<T: ListItem>(data: &[u8]) -> Result<Vec<T>, StamError> {
    let mut r = PayloadReader::new(data);
    let count = r.u16()? as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::read(&mut r)?);
    }
    Ok(items)
}

// ── Games ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntry {
    pub index: u32,
    pub season_index: u8,
    pub competition: u8,
    /// The kick-off time is final.
    pub time_fixed: bool,
    /// Kick-off, unix milliseconds.
    pub timestamp: i64,
    pub home: String,
    pub away: String,
    pub score: String,
}

impl ListItem for GameEntry {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError> {
        w.put_u32(self.index)
            .put_u8(self.season_index)
            .put_u8(if self.time_fixed {
                self.competition | TIME_FIXED_FLAG
            } else {
                self.competition & !TIME_FIXED_FLAG
            })
            .put_i64(self.timestamp)
            .put_str_terminated(&format!("{};{};{}", self.home, self.away, self.score))?;
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError> {
        let index = r.u32()?;
        let season_index = r.u8()?;
        let competition = r.u8()?;
        let timestamp = r.i64()?;
        let line = r.str_terminated()?;
        let mut parts = line.splitn(3, ';');
        let mut next = || parts.next().unwrap_or_default().to_string();
        Ok(Self {
            index,
            season_index,
            competition: competition & !TIME_FIXED_FLAG,
            time_fixed: competition & TIME_FIXED_FLAG != 0,
            timestamp,
            home: next(),
            away: next(),
            score: next(),
        })
    }
}

/// Per-game counters shown next to the games list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameInfoEntry {
    pub game_index: u32,
    pub free_tickets: u16,
    pub blocked_tickets: u16,
    pub reserved_tickets: u16,
    pub accepted_meetings: u16,
}

impl ListItem for GameInfoEntry {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError> {
        w.put_u32(self.game_index)
            .put_u16(self.free_tickets)
            .put_u16(self.blocked_tickets)
            .put_u16(self.reserved_tickets)
            .put_u16(self.accepted_meetings);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError> {
        Ok(Self {
            game_index: r.u32()?,
            free_tickets: r.u16()?,
            blocked_tickets: r.u16()?,
            reserved_tickets: r.u16()?,
            accepted_meetings: r.u16()?,
        })
    }
}

// ── Tickets ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEntry {
    pub index: u32,
    pub owner_index: u32,
    pub discount: u8,
    pub name: String,
    pub place: String,
}

impl ListItem for TicketEntry {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError> {
        w.put_u32(self.index)
            .put_u32(self.owner_index)
            .put_u8(self.discount)
            .put_str_prefixed(&self.name)?
            .put_str_prefixed(&self.place)?;
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError> {
        Ok(Self {
            index: r.u32()?,
            owner_index: r.u32()?,
            discount: r.u8()?,
            name: r.str_prefixed()?,
            place: r.str_prefixed()?,
        })
    }
}

/// State of one ticket for the requested game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableTicket {
    pub ticket_index: u32,
    pub state: TicketState,
    pub reserve_name: String,
}

impl ListItem for AvailableTicket {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError> {
        w.put_u32(self.ticket_index)
            .put_u32(self.state as u32)
            .put_str_prefixed(&self.reserve_name)?;
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError> {
        Ok(Self {
            ticket_index: r.u32()?,
            state: TicketState::try_from(r.u32()?)?,
            reserve_name: r.str_prefixed()?,
        })
    }
}

// ── Meetings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingAccept {
    pub index: u32,
    pub accept: AcceptState,
    pub name: String,
}

impl ListItem for MeetingAccept {
    fn write(&self, w: &mut PayloadWriter) -> Result<(), StamError> {
        w.put_u32(self.index)
            .put_u32(self.accept as u32)
            .put_str_terminated(&self.name)?;
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, StamError> {
        Ok(Self {
            index: r.u32()?,
            accept: AcceptState::try_from(r.u32()?)?,
            name: r.str_terminated()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingInfo {
    pub when: String,
    pub place: String,
    pub info: String,
    pub accepts: Vec<MeetingAccept>,
}

impl MeetingInfo {
    pub fn encode(&self) -> Result<Bytes, StamError> {
        let mut w = PayloadWriter::new();
        w.put_str_terminated(&self.when)?
            .put_str_terminated(&self.place)?
            .put_str_terminated(&self.info)?;
        let accepts = encode_list(&self.accepts)?;
        w.put_bytes(&accepts);
        Ok(w.finish())
    }

    pub fn decode(data: &[u8]) -> Result<Self, StamError> {
        let mut r = PayloadReader::new(data);
        let when = r.str_terminated()?;
        let place = r.str_terminated()?;
        let info = r.str_terminated()?;
        let accepts = decode_list(r.rest())?;
        Ok(Self {
            when,
            place,
            info,
            accepts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn games_list_layout() {
        let games = vec![GameEntry {
            index: 3,
            season_index: 12,
            competition: 1,
            time_fixed: false,
            timestamp: 1_500_000_000_000,
            home: "Home".into(),
            away: "Away".into(),
            score: "1:0".into(),
        }];
        let bytes = encode_list(&games).unwrap();
        assert_eq!(&bytes[..2], &[1, 0]);
        assert_eq!(&bytes[2..6], &3u32.to_le_bytes());
        assert_eq!(decode_list::<GameEntry>(&bytes).unwrap(), games);
    }

    #[test]
    fn fixed_time_rides_on_competition_byte() {
        let game = GameEntry {
            index: 1,
            season_index: 2,
            competition: 3,
            time_fixed: true,
            timestamp: 0,
            home: "H".into(),
            away: "A".into(),
            score: String::new(),
        };
        let bytes = encode_list(std::slice::from_ref(&game)).unwrap();
        assert_eq!(bytes[2 + 4 + 1], 0x83);
        let back = decode_list::<GameEntry>(&bytes).unwrap();
        assert_eq!(back, vec![game]);
    }

    #[test]
    fn empty_list() {
        let bytes = encode_list::<TicketEntry>(&[]).unwrap();
        assert_eq!(&bytes[..], &[0, 0]);
        assert!(decode_list::<TicketEntry>(&bytes).unwrap().is_empty());
    }

    #[test]
    fn truncated_list_fails() {
        let bytes = encode_list(&[GameInfoEntry {
            game_index: 1,
            free_tickets: 2,
            blocked_tickets: 0,
            reserved_tickets: 1,
            accepted_meetings: 4,
        }])
        .unwrap();
        assert!(decode_list::<GameInfoEntry>(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn meeting_info_with_accepts() {
        let meeting = MeetingInfo {
            when: "12:30".into(),
            place: "Main station".into(),
            info: "bring scarves".into(),
            accepts: vec![MeetingAccept {
                index: 1,
                accept: AcceptState::Accept,
                name: "dave".into(),
            }],
        };
        let bytes = meeting.encode().unwrap();
        assert_eq!(MeetingInfo::decode(&bytes).unwrap(), meeting);
    }
}
