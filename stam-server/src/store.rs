//! In-memory data behind the handlers.
//!
//! Users, season tickets and games share one index space and live in one
//! list of [`Entry`] values; code that needs a particular kind matches on
//! the variant. Per-game ticket states and meetings are kept beside it.
//!
//! Every change to the games or the tickets bumps a revision counter.
//! Sessions remember the revision of the last list they sent, which is how
//! stale-list answers are decided.

use std::collections::HashMap;

use stam_core::UserProperties;
use stam_core::message::ResultCode;
use stam_core::protocol::{
    AcceptState, AvailableTicket, GameChange, GameEntry, GameInfoEntry, MeetingAccept,
    MeetingInfo, TicketEntry, TicketState,
};
use tracing::debug;

use crate::config::ServerConfig;

/// Store operations fail with the code sent back to the client.
pub type StoreResult<T> = Result<T, ResultCode>;

// ── Entries ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    SeasonTicket,
    Game,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub index: u32,
    pub name: String,
    pub password: String,
    pub readable_name: String,
    pub properties: UserProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonTicket {
    pub index: u32,
    pub owner_index: u32,
    pub name: String,
    pub place: String,
    pub discount: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub index: u32,
    pub home: String,
    pub away: String,
    pub timestamp: i64,
    pub season_index: u8,
    pub competition: u8,
    pub time_fixed: bool,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    User(User),
    SeasonTicket(SeasonTicket),
    Game(Game),
}

impl Entry {
    pub fn index(&self) -> u32 {
        match self {
            Entry::User(u) => u.index,
            Entry::SeasonTicket(t) => t.index,
            Entry::Game(g) => g.index,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::User(_) => EntryKind::User,
            Entry::SeasonTicket(_) => EntryKind::SeasonTicket,
            Entry::Game(_) => EntryKind::Game,
        }
    }

    fn set_index(&mut self, index: u32) {
        match self {
            Entry::User(u) => u.index = index,
            Entry::SeasonTicket(t) => t.index = index,
            Entry::Game(g) => g.index = index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TicketUse {
    state: TicketState,
    reserve_name: String,
}

// ── Store ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Store {
    entries: Vec<Entry>,
    next_index: u32,
    /// Keyed by `(game, ticket)`. Missing means blocked by the owner.
    ticket_uses: HashMap<(u32, u32), TicketUse>,
    meetings: HashMap<u32, MeetingInfo>,
    games_revision: u64,
    tickets_revision: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_index: 1,
            ticket_uses: HashMap::new(),
            meetings: HashMap::new(),
            games_revision: 1,
            tickets_revision: 1,
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the configured users and games.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut store = Self::new();
        for user in &config.users {
            store.insert(Entry::User(User {
                index: 0,
                name: user.name.clone(),
                password: user.password.clone(),
                readable_name: user.readable_name.clone(),
                properties: UserProperties::from_bits_truncate(user.properties),
            }));
        }
        for game in &config.games {
            store.insert(Entry::Game(Game {
                index: 0,
                home: game.home.clone(),
                away: game.away.clone(),
                timestamp: game.timestamp,
                season_index: game.season_index,
                competition: game.competition,
                time_fixed: false,
                score: game.score.clone(),
            }));
        }
        store
    }

    /// Add `entry` under a fresh index and return the index.
    pub fn insert(&mut self, mut entry: Entry) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        entry.set_index(index);
        debug!(index, kind = ?entry.kind(), "entry added");
        self.entries.push(entry);
        index
    }

    pub fn len(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn games_revision(&self) -> u64 {
        self.games_revision
    }

    pub fn tickets_revision(&self) -> u64 {
        self.tickets_revision
    }

    // ── Typed views ──────────────────────────────────────────────

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.entries.iter().filter_map(|e| match e {
            Entry::User(u) => Some(u),
            _ => None,
        })
    }

    pub fn tickets(&self) -> impl Iterator<Item = &SeasonTicket> {
        self.entries.iter().filter_map(|e| match e {
            Entry::SeasonTicket(t) => Some(t),
            _ => None,
        })
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Game(g) => Some(g),
            _ => None,
        })
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users().find(|u| u.name == name)
    }

    fn user_mut(&mut self, name: &str) -> StoreResult<&mut User> {
        self.entries
            .iter_mut()
            .find_map(|e| match e {
                Entry::User(u) if u.name == name => Some(u),
                _ => None,
            })
            .ok_or(ResultCode::NoUser)
    }

    pub fn ticket(&self, index: u32) -> Option<&SeasonTicket> {
        self.tickets().find(|t| t.index == index)
    }

    fn ticket_mut(&mut self, index: u32) -> StoreResult<&mut SeasonTicket> {
        self.entries
            .iter_mut()
            .find_map(|e| match e {
                Entry::SeasonTicket(t) if t.index == index => Some(t),
                _ => None,
            })
            .ok_or(ResultCode::NotFound)
    }

    pub fn game(&self, index: u32) -> Option<&Game> {
        self.games().find(|g| g.index == index)
    }

    fn game_mut(&mut self, index: u32) -> StoreResult<&mut Game> {
        self.entries
            .iter_mut()
            .find_map(|e| match e {
                Entry::Game(g) if g.index == index => Some(g),
                _ => None,
            })
            .ok_or(ResultCode::NotFound)
    }

    // ── Users ────────────────────────────────────────────────────

    pub fn set_password(&mut self, user: &str, password: &str) -> StoreResult<()> {
        self.user_mut(user)?.password = password.to_string();
        Ok(())
    }

    pub fn set_readable_name(&mut self, user: &str, name: &str) -> StoreResult<()> {
        self.user_mut(user)?.readable_name = name.to_string();
        Ok(())
    }

    // ── Season tickets ───────────────────────────────────────────

    pub fn add_ticket(&mut self, owner_index: u32, name: &str, discount: u32) -> StoreResult<u32> {
        if self.tickets().any(|t| t.name == name) {
            return Err(ResultCode::AlreadyExists);
        }
        let discount = u8::try_from(discount).map_err(|_| ResultCode::WrongParameter)?;
        let index = self.insert(Entry::SeasonTicket(SeasonTicket {
            index: 0,
            owner_index,
            name: name.to_string(),
            place: name.to_string(),
            discount,
        }));
        self.tickets_revision += 1;
        Ok(index)
    }

    pub fn remove_ticket(&mut self, index: u32) -> StoreResult<()> {
        let before = self.entries.len();
        self.entries
            .retain(|e| !matches!(e, Entry::SeasonTicket(t) if t.index == index));
        if self.entries.len() == before {
            return Err(ResultCode::NotFound);
        }
        self.ticket_uses.retain(|(_, ticket), _| *ticket != index);
        self.tickets_revision += 1;
        Ok(())
    }

    /// Rename a ticket and replace its place and discount.
    pub fn change_ticket(
        &mut self,
        index: u32,
        name: &str,
        place: &str,
        discount: u32,
    ) -> StoreResult<()> {
        if name.is_empty() {
            return Err(ResultCode::WrongParameter);
        }
        let discount = u8::try_from(discount).map_err(|_| ResultCode::WrongParameter)?;
        if self.tickets().any(|t| t.name == name && t.index != index) {
            return Err(ResultCode::AlreadyExists);
        }
        let ticket = self.ticket_mut(index)?;
        ticket.name = name.to_string();
        ticket.place = place.to_string();
        ticket.discount = discount;
        self.tickets_revision += 1;
        Ok(())
    }

    pub fn set_ticket_place(&mut self, index: u32, place: &str) -> StoreResult<()> {
        self.ticket_mut(index)?.place = place.to_string();
        self.tickets_revision += 1;
        Ok(())
    }

    pub fn tickets_list(&self) -> Vec<TicketEntry> {
        self.tickets()
            .map(|t| TicketEntry {
                index: t.index,
                owner_index: t.owner_index,
                discount: t.discount,
                name: t.name.clone(),
                place: t.place.clone(),
            })
            .collect()
    }

    fn ticket_state(&self, game: u32, ticket: u32) -> TicketState {
        self.ticket_uses
            .get(&(game, ticket))
            .map_or(TicketState::Blocked, |u| u.state)
    }

    /// Free, block or reserve `ticket` for `game` on behalf of `user_index`.
    ///
    /// Only the owner frees or blocks a ticket; anybody may reserve a free
    /// one.
    pub fn set_ticket_state(
        &mut self,
        user_index: u32,
        ticket: u32,
        game: u32,
        state: TicketState,
        reserve_name: &str,
    ) -> StoreResult<()> {
        let owner = self.ticket(ticket).ok_or(ResultCode::NotFound)?.owner_index;
        if self.game(game).is_none() {
            return Err(ResultCode::NotFound);
        }
        match state {
            TicketState::Reserved => {
                if reserve_name.is_empty() {
                    return Err(ResultCode::WrongParameter);
                }
                if self.ticket_state(game, ticket) != TicketState::Free {
                    return Err(ResultCode::MissingTicket);
                }
            }
            TicketState::Free | TicketState::Blocked if owner != user_index => {
                return Err(ResultCode::WrongParameter);
            }
            TicketState::Free | TicketState::Blocked => {}
        }
        let reserve_name = match state {
            TicketState::Reserved => reserve_name.to_string(),
            _ => String::new(),
        };
        self.ticket_uses
            .insert((game, ticket), TicketUse { state, reserve_name });
        Ok(())
    }

    pub fn available_tickets(&self, game: u32) -> StoreResult<Vec<AvailableTicket>> {
        if self.game(game).is_none() {
            return Err(ResultCode::NotFound);
        }
        Ok(self
            .tickets()
            .map(|t| {
                let (state, reserve_name) = match self.ticket_uses.get(&(game, t.index)) {
                    Some(u) => (u.state, u.reserve_name.clone()),
                    None => (TicketState::Blocked, String::new()),
                };
                AvailableTicket {
                    ticket_index: t.index,
                    state,
                    reserve_name,
                }
            })
            .collect())
    }

    // ── Games ────────────────────────────────────────────────────

    /// Add a game (`index == 0`) or replace an existing one.
    pub fn change_game(&mut self, change: &GameChange) -> StoreResult<u32> {
        if change.validate().is_err() {
            return Err(ResultCode::WrongParameter);
        }
        let season_index = u8::try_from(change.season_index).map_err(|_| ResultCode::WrongParameter)?;
        let competition = u8::try_from(change.competition).map_err(|_| ResultCode::WrongParameter)?;
        let game = Game {
            index: change.index,
            home: change.home.clone(),
            away: change.away.clone(),
            timestamp: change.date,
            season_index,
            competition,
            time_fixed: false,
            score: change.score.clone(),
        };

        let index = if change.index == 0 {
            if self
                .games()
                .any(|g| g.home == game.home && g.away == game.away && g.season_index == season_index)
            {
                return Err(ResultCode::AlreadyExists);
            }
            self.insert(Entry::Game(game))
        } else {
            let existing = self.game_mut(change.index)?;
            *existing = Game {
                time_fixed: existing.time_fixed,
                ..game
            };
            change.index
        };
        self.games_revision += 1;
        Ok(index)
    }

    pub fn set_fixed_game_time(&mut self, index: u32, fixed: bool) -> StoreResult<()> {
        self.game_mut(index)?.time_fixed = fixed;
        self.games_revision += 1;
        Ok(())
    }

    /// Games ordered by kick-off, keeping at most `max_past_games` games
    /// before `now_ms`.
    pub fn games_list(&self, max_past_games: u32, now_ms: i64) -> Vec<GameEntry> {
        let mut games: Vec<&Game> = self.games().collect();
        games.sort_by_key(|g| g.timestamp);
        let past = games.iter().filter(|g| g.timestamp < now_ms).count();
        let skip = past.saturating_sub(max_past_games as usize);
        games
            .into_iter()
            .skip(skip)
            .map(|g| GameEntry {
                index: g.index,
                season_index: g.season_index,
                competition: g.competition,
                time_fixed: g.time_fixed,
                timestamp: g.timestamp,
                home: g.home.clone(),
                away: g.away.clone(),
                score: g.score.clone(),
            })
            .collect()
    }

    pub fn games_info(&self) -> Vec<GameInfoEntry> {
        self.games()
            .map(|g| {
                let mut info = GameInfoEntry {
                    game_index: g.index,
                    free_tickets: 0,
                    blocked_tickets: 0,
                    reserved_tickets: 0,
                    accepted_meetings: 0,
                };
                for t in self.tickets() {
                    match self.ticket_state(g.index, t.index) {
                        TicketState::Free => info.free_tickets += 1,
                        TicketState::Blocked => info.blocked_tickets += 1,
                        TicketState::Reserved => info.reserved_tickets += 1,
                    }
                }
                if let Some(meeting) = self.meetings.get(&g.index) {
                    info.accepted_meetings = meeting
                        .accepts
                        .iter()
                        .filter(|a| a.accept == AcceptState::Accept)
                        .count() as u16;
                }
                info
            })
            .collect()
    }

    // ── Meetings ─────────────────────────────────────────────────

    pub fn set_meeting(&mut self, game: u32, when: &str, place: &str, info: &str) -> StoreResult<()> {
        if self.game(game).is_none() {
            return Err(ResultCode::NotFound);
        }
        let meeting = self.meetings.entry(game).or_default();
        meeting.when = when.to_string();
        meeting.place = place.to_string();
        meeting.info = info.to_string();
        Ok(())
    }

    pub fn meeting(&self, game: u32) -> StoreResult<&MeetingInfo> {
        self.meetings.get(&game).ok_or(ResultCode::NotFound)
    }

    /// Record an answer. `accept_index == 0` adds a new one, anything else
    /// updates that answer. Returns the answer's index.
    pub fn accept_meeting(
        &mut self,
        game: u32,
        accept: AcceptState,
        accept_index: u32,
        name: &str,
    ) -> StoreResult<u32> {
        if name.is_empty() {
            return Err(ResultCode::WrongParameter);
        }
        let meeting = self.meetings.get_mut(&game).ok_or(ResultCode::NotFound)?;
        if accept_index == 0 {
            let index = meeting.accepts.iter().map(|a| a.index).max().unwrap_or(0) + 1;
            meeting.accepts.push(MeetingAccept {
                index,
                accept,
                name: name.to_string(),
            });
            return Ok(index);
        }
        let existing = meeting
            .accepts
            .iter_mut()
            .find(|a| a.index == accept_index)
            .ok_or(ResultCode::NotFound)?;
        existing.accept = accept;
        existing.name = name.to_string();
        Ok(accept_index)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameConfig, UserConfig};

    fn store() -> Store {
        let config = ServerConfig {
            users: vec![
                UserConfig {
                    name: "alice".into(),
                    password: "a".into(),
                    readable_name: "Alice".into(),
                    properties: 0x1,
                },
                UserConfig {
                    name: "bob".into(),
                    password: "b".into(),
                    ..UserConfig::default()
                },
            ],
            games: vec![GameConfig {
                home: "Home".into(),
                away: "Away".into(),
                timestamp: 1_000,
                season_index: 3,
                competition: 1,
                score: "-:-".into(),
            }],
            ..ServerConfig::default()
        };
        Store::from_config(&config)
    }

    #[test]
    fn shared_index_space() {
        let s = store();
        assert_eq!(s.user("alice").unwrap().index, 1);
        assert_eq!(s.user("bob").unwrap().index, 2);
        assert_eq!(s.games().next().unwrap().index, 3);
        assert_eq!(s.len(EntryKind::User), 2);
        assert_eq!(s.len(EntryKind::Game), 1);
        assert_eq!(s.len(EntryKind::SeasonTicket), 0);
        assert!(s.user("alice").unwrap().properties.contains(UserProperties::ENABLE_ADD_GAME));
    }

    #[test]
    fn ticket_lifecycle() {
        let mut s = store();
        let rev = s.tickets_revision();
        let t = s.add_ticket(1, "Block A", 0).unwrap();
        assert!(s.tickets_revision() > rev);
        assert_eq!(s.add_ticket(2, "Block A", 0), Err(ResultCode::AlreadyExists));
        assert_eq!(s.add_ticket(2, "Block B", 300), Err(ResultCode::WrongParameter));

        s.set_ticket_place(t, "Row 7").unwrap();
        assert_eq!(s.tickets_list()[0].place, "Row 7");

        s.remove_ticket(t).unwrap();
        assert_eq!(s.remove_ticket(t), Err(ResultCode::NotFound));
        assert!(s.tickets_list().is_empty());
    }

    #[test]
    fn change_ticket_renames_and_checks_names() {
        let mut s = store();
        let a = s.add_ticket(1, "Block A", 0).unwrap();
        s.add_ticket(2, "Block B", 0).unwrap();

        let rev = s.tickets_revision();
        s.change_ticket(a, "Block C", "Row 1", 2).unwrap();
        assert!(s.tickets_revision() > rev);
        let ticket = s.ticket(a).unwrap();
        assert_eq!((ticket.name.as_str(), ticket.place.as_str(), ticket.discount), ("Block C", "Row 1", 2));

        // Keeping its own name is fine.
        assert_eq!(s.change_ticket(a, "Block C", "Row 2", 0), Ok(()));
        assert_eq!(s.change_ticket(a, "Block B", "", 0), Err(ResultCode::AlreadyExists));
        assert_eq!(s.change_ticket(a, "", "", 0), Err(ResultCode::WrongParameter));
        assert_eq!(s.change_ticket(a, "Block D", "", 256), Err(ResultCode::WrongParameter));
        assert_eq!(s.change_ticket(99, "Block D", "", 0), Err(ResultCode::NotFound));
    }

    #[test]
    fn ticket_states_per_game() {
        let mut s = store();
        let game = 3;
        let t = s.add_ticket(1, "Block A", 0).unwrap();

        // Blocked until the owner frees it.
        assert_eq!(
            s.set_ticket_state(2, t, game, TicketState::Reserved, "Bob"),
            Err(ResultCode::MissingTicket)
        );
        assert_eq!(
            s.set_ticket_state(2, t, game, TicketState::Free, ""),
            Err(ResultCode::WrongParameter)
        );
        s.set_ticket_state(1, t, game, TicketState::Free, "").unwrap();
        assert_eq!(
            s.set_ticket_state(2, t, game, TicketState::Reserved, ""),
            Err(ResultCode::WrongParameter)
        );
        s.set_ticket_state(2, t, game, TicketState::Reserved, "Bob").unwrap();

        let available = s.available_tickets(game).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].state, TicketState::Reserved);
        assert_eq!(available[0].reserve_name, "Bob");

        let info = s.games_info();
        assert_eq!(info[0].reserved_tickets, 1);
        assert_eq!(info[0].free_tickets, 0);

        assert_eq!(s.available_tickets(99), Err(ResultCode::NotFound));
        assert_eq!(
            s.set_ticket_state(1, 99, game, TicketState::Free, ""),
            Err(ResultCode::NotFound)
        );
    }

    #[test]
    fn change_game_adds_and_edits() {
        let mut s = store();
        let mut change = GameChange {
            index: 0,
            season_index: 4,
            competition: 1,
            home: "Home".into(),
            away: "Other".into(),
            date: 5_000,
            score: String::new(),
        };
        let rev = s.games_revision();
        let index = s.change_game(&change).unwrap();
        assert!(s.games_revision() > rev);
        assert_eq!(s.change_game(&change), Err(ResultCode::AlreadyExists));

        change.index = index;
        change.score = "1:0".into();
        assert_eq!(s.change_game(&change), Ok(index));
        assert_eq!(s.game(index).unwrap().score, "1:0");

        change.index = 999;
        assert_eq!(s.change_game(&change), Err(ResultCode::NotFound));
        change.index = index;
        change.season_index = 40;
        assert_eq!(s.change_game(&change), Err(ResultCode::WrongParameter));
    }

    #[test]
    fn fixed_time_survives_game_edits() {
        let mut s = store();
        let rev = s.games_revision();
        s.set_fixed_game_time(3, true).unwrap();
        assert!(s.games_revision() > rev);
        assert!(s.games_list(10, 0)[0].time_fixed);

        s.change_game(&GameChange {
            index: 3,
            season_index: 3,
            competition: 1,
            home: "Home".into(),
            away: "Away".into(),
            date: 2_000,
            score: "2:2".into(),
        })
        .unwrap();
        assert!(s.game(3).unwrap().time_fixed);

        s.set_fixed_game_time(3, false).unwrap();
        assert!(!s.game(3).unwrap().time_fixed);
        assert_eq!(s.set_fixed_game_time(99, true), Err(ResultCode::NotFound));
    }

    #[test]
    fn games_list_limits_past_games() {
        let mut s = store();
        for (i, ts) in [2_000i64, 3_000, 10_000].into_iter().enumerate() {
            s.change_game(&GameChange {
                index: 0,
                season_index: 10 + i as u32,
                competition: 1,
                home: "Home".into(),
                away: format!("Team {i}"),
                date: ts,
                score: String::new(),
            })
            .unwrap();
        }
        // Past at 5_000: 1_000, 2_000, 3_000.
        let list = s.games_list(1, 5_000);
        let stamps: Vec<i64> = list.iter().map(|g| g.timestamp).collect();
        assert_eq!(stamps, vec![3_000, 10_000]);
        assert_eq!(s.games_list(10, 5_000).len(), 4);
    }

    #[test]
    fn meetings() {
        let mut s = store();
        let game = 3;
        assert_eq!(s.meeting(game).unwrap_err(), ResultCode::NotFound);
        assert_eq!(
            s.accept_meeting(game, AcceptState::Accept, 0, "Alice"),
            Err(ResultCode::NotFound)
        );
        s.set_meeting(game, "12:00", "Pub", "bring scarf").unwrap();
        assert_eq!(s.set_meeting(99, "", "", ""), Err(ResultCode::NotFound));

        let first = s.accept_meeting(game, AcceptState::Maybe, 0, "Alice").unwrap();
        let second = s.accept_meeting(game, AcceptState::Accept, 0, "Bob").unwrap();
        assert_ne!(first, second);
        s.accept_meeting(game, AcceptState::Accept, first, "Alice").unwrap();
        assert_eq!(
            s.accept_meeting(game, AcceptState::Accept, 42, "X"),
            Err(ResultCode::NotFound)
        );

        let meeting = s.meeting(game).unwrap();
        assert_eq!(meeting.place, "Pub");
        assert_eq!(meeting.accepts.len(), 2);
        assert_eq!(s.games_info()[0].accepted_meetings, 2);
    }

    #[test]
    fn user_updates() {
        let mut s = store();
        s.set_password("alice", "new").unwrap();
        s.set_readable_name("alice", "Ally").unwrap();
        let alice = s.user("alice").unwrap();
        assert_eq!(alice.password, "new");
        assert_eq!(alice.readable_name, "Ally");
        assert_eq!(s.set_password("nobody", "x"), Err(ResultCode::NoUser));
    }
}
