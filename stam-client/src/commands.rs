//! Subcommands and how their answers are printed.

use clap::Subcommand;
use stam_core::protocol::{AvailableTicket, GameEntry, MeetingInfo, TicketEntry, TicketState};
use stam_core::{Client, Response, ResponseBody, ResultCode, StamError};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Compare the program version with the server's.
    Version,
    /// Show permissions, user index and readable name.
    Props,
    /// List the games.
    Games {
        /// Past games to include.
        #[arg(long, default_value_t = 5)]
        past: u32,
    },
    /// List the season tickets.
    Tickets,
    /// Show every ticket's state for one game.
    Available { game: u32 },
    /// Show the meeting for one game.
    Meeting { game: u32 },
    /// Add a season ticket.
    AddTicket {
        name: String,
        #[arg(long, default_value_t = 0)]
        discount: u32,
    },
    /// Remove a season ticket.
    RemoveTicket { index: u32 },
    /// Rename a season ticket and set its place and discount.
    EditTicket {
        index: u32,
        name: String,
        place: String,
        #[arg(long, default_value_t = 0)]
        discount: u32,
    },
    /// Mark a game's kick-off time as final.
    FixTime {
        game: u32,
        /// Clear the mark instead.
        #[arg(long)]
        unset: bool,
    },
    /// Change the readable name.
    Readname { name: String },
}

/// Result code plus the lines to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub code: ResultCode,
    pub lines: Vec<String>,
}

impl Outcome {
    fn status(response: &Response) -> Self {
        Self {
            code: response.code,
            lines: Vec::new(),
        }
    }

    fn with_lines(response: &Response, lines: Vec<String>) -> Self {
        Self {
            code: response.code,
            lines,
        }
    }
}

/// Run `action` on a logged-in client.
pub async fn execute(client: &Client, action: &Action) -> Result<Outcome, StamError> {
    let outcome = match action {
        Action::Version => {
            let response = client.get_version().await?;
            let lines = match &response.body {
                ResponseBody::Version { version, text } => {
                    vec![format!("server {text} ({version:#010x})")]
                }
                _ => Vec::new(),
            };
            Outcome::with_lines(&response, lines)
        }
        Action::Props => {
            let response = client.user_properties().await?;
            let lines = match &response.body {
                ResponseBody::UserProps {
                    properties,
                    index,
                    readable_name,
                } => vec![
                    format!("name:       {readable_name}"),
                    format!("index:      {index}"),
                    format!("properties: {properties:?}"),
                ],
                _ => Vec::new(),
            };
            Outcome::with_lines(&response, lines)
        }
        Action::Games { past } => {
            let (response, games) = client.games_list(*past).await?;
            Outcome::with_lines(&response, games.iter().map(game_line).collect())
        }
        Action::Tickets => {
            let (response, tickets) = client.tickets_list().await?;
            Outcome::with_lines(&response, tickets.iter().map(ticket_line).collect())
        }
        Action::Available { game } => {
            let (response, tickets) = client.available_tickets(*game).await?;
            Outcome::with_lines(&response, tickets.iter().map(available_line).collect())
        }
        Action::Meeting { game } => {
            let (response, meeting) = client.meeting_info(*game).await?;
            Outcome::with_lines(&response, meeting.as_ref().map(meeting_lines).unwrap_or_default())
        }
        Action::AddTicket { name, discount } => {
            Outcome::status(&client.add_ticket(name.clone(), *discount).await?)
        }
        Action::RemoveTicket { index } => Outcome::status(&client.remove_ticket(*index).await?),
        Action::EditTicket {
            index,
            name,
            place,
            discount,
        } => Outcome::status(
            &client
                .change_ticket(*index, name.clone(), place.clone(), *discount)
                .await?,
        ),
        Action::FixTime { game, unset } => {
            Outcome::status(&client.set_fixed_game_time(*game, !*unset).await?)
        }
        Action::Readname { name } => {
            Outcome::status(&client.change_readable_name(name.clone()).await?)
        }
    };
    Ok(outcome)
}

// ── Rendering ────────────────────────────────────────────────────

pub fn game_line(game: &GameEntry) -> String {
    let score = if game.score.is_empty() { "-:-" } else { game.score.as_str() };
    let fixed = if game.time_fixed { ", fixed" } else { "" };
    format!(
        "#{:<4} {:>2}. {} - {}  {}  (kick-off {}{})",
        game.index, game.season_index, game.home, game.away, score, game.timestamp, fixed
    )
}

pub fn ticket_line(ticket: &TicketEntry) -> String {
    let discount = if ticket.discount > 0 { " (discount)" } else { "" };
    format!(
        "#{:<4} {} @ {}  owner {}{}",
        ticket.index, ticket.name, ticket.place, ticket.owner_index, discount
    )
}

pub fn available_line(ticket: &AvailableTicket) -> String {
    match ticket.state {
        TicketState::Free => format!("#{:<4} free", ticket.ticket_index),
        TicketState::Blocked => format!("#{:<4} blocked", ticket.ticket_index),
        TicketState::Reserved => {
            format!("#{:<4} reserved for {}", ticket.ticket_index, ticket.reserve_name)
        }
    }
}

pub fn meeting_lines(meeting: &MeetingInfo) -> Vec<String> {
    let mut lines = vec![
        format!("when:  {}", meeting.when),
        format!("where: {}", meeting.place),
        format!("info:  {}", meeting.info),
    ];
    lines.extend(
        meeting
            .accepts
            .iter()
            .map(|a| format!("  {:?}: {}", a.accept, a.name)),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use stam_core::protocol::{AcceptState, MeetingAccept};

    #[test]
    fn game_line_shows_placeholder_score() {
        let line = game_line(&GameEntry {
            index: 7,
            season_index: 3,
            competition: 1,
            time_fixed: false,
            timestamp: 0,
            home: "Home".into(),
            away: "Away".into(),
            score: String::new(),
        });
        assert!(line.contains("Home - Away"));
        assert!(line.contains("-:-"));
        assert!(line.ends_with("(kick-off 0)"));
    }

    #[test]
    fn game_line_marks_fixed_time() {
        let line = game_line(&GameEntry {
            index: 7,
            season_index: 3,
            competition: 1,
            time_fixed: true,
            timestamp: 42,
            home: "Home".into(),
            away: "Away".into(),
            score: "2:1".into(),
        });
        assert!(line.ends_with("(kick-off 42, fixed)"));
    }

    #[test]
    fn reserved_ticket_names_the_guest() {
        let line = available_line(&AvailableTicket {
            ticket_index: 4,
            state: TicketState::Reserved,
            reserve_name: "Carol".into(),
        });
        assert!(line.ends_with("reserved for Carol"));
    }

    #[test]
    fn meeting_lists_answers() {
        let lines = meeting_lines(&MeetingInfo {
            when: "12:00".into(),
            place: "Pub".into(),
            info: String::new(),
            accepts: vec![MeetingAccept {
                index: 1,
                accept: AcceptState::Maybe,
                name: "Dan".into(),
            }],
        });
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "  Maybe: Dan");
    }
}
