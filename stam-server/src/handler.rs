//! Request handling for one data session.
//!
//! [`Handler::handle`] turns one request frame into at most one ack frame.
//! It does no IO, so sessions stay a thin loop around it and the handlers
//! can be tested without sockets.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use stam_core::message::{ACK_NOT_LOGGED_IN, Command, ResultCode};
use stam_core::protocol::{ListItem, Request, Response, ResponseBody, encode_list};
use stam_core::{Message, StamError, login_material};
use tracing::{debug, info, warn};

use crate::store::{Store, StoreResult};

// ── SessionContext ───────────────────────────────────────────────

/// What a data session knows about its user.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_name: String,
    /// Challenge handed out with the session port.
    pub salt: String,
    pub random: String,
    pub logged_in: bool,
    /// Games revision of the last games list sent.
    seen_games: Option<u64>,
    /// Tickets revision of the last tickets list sent.
    seen_tickets: Option<u64>,
}

impl SessionContext {
    pub fn new(user_name: impl Into<String>, salt: impl Into<String>, random: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            salt: salt.into(),
            random: random.into(),
            logged_in: false,
            seen_games: None,
            seen_tickets: None,
        }
    }

    fn verifies(&self, password: &str, material: &str) -> bool {
        login_material(password, &self.salt, &self.random) == material
    }
}

// ── Handler ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Handler {
    store: Arc<Mutex<Store>>,
    version: u32,
    version_text: String,
}

impl Handler {
    pub fn new(store: Arc<Mutex<Store>>, version: u32, version_text: impl Into<String>) -> Self {
        Self {
            store,
            version,
            version_text: version_text.into(),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer one request frame. `None` means the frame is dropped.
    pub fn handle(&self, ctx: &mut SessionContext, message: &Message, now_ms: i64) -> Option<Message> {
        let command = match Command::from_request(message.opcode()) {
            Ok(c) => c,
            Err(e) => {
                warn!(user = %ctx.user_name, error = %e, "unknown request dropped");
                return None;
            }
        };
        if command != Command::LoginUser && !ctx.logged_in {
            debug!(user = %ctx.user_name, %command, "request before login");
            return Some(Message::empty(ACK_NOT_LOGGED_IN));
        }

        let response = match Request::decode(message) {
            Ok(request) => self.dispatch(ctx, request, now_ms),
            Err(e) => {
                warn!(user = %ctx.user_name, %command, error = %e, "malformed request");
                Response::local(command, ResultCode::WrongSize)
            }
        };
        debug!(user = %ctx.user_name, %command, code = %response.code, "answered");

        match response.encode() {
            Ok(ack) => Some(ack),
            Err(e) => {
                warn!(%command, error = %e, "cannot encode ack");
                Response::local(command, ResultCode::Common).encode().ok()
            }
        }
    }

    fn dispatch(&self, ctx: &mut SessionContext, request: Request, now_ms: i64) -> Response {
        let command = request.command();
        match request {
            Request::ConnectUser { .. } => {
                warn!(user = %ctx.user_name, "connect request on a session port");
                Response::local(command, ResultCode::WrongParameter)
            }
            Request::Login { material } => self.login(ctx, &material),
            Request::GetVersion {
                version,
                version_text,
            } => {
                info!(user = %ctx.user_name, version = format_args!("{version:#010x}"), %version_text, "client version");
                Response::new(
                    command,
                    ResultCode::Success,
                    ResponseBody::Version {
                        version: self.version,
                        text: self.version_text.clone(),
                    },
                )
            }
            Request::GetUserProps => match self.store().user(&ctx.user_name) {
                Some(user) => Response::new(
                    command,
                    ResultCode::Success,
                    ResponseBody::UserProps {
                        properties: user.properties,
                        index: user.index,
                        readable_name: user.readable_name.clone(),
                    },
                ),
                None => Response::local(command, ResultCode::NoUser),
            },
            Request::ChangePassword {
                old_material,
                new_password,
            } => self.change_password(ctx, &old_material, &new_password),
            Request::ChangeReadableName { name } => {
                if name.is_empty() {
                    return Response::local(command, ResultCode::WrongParameter);
                }
                status(command, self.store().set_readable_name(&ctx.user_name, &name))
            }
            Request::GetGamesList { max_past_games } => {
                let store = self.store();
                ctx.seen_games = Some(store.games_revision());
                list(command, &store.games_list(max_past_games, now_ms))
            }
            Request::GetGamesInfoList => {
                let store = self.store();
                if ctx.seen_games != Some(store.games_revision()) {
                    return Response::local(command, ResultCode::UpdateList);
                }
                list(command, &store.games_info())
            }
            Request::ChangeGame(change) => {
                let result = self.store().change_game(&change);
                if let Ok(index) = result {
                    info!(user = %ctx.user_name, index, home = %change.home, away = %change.away, "game changed");
                }
                status(command, result)
            }
            Request::SetFixedGameTime { game_index, fixed } => {
                let result = self.store().set_fixed_game_time(game_index, fixed);
                if result.is_ok() {
                    info!(user = %ctx.user_name, game = game_index, fixed, "game time fixed");
                }
                status(command, result)
            }
            Request::GetTicketsList => {
                let store = self.store();
                ctx.seen_tickets = Some(store.tickets_revision());
                list(command, &store.tickets_list())
            }
            Request::AddTicket { name, discount } => {
                let mut store = self.store();
                let Some(owner) = store.user(&ctx.user_name).map(|u| u.index) else {
                    return Response::local(command, ResultCode::NoUser);
                };
                let result = store.add_ticket(owner, &name, discount);
                if result.is_ok() {
                    info!(user = %ctx.user_name, ticket = %name, "season ticket added");
                }
                status(command, result)
            }
            Request::RemoveTicket { index } => status(command, self.store().remove_ticket(index)),
            Request::ChangeTicket {
                index,
                name,
                place,
                discount,
            } => status(
                command,
                self.store().change_ticket(index, &name, &place, discount),
            ),
            Request::ChangeTicketPlace { index, place } => {
                status(command, self.store().set_ticket_place(index, &place))
            }
            Request::ChangeTicketState {
                ticket_index,
                game_index,
                state,
                reserve_name,
            } => {
                let mut store = self.store();
                let Some(user) = store.user(&ctx.user_name).map(|u| u.index) else {
                    return Response::local(command, ResultCode::NoUser);
                };
                status(
                    command,
                    store.set_ticket_state(user, ticket_index, game_index, state, &reserve_name),
                )
            }
            Request::GetAvailableTickets { game_index } => {
                let store = self.store();
                if ctx.seen_tickets != Some(store.tickets_revision()) {
                    return Response::local(command, ResultCode::UpdateList);
                }
                match store.available_tickets(game_index) {
                    Ok(tickets) => list(command, &tickets),
                    Err(code) => Response::local(command, code),
                }
            }
            Request::ChangeMeetingInfo {
                game_index,
                when,
                place,
                info,
            } => status(
                command,
                self.store().set_meeting(game_index, &when, &place, &info),
            ),
            Request::GetMeetingInfo { game_index } => match self.store().meeting(game_index) {
                Ok(meeting) => data(command, meeting.encode()),
                Err(code) => Response::local(command, code),
            },
            Request::AcceptMeeting {
                game_index,
                accept,
                accept_index,
                name,
            } => status(
                command,
                self.store()
                    .accept_meeting(game_index, accept, accept_index, &name),
            ),
        }
    }

    fn login(&self, ctx: &mut SessionContext, material: &str) -> Response {
        let ok = self
            .store()
            .user(&ctx.user_name)
            .is_some_and(|u| ctx.verifies(&u.password, material));
        ctx.logged_in = ok;
        if ok {
            info!(user = %ctx.user_name, "logged in");
            Response::local(Command::LoginUser, ResultCode::Success)
        } else {
            warn!(user = %ctx.user_name, "login with wrong password");
            Response::local(Command::LoginUser, ResultCode::WrongPassword)
        }
    }

    fn change_password(&self, ctx: &SessionContext, old_material: &str, new_password: &str) -> Response {
        let command = Command::UserChangeLogin;
        let mut store = self.store();
        let Some(user) = store.user(&ctx.user_name) else {
            return Response::local(command, ResultCode::NoUser);
        };
        if !ctx.verifies(&user.password, old_material) {
            warn!(user = %ctx.user_name, "password change with wrong old password");
            return Response::local(command, ResultCode::WrongPassword);
        }
        if new_password.is_empty() {
            return Response::local(command, ResultCode::WrongParameter);
        }
        let result = store.set_password(&ctx.user_name, new_password);
        if result.is_ok() {
            info!(user = %ctx.user_name, "password changed");
        }
        status(command, result)
    }
}

// ── Response helpers ─────────────────────────────────────────────

fn status<T>(command: Command, result: StoreResult<T>) -> Response {
    let code = match result {
        Ok(_) => ResultCode::Success,
        Err(code) => code,
    };
    Response::local(command, code)
}

fn list<T: ListItem>(command: Command, items: &[T]) -> Response {
    data(command, encode_list(items))
}

fn data(command: Command, body: Result<Bytes, StamError>) -> Response {
    match body {
        Ok(bytes) => Response::new(command, ResultCode::Success, ResponseBody::Data(bytes)),
        Err(e) => {
            warn!(%command, error = %e, "cannot encode answer");
            Response::local(command, ResultCode::Common)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameConfig, ServerConfig, UserConfig};
    use stam_core::protocol::{
        AvailableTicket, GameEntry, GameInfoEntry, MeetingInfo, TicketEntry, TicketState,
        decode_list,
    };

    const NOW: i64 = 1_000_000;

    fn handler() -> Handler {
        let config = ServerConfig {
            users: vec![UserConfig {
                name: "alice".into(),
                password: "secret".into(),
                readable_name: "Alice".into(),
                properties: 0x81,
            }],
            games: vec![GameConfig {
                home: "Home".into(),
                away: "Away".into(),
                timestamp: NOW + 1,
                season_index: 1,
                competition: 1,
                score: String::new(),
            }],
            ..ServerConfig::default()
        };
        Handler::new(
            Arc::new(Mutex::new(Store::from_config(&config))),
            0x0001_0300,
            "V1.3.0",
        )
    }

    fn context() -> SessionContext {
        SessionContext::new("alice", "s", "r")
    }

    fn call(h: &Handler, ctx: &mut SessionContext, request: Request) -> Response {
        let command = request.command();
        let ack = h.handle(ctx, &request.encode().unwrap(), NOW).unwrap();
        Response::decode(command, &ack)
    }

    fn logged_in(h: &Handler) -> SessionContext {
        let mut ctx = context();
        let r = call(
            h,
            &mut ctx,
            Request::Login {
                material: login_material("secret", "s", "r"),
            },
        );
        assert_eq!(r.code, ResultCode::Success);
        ctx
    }

    #[test]
    fn requests_before_login_are_refused() {
        let h = handler();
        let mut ctx = context();
        let ack = h
            .handle(&mut ctx, &Request::GetUserProps.encode().unwrap(), NOW)
            .unwrap();
        assert_eq!(ack.opcode(), ACK_NOT_LOGGED_IN);
    }

    #[test]
    fn login_checks_material() {
        let h = handler();
        let mut ctx = context();
        let r = call(
            &h,
            &mut ctx,
            Request::Login {
                material: login_material("wrong", "s", "r"),
            },
        );
        assert_eq!(r.code, ResultCode::WrongPassword);
        assert!(!ctx.logged_in);

        // Same password, other challenge.
        let r = call(
            &h,
            &mut ctx,
            Request::Login {
                material: login_material("secret", "s", "other"),
            },
        );
        assert_eq!(r.code, ResultCode::WrongPassword);
        assert!(logged_in(&h).logged_in);
    }

    #[test]
    fn unknown_opcode_is_dropped() {
        let h = handler();
        let mut ctx = logged_in(&h);
        assert!(h.handle(&mut ctx, &Message::empty(0x0009_0001), NOW).is_none());
    }

    #[test]
    fn short_payload_is_wrong_size() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let msg = Message::empty(Command::RemoveTicket.request_opcode());
        let ack = h.handle(&mut ctx, &msg, NOW).unwrap();
        assert_eq!(
            Response::decode(Command::RemoveTicket, &ack).code,
            ResultCode::WrongSize
        );
    }

    #[test]
    fn version_and_props() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let r = call(
            &h,
            &mut ctx,
            Request::GetVersion {
                version: 0x0001_0200,
                version_text: "V1.2.0".into(),
            },
        );
        assert_eq!(
            r.body,
            ResponseBody::Version {
                version: 0x0001_0300,
                text: "V1.3.0".into()
            }
        );

        call(&h, &mut ctx, Request::ChangeReadableName { name: "Ally".into() });
        let r = call(&h, &mut ctx, Request::GetUserProps);
        match r.body {
            ResponseBody::UserProps {
                index,
                readable_name,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(readable_name, "Ally");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn games_info_is_stale_until_games_are_listed() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let r = call(&h, &mut ctx, Request::GetGamesInfoList);
        assert_eq!(r.code, ResultCode::UpdateList);

        let r = call(&h, &mut ctx, Request::GetGamesList { max_past_games: 5 });
        let games: Vec<GameEntry> = decode_list(r.data()).unwrap();
        assert_eq!(games.len(), 1);

        let r = call(&h, &mut ctx, Request::GetGamesInfoList);
        assert!(r.is_success());
        let info: Vec<GameInfoEntry> = decode_list(r.data()).unwrap();
        assert_eq!(info[0].game_index, games[0].index);
    }

    #[test]
    fn tickets_flow() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let r = call(
            &h,
            &mut ctx,
            Request::AddTicket {
                name: "Block A".into(),
                discount: 1,
            },
        );
        assert!(r.is_success());

        let r = call(&h, &mut ctx, Request::GetTicketsList);
        let tickets: Vec<TicketEntry> = decode_list(r.data()).unwrap();
        assert_eq!(tickets[0].owner_index, 1);
        let ticket = tickets[0].index;
        let game = 2;

        let r = call(
            &h,
            &mut ctx,
            Request::ChangeTicketState {
                ticket_index: ticket,
                game_index: game,
                state: TicketState::Free,
                reserve_name: String::new(),
            },
        );
        assert!(r.is_success());

        let r = call(&h, &mut ctx, Request::GetAvailableTickets { game_index: game });
        let available: Vec<AvailableTicket> = decode_list(r.data()).unwrap();
        assert_eq!(available[0].state, TicketState::Free);

        // A new ticket makes the cached list stale.
        call(
            &h,
            &mut ctx,
            Request::AddTicket {
                name: "Block B".into(),
                discount: 0,
            },
        );
        let r = call(&h, &mut ctx, Request::GetAvailableTickets { game_index: game });
        assert_eq!(r.code, ResultCode::UpdateList);
    }

    #[test]
    fn ticket_edit_and_fixed_time() {
        let h = handler();
        let mut ctx = logged_in(&h);
        call(
            &h,
            &mut ctx,
            Request::AddTicket {
                name: "Block A".into(),
                discount: 0,
            },
        );
        let r = call(&h, &mut ctx, Request::GetTicketsList);
        let ticket = decode_list::<TicketEntry>(r.data()).unwrap()[0].index;

        let r = call(
            &h,
            &mut ctx,
            Request::ChangeTicket {
                index: ticket,
                name: "Block Z".into(),
                place: "Row 9".into(),
                discount: 1,
            },
        );
        assert!(r.is_success());
        let r = call(&h, &mut ctx, Request::GetTicketsList);
        let tickets: Vec<TicketEntry> = decode_list(r.data()).unwrap();
        assert_eq!((tickets[0].name.as_str(), tickets[0].place.as_str()), ("Block Z", "Row 9"));

        let r = call(
            &h,
            &mut ctx,
            Request::SetFixedGameTime {
                game_index: 2,
                fixed: true,
            },
        );
        assert!(r.is_success());
        let r = call(&h, &mut ctx, Request::GetGamesList { max_past_games: 5 });
        let games: Vec<GameEntry> = decode_list(r.data()).unwrap();
        assert!(games[0].time_fixed);

        let r = call(
            &h,
            &mut ctx,
            Request::SetFixedGameTime {
                game_index: 77,
                fixed: true,
            },
        );
        assert_eq!(r.code, ResultCode::NotFound);
    }

    #[test]
    fn meeting_flow() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let r = call(&h, &mut ctx, Request::GetMeetingInfo { game_index: 2 });
        assert_eq!(r.code, ResultCode::NotFound);

        call(
            &h,
            &mut ctx,
            Request::ChangeMeetingInfo {
                game_index: 2,
                when: "12:00".into(),
                place: "Pub".into(),
                info: "".into(),
            },
        );
        let r = call(
            &h,
            &mut ctx,
            Request::AcceptMeeting {
                game_index: 2,
                accept: stam_core::protocol::AcceptState::Accept,
                accept_index: 0,
                name: "Alice".into(),
            },
        );
        assert!(r.is_success());

        let r = call(&h, &mut ctx, Request::GetMeetingInfo { game_index: 2 });
        let meeting = MeetingInfo::decode(r.data()).unwrap();
        assert_eq!(meeting.place, "Pub");
        assert_eq!(meeting.accepts.len(), 1);
        assert_eq!(meeting.accepts[0].name, "Alice");
    }

    #[test]
    fn password_change_needs_old_material() {
        let h = handler();
        let mut ctx = logged_in(&h);
        let r = call(
            &h,
            &mut ctx,
            Request::ChangePassword {
                old_material: login_material("nope", "s", "r"),
                new_password: "new".into(),
            },
        );
        assert_eq!(r.code, ResultCode::WrongPassword);

        let r = call(
            &h,
            &mut ctx,
            Request::ChangePassword {
                old_material: login_material("secret", "s", "r"),
                new_password: "new".into(),
            },
        );
        assert!(r.is_success());

        let mut fresh = context();
        let r = call(
            &h,
            &mut fresh,
            Request::Login {
                material: login_material("new", "s", "r"),
            },
        );
        assert!(r.is_success());
    }
}
