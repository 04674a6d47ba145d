//! Connection state machine.
//!
//! The machine does no I/O and reads no clock. The driver feeds it
//! [`Input`]s together with the current time and carries out the returned
//! [`Action`]s. Every input is accepted in every state; inputs that mean
//! nothing in the current state are logged and dropped.
//!
//! Requests go out one at a time on the data link. While one is in flight
//! the rest wait in a FIFO queue; anything that tears the session down
//! puts the in-flight request back at the front of that queue.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::StamError;
use crate::frame::Message;
use crate::message::{ACK_NOT_LOGGED_IN, Command, ResultCode};
use crate::protocol::{Request, Response, ResponseBody};
use crate::session::{SessionCredentials, SessionSnapshot};
use crate::state::connection::ConnectionState;
use crate::state::queue::{Origin, PendingRequest, RequestId, RequestQueue};

// ── Inputs / outputs ─────────────────────────────────────────────

/// Which socket a frame travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// The well-known discovery port.
    Discovery,
    /// The per-session port handed out by discovery.
    Data,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Discovery => write!(f, "discovery"),
            Link::Data => write!(f, "data"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Input {
    /// Log in as `user_name`. Answered with a `LoginUser` completion.
    Start {
        id: RequestId,
        user_name: String,
        password: String,
    },
    /// Queue a request.
    Submit { id: RequestId, request: Request },
    /// A frame arrived.
    Received { link: Link, message: Message },
    /// The data link requested by [`Action::OpenData`] is usable.
    DataLinkOpened,
    /// Time passed; check the deadline.
    Tick,
    /// A socket failed.
    TransportError { link: Link, reason: String },
    /// Tear everything down.
    Stop,
}

#[derive(Debug, Clone)]
pub enum Action {
    Send { link: Link, message: Message },
    /// Open the data link to the session port.
    OpenData { port: u16 },
    Close(Link),
    /// Final answer for a caller.
    Complete { id: RequestId, response: Response },
    Notify(ConnectionEvent),
}

/// Things a front end may want to show.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    LoginFinished(ResultCode),
    /// Answer to a list refresh the connection issued on its own.
    ListRefreshed(Response),
    /// Version or user properties fetched after a login.
    SessionInfo(Response),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Discovery,
    DataLink,
    Login,
    Request,
    Backoff,
}

// ── ConnectionMachine ────────────────────────────────────────────

#[derive(Debug)]
pub struct ConnectionMachine {
    config: ConnectionConfig,
    state: ConnectionState,
    credentials: Option<SessionCredentials>,

    queue: RequestQueue,
    in_flight: Option<PendingRequest>,
    /// `Start` callers waiting for the login outcome.
    login_waiters: Vec<RequestId>,

    timer: Option<(Timer, Instant)>,
    discovery_open: bool,
    data_open: bool,

    /// Ack opcode of the last completed request, for spotting duplicates.
    last_completed_ack: Option<u32>,
    login_timeouts: u32,
    login_reconnects: u32,

    actions: Vec<Action>,
}

impl ConnectionMachine {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            credentials: None,
            queue: RequestQueue::new(),
            in_flight: None,
            login_waiters: Vec::new(),
            timer: None,
            discovery_open: false,
            data_open: false,
            last_completed_ack: None,
            login_timeouts: 0,
            login_reconnects: 0,
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn session(&self) -> Option<SessionSnapshot> {
        self.credentials.as_ref().map(SessionCredentials::snapshot)
    }

    /// Requests waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<Command> {
        self.in_flight.as_ref().map(PendingRequest::command)
    }

    /// When the driver must deliver the next [`Input::Tick`].
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|(_, at)| at)
    }

    /// Feed one input and collect what must happen as a result.
    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        match input {
            Input::Start {
                id,
                user_name,
                password,
            } => self.start(id, user_name, password, now),
            Input::Submit { id, request } => self.submit(id, request, now),
            Input::Received { link, message } => match link {
                Link::Discovery => self.on_discovery_frame(message, now),
                Link::Data => self.on_data_frame(message, now),
            },
            Input::DataLinkOpened => self.on_data_link_opened(now),
            Input::Tick => self.on_tick(now),
            Input::TransportError { link, reason } => self.on_transport_error(link, &reason),
            Input::Stop => self.stop(),
        }
        std::mem::take(&mut self.actions)
    }

    // ── Caller inputs ────────────────────────────────────────────

    fn start(&mut self, id: RequestId, user_name: String, password: String, now: Instant) {
        let same = self
            .credentials
            .as_ref()
            .is_some_and(|c| c.matches(&user_name, &password));

        if same && self.state.is_ready() && self.within(self.config.login_window, now) {
            debug!(user = %user_name, "already logged in");
            self.complete(id, Response::local(Command::LoginUser, ResultCode::Success));
            return;
        }
        if !same {
            self.credentials = Some(SessionCredentials::new(user_name, password));
        }
        self.login_waiters.push(id);

        match self.state {
            ConnectionState::Idle | ConnectionState::Failed { .. } => self.begin_discovery(now),
            ConnectionState::Ready { .. } if same => self.begin_login(now),
            ConnectionState::Ready { .. } => self.begin_discovery(now),
            ConnectionState::Discovering
            | ConnectionState::AwaitingPort { .. }
            | ConnectionState::LoggingIn
                if !same =>
            {
                self.begin_discovery(now)
            }
            _ => debug!(state = %self.state, "login already in progress"),
        }
    }

    fn submit(&mut self, id: RequestId, request: Request, now: Instant) {
        let command = request.command();
        if !command.uses_data_link() || command == Command::LoginUser {
            warn!(%command, "connection commands cannot be submitted");
            self.complete(id, Response::local(command, ResultCode::WrongParameter));
            return;
        }
        if let Err(e) = request.validate() {
            debug!(%command, error = %e, "request rejected");
            self.complete(id, Response::local(command, ResultCode::WrongParameter));
            return;
        }
        if self.credentials.is_none() {
            self.complete(id, Response::local(command, ResultCode::NotLoggedIn));
            return;
        }

        self.queue
            .push_back(PendingRequest::new(Origin::Caller(id), request));
        match self.state {
            ConnectionState::Ready { .. } => self.pump(now),
            ConnectionState::Idle | ConnectionState::Failed { .. } => self.begin_discovery(now),
            _ => debug!(%command, queued = self.queue.len(), "request queued"),
        }
    }

    fn stop(&mut self) {
        self.timer = None;
        self.close_data();
        self.close_discovery();
        self.login_reconnects = 0;
        if let Some(creds) = self.credentials.as_mut() {
            creds.reset_success();
        }
        self.enter(ConnectionState::Idle);
        self.resolve_all(ResultCode::ConnectionClosed);
    }

    // ── Discovery ────────────────────────────────────────────────

    fn begin_discovery(&mut self, now: Instant) {
        self.requeue_in_flight();
        self.close_data();

        let Some(creds) = self.credentials.as_ref() else {
            warn!("discovery without credentials");
            return;
        };
        let request = Request::ConnectUser {
            user_name: creds.user_name().to_string(),
        };
        let message = match request.encode() {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cannot encode connect request");
                self.fail_connection(ResultCode::WrongParameter);
                return;
            }
        };

        self.enter(ConnectionState::Discovering);
        self.discovery_open = true;
        self.actions.push(Action::Send {
            link: Link::Discovery,
            message,
        });
        self.arm(Timer::Discovery, now + self.config.discovery_timeout);
    }

    fn on_discovery_frame(&mut self, message: Message, now: Instant) {
        if self.state != ConnectionState::Discovering {
            debug!(?message, state = %self.state, "discovery frame ignored");
            return;
        }
        if message.opcode() != Command::ConnectUser.ack_opcode() {
            warn!(?message, "unexpected frame on discovery link");
            return;
        }

        let Response { code, body, .. } = Response::decode(Command::ConnectUser, &message);
        match body {
            ResponseBody::Connect { port, salt, random } if code.is_success() => {
                if let Some(creds) = self.credentials.as_mut() {
                    creds.set_challenge(salt, random);
                }
                info!(port, "session port received");
                self.timer = None;
                self.enter(ConnectionState::AwaitingPort { port });
                self.data_open = true;
                self.actions.push(Action::OpenData { port });
                self.arm(Timer::DataLink, now + self.config.request_timeout);
            }
            _ => {
                let code = if code.is_success() {
                    ResultCode::MalformedResponse
                } else {
                    code
                };
                warn!(%code, "discovery refused");
                self.fail_connection(code);
            }
        }
    }

    fn on_data_link_opened(&mut self, now: Instant) {
        match self.state {
            ConnectionState::AwaitingPort { .. } => {
                self.timer = None;
                self.begin_login(now);
            }
            _ => debug!(state = %self.state, "data link ready ignored"),
        }
    }

    // ── Login ────────────────────────────────────────────────────

    fn begin_login(&mut self, now: Instant) {
        self.requeue_in_flight();
        self.login_timeouts = 0;
        self.enter(ConnectionState::LoggingIn);
        self.send_login(now);
    }

    fn send_login(&mut self, now: Instant) {
        let Some(creds) = self.credentials.as_ref() else {
            warn!("login without credentials");
            return;
        };
        let request = Request::Login {
            material: creds.material(),
        };
        match request.encode() {
            Ok(message) => {
                debug!(user = %creds.user_name(), "login sent");
                self.actions.push(Action::Send {
                    link: Link::Data,
                    message,
                });
                self.arm(Timer::Login, now + self.config.request_timeout);
            }
            Err(e) => {
                warn!(error = %e, "cannot encode login");
                self.login_failed(ResultCode::WrongParameter);
            }
        }
    }

    fn on_login_frame(&mut self, message: Message, now: Instant) {
        if message.opcode() != Command::LoginUser.ack_opcode() {
            debug!(?message, "frame ignored while logging in");
            return;
        }
        self.timer = None;
        let response = Response::decode(Command::LoginUser, &message);
        if response.is_success() {
            self.login_succeeded(now);
        } else {
            self.login_failed(response.code);
        }
    }

    fn login_succeeded(&mut self, now: Instant) {
        if let Some(creds) = self.credentials.as_mut() {
            creds.mark_success(now);
        }
        self.login_timeouts = 0;
        self.login_reconnects = 0;
        self.enter(ConnectionState::Ready { since: now });

        if self.config.fetch_after_login && !self.login_waiters.is_empty() {
            self.queue_session_info();
        }
        for id in std::mem::take(&mut self.login_waiters) {
            self.complete(id, Response::local(Command::LoginUser, ResultCode::Success));
        }
        self.notify(ConnectionEvent::LoginFinished(ResultCode::Success));
        self.pump(now);
    }

    /// Version first, then properties, ahead of queued requests.
    fn queue_session_info(&mut self) {
        let requests = [
            Request::GetUserProps,
            Request::GetVersion {
                version: self.config.local_version,
                version_text: self.config.local_version_text.clone(),
            },
        ];
        for request in requests {
            let command = request.command();
            let in_flight = self
                .in_flight
                .as_ref()
                .is_some_and(|p| p.origin == Origin::SessionInfo && p.command() == command);
            if !in_flight && !self.queue.contains(Origin::SessionInfo, command) {
                self.queue
                    .push_front(PendingRequest::new(Origin::SessionInfo, request));
            }
        }
    }

    /// Wrong credentials are not retried; new ones have to be supplied.
    fn login_failed(&mut self, code: ResultCode) {
        warn!(%code, "login failed");
        self.timer = None;
        self.close_data();
        self.login_reconnects = 0;
        self.credentials = None;
        self.enter(ConnectionState::Idle);
        self.resolve_all(code);
        self.notify(ConnectionEvent::LoginFinished(code));
    }

    fn on_login_timeout(&mut self, now: Instant) {
        self.login_timeouts += 1;
        if self.login_timeouts < self.config.timeouts_before_reconnect {
            info!(attempt = self.login_timeouts, "login timed out, resending");
            self.send_login(now);
        } else if self.login_reconnects < self.config.max_reconnects {
            self.login_reconnects += 1;
            info!("login timed out again, reconnecting");
            self.schedule_reconnect(now);
        } else {
            self.fail_connection(ResultCode::Timeout);
        }
    }

    // ── Requests ─────────────────────────────────────────────────

    fn on_data_frame(&mut self, message: Message, now: Instant) {
        match self.state {
            ConnectionState::LoggingIn => self.on_login_frame(message, now),
            ConnectionState::Ready { .. } => self.on_ready_frame(message, now),
            _ => debug!(?message, state = %self.state, "data frame ignored"),
        }
    }

    fn on_ready_frame(&mut self, message: Message, now: Instant) {
        let opcode = message.opcode();
        if opcode == ACK_NOT_LOGGED_IN {
            let Some(mut pending) = self.in_flight.take() else {
                debug!("not-logged-in ack with nothing in flight");
                return;
            };
            self.timer = None;
            if pending.relogins < self.config.stale_retry_limit {
                pending.relogins += 1;
                info!(attempt = pending.relogins, "server lost the session, logging in again");
                self.in_flight = Some(pending);
                if let Some(creds) = self.credentials.as_mut() {
                    creds.reset_success();
                }
                self.begin_login(now);
            } else {
                let command = pending.command();
                warn!(%command, "server keeps refusing the session, giving up");
                self.resolve(pending, Response::local(command, ResultCode::NotLoggedIn));
                self.pump(now);
            }
            return;
        }

        let expected = self.in_flight.as_ref().map(|p| p.command().ack_opcode());
        if Some(opcode) == expected {
            if let Some(pending) = self.in_flight.take() {
                self.timer = None;
                self.finish(pending, &message, now);
            }
        } else if Some(opcode) == self.last_completed_ack {
            debug!(?message, "late duplicate ack ignored");
        } else if let Some(pending) = self.in_flight.take() {
            warn!(?message, expected = %pending.command(), "unexpected ack");
            self.timer = None;
            let command = pending.command();
            self.resolve(
                pending,
                Response::local(command, ResultCode::MalformedResponse),
            );
            self.pump(now);
        } else {
            debug!(?message, "unsolicited frame ignored");
        }
    }

    fn finish(&mut self, pending: PendingRequest, message: &Message, now: Instant) {
        let command = pending.command();
        let mut response = Response::decode(command, message);
        if command == Command::GetVersion {
            response = response.with_version_check(self.config.local_version);
        }
        if let Some(creds) = self.credentials.as_mut() {
            creds.mark_success(now);
        }
        self.last_completed_ack = Some(command.ack_opcode());

        if response.code.is_stale_list() {
            match pending.request.stale_refresh() {
                Some(refresh) if pending.stale_retries < self.config.stale_retry_limit => {
                    info!(%command, retry = pending.stale_retries + 1, "list outdated, refreshing");
                    let mut retry = pending;
                    retry.stale_retries += 1;
                    retry.timeouts = 0;
                    self.queue.push_front(retry);
                    self.queue
                        .push_front(PendingRequest::new(Origin::Refresh, refresh));
                    self.pump(now);
                    return;
                }
                Some(_) => warn!(%command, "list still outdated, giving up"),
                None => {}
            }
        }

        if let Request::ChangePassword { new_password, .. } = &pending.request {
            if response.is_success() {
                if let Some(creds) = self.credentials.as_mut() {
                    creds.set_password(new_password.clone());
                }
            }
        }

        debug!(%command, code = %response.code, "request finished");
        self.resolve(pending, response);
        self.pump(now);
    }

    /// Send the next queued request if the session allows it.
    fn pump(&mut self, now: Instant) {
        while self.state.is_ready() && self.in_flight.is_none() {
            let Some(pending) = self.queue.pop_front() else {
                return;
            };

            if !self.within(self.config.reset_window, now) {
                info!("session expired, rediscovering");
                self.queue.push_front(pending);
                self.schedule_reconnect(now);
                return;
            }
            if !self.within(self.config.login_window, now) {
                info!("login expired, logging in again");
                self.queue.push_front(pending);
                self.begin_login(now);
                return;
            }

            match self.encode_request(&pending.request) {
                Ok(message) => {
                    debug!(command = %pending.command(), "request sent");
                    self.arm(Timer::Request, now + self.config.request_timeout);
                    self.actions.push(Action::Send {
                        link: Link::Data,
                        message,
                    });
                    self.in_flight = Some(pending);
                }
                Err(e) => {
                    let command = pending.command();
                    warn!(%command, error = %e, "cannot encode request");
                    self.resolve(pending, Response::local(command, ResultCode::WrongParameter));
                }
            }
        }
    }

    fn on_request_timeout(&mut self, now: Instant) {
        let Some(mut pending) = self.in_flight.take() else {
            return;
        };
        let command = pending.command();
        pending.timeouts += 1;

        if pending.timeouts < self.config.timeouts_before_reconnect {
            info!(%command, attempt = pending.timeouts, "request timed out, resending");
            self.in_flight = Some(pending);
            self.resend_in_flight(now);
        } else if pending.reconnects < self.config.max_reconnects {
            info!(%command, "request timed out again, reconnecting");
            pending.reconnects += 1;
            pending.timeouts = 0;
            self.queue.push_front(pending);
            self.schedule_reconnect(now);
        } else {
            warn!(%command, "request abandoned after reconnect");
            self.resolve(pending, Response::local(command, ResultCode::Timeout));
            self.close_data();
            if let Some(creds) = self.credentials.as_mut() {
                creds.reset_success();
            }
            if self.queue.is_empty() {
                self.close_discovery();
                self.login_reconnects = 0;
                self.enter(ConnectionState::Failed {
                    code: ResultCode::Timeout,
                });
            } else {
                self.begin_discovery(now);
            }
        }
    }

    fn resend_in_flight(&mut self, now: Instant) {
        let Some(request) = self.in_flight.as_ref().map(|p| &p.request) else {
            return;
        };
        match self.encode_request(request) {
            Ok(message) => {
                if let Some(pending) = self.in_flight.as_mut() {
                }
                self.actions.push(Action::Send {
                    link: Link::Data,
                    message,
                });
                self.arm(Timer::Request, now + self.config.request_timeout);
            }
            Err(e) => {
                warn!(error = %e, "cannot encode request");
                if let Some(pending) = self.in_flight.take() {
                    let command = pending.command();
                    self.resolve(pending, Response::local(command, ResultCode::WrongParameter));
                }
                self.pump(now);
            }
        }
    }

    // ── Timers, teardown ─────────────────────────────────────────

    fn on_tick(&mut self, now: Instant) {
        let Some((timer, at)) = self.timer else {
            return;
        };
        if now < at {
            return;
        }
        self.timer = None;
        match timer {
            Timer::Discovery => {
                warn!(timeout = ?self.config.discovery_timeout, "discovery timed out");
                self.fail_connection(ResultCode::Timeout);
            }
            Timer::DataLink => {
                warn!("data link did not come up");
                self.fail_connection(ResultCode::Timeout);
            }
            Timer::Login => self.on_login_timeout(now),
            Timer::Request => self.on_request_timeout(now),
            Timer::Backoff => self.begin_discovery(now),
        }
    }

    fn on_transport_error(&mut self, link: Link, reason: &str) {
        warn!(%link, reason, "transport error");
        let affects_session = match link {
            Link::Data => self.data_open,
            Link::Discovery => self.state == ConnectionState::Discovering,
        };
        if link == Link::Discovery {
            self.close_discovery();
        }
        if affects_session {
            self.fail_connection(ResultCode::TransportError);
        } else {
            debug!(state = %self.state, "transport error outside a session ignored");
        }
    }

    /// Tear down and retry discovery after the backoff delay.
    fn schedule_reconnect(&mut self, now: Instant) {
        self.close_data();
        if let Some(creds) = self.credentials.as_mut() {
            creds.reset_success();
        }
        let until = now + self.config.reconnect_delay;
        self.enter(ConnectionState::ReconnectBackoff { until });
        self.arm(Timer::Backoff, until);
    }

    fn fail_connection(&mut self, code: ResultCode) {
        let was_connecting = self.state.is_connecting();
        self.timer = None;
        self.close_data();
        self.close_discovery();
        self.login_reconnects = 0;
        if let Some(creds) = self.credentials.as_mut() {
            creds.reset_success();
        }
        self.enter(ConnectionState::Failed { code });
        self.resolve_all(code);
        if was_connecting {
            self.notify(ConnectionEvent::LoginFinished(code));
        }
    }

    /// Answer every waiting caller with `code`. Internal refreshes are
    /// dropped.
    fn resolve_all(&mut self, code: ResultCode) {
        for id in std::mem::take(&mut self.login_waiters) {
            self.complete(id, Response::local(Command::LoginUser, code));
        }
        let in_flight = self.in_flight.take();
        let queued: Vec<PendingRequest> = self.queue.drain().collect();
        for pending in in_flight.into_iter().chain(queued) {
            if let Origin::Caller(id) = pending.origin {
                self.complete(id, Response::local(pending.command(), code));
            }
        }
    }

    fn requeue_in_flight(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            self.queue.push_front(pending);
            if matches!(self.timer, Some((Timer::Request, _))) {
                self.timer = None;
            }
        }
    }

    fn close_data(&mut self) {
        if self.data_open {
            self.data_open = false;
            self.actions.push(Action::Close(Link::Data));
        }
    }

    fn close_discovery(&mut self) {
        if self.discovery_open {
            self.discovery_open = false;
            self.actions.push(Action::Close(Link::Discovery));
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Encode a queued request. A password change without old material
    /// gets it from the current credentials.
    fn encode_request(&self, request: &Request) -> Result<Message, StamError> {
        match (request, self.credentials.as_ref()) {
            (
                Request::ChangePassword {
                    old_material,
                    new_password,
                },
                Some(creds),
            ) if old_material.is_empty() => Request::ChangePassword {
                old_material: creds.material(),
                new_password: new_password.clone(),
            }
            .encode(),
            _ => request.encode(),
        }
    }

    fn within(&self, window: Duration, now: Instant) -> bool {
        self.credentials
            .as_ref()
            .and_then(SessionCredentials::last_success)
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    fn arm(&mut self, timer: Timer, at: Instant) {
        self.timer = Some((timer, at));
    }

    fn enter(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(&next) {
            warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        info!(from = %self.state, to = %next, "connection state changed");
        self.state = next.clone();
        self.notify(ConnectionEvent::StateChanged(next));
    }

    fn resolve(&mut self, pending: PendingRequest, response: Response) {
        match pending.origin {
            Origin::Caller(id) => self.complete(id, response),
            Origin::Refresh => self.notify(ConnectionEvent::ListRefreshed(response)),
            Origin::SessionInfo => self.notify(ConnectionEvent::SessionInfo(response)),
        }
    }

    fn complete(&mut self, id: RequestId, response: Response) {
        self.actions.push(Action::Complete { id, response });
    }

    fn notify(&mut self, event: ConnectionEvent) {
        self.actions.push(Action::Notify(event));
    }
}

// ── Tests ────────────────────────────────────────────────────────
