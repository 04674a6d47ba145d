//! Async client: one task per logical connection.
//!
//! [`Client`] is a cheap handle. The task behind it owns the
//! [`ConnectionMachine`], the credentials and both UDP links, and waits on
//! caller commands, link traffic and the machine's next deadline at once.
//! Dropping every handle stops the task.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::StamError;
use crate::message::ResultCode;
use crate::network::{LinkEvent, LinkMessage, LinkSender, UdpLink};
use crate::protocol::{
    AvailableTicket, GameEntry, GameInfoEntry, ListItem, MeetingInfo, Request, Response,
    TicketEntry, decode_list,
};
use crate::session::SessionSnapshot;
use crate::state::{
    Action, ConnectionEvent, ConnectionMachine, ConnectionState, Input, Link, RequestId,
};

const COMMAND_CHANNEL_SIZE: usize = 64;
const LINK_CHANNEL_SIZE: usize = 256;
const EVENT_CHANNEL_SIZE: usize = 64;

enum ClientCommand {
    Start {
        id: RequestId,
        user_name: String,
        password: String,
        reply: oneshot::Sender<Response>,
    },
    Submit {
        id: RequestId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Session {
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

// ── Client ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::Sender<ClientCommand>,
    state: watch::Receiver<ConnectionState>,
    next_id: Arc<AtomicU64>,
    local_version: u32,
    local_version_text: String,
}

impl std::fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start { id, user_name, .. } => f
                .debug_struct("Start")
                .field("id", id)
                .field("user_name", user_name)
                .finish_non_exhaustive(),
            Self::Submit { id, request, .. } => f
                .debug_struct("Submit")
                .field("id", id)
                .field("command", &request.command())
                .finish_non_exhaustive(),
            Self::Session { .. } => f.write_str("Session"),
            Self::Stop { .. } => f.write_str("Stop"),
        }
    }
}

impl Client {
    /// Start the connection task. Must be called inside a tokio runtime.
    pub fn spawn(config: ConnectionConfig) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (link_tx, link_rx) = mpsc::channel(LINK_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let client = Self {
            commands: command_tx,
            state: state_rx,
            next_id: Arc::new(AtomicU64::new(1)),
            local_version: config.local_version,
            local_version_text: config.local_version_text.clone(),
        };
        let driver = Driver {
            machine: ConnectionMachine::new(config),
            discovery: None,
            data: None,
            generation: 0,
            link_tx,
            replies: HashMap::new(),
            state_tx,
            events: event_tx,
        };
        tokio::spawn(driver.run(command_rx, link_rx));
        (client, event_rx)
    }

    fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Log in. Resolves with the login outcome.
    pub async fn login(
        &self,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<ResultCode, StamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::Start {
                id: self.next_id(),
                user_name: user_name.into(),
                password: password.into(),
                reply,
            })
            .await?;
        Ok(rx.await?.code)
    }

    /// Queue `request` and wait for its answer.
    pub async fn request(&self, request: Request) -> Result<Response, StamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::Submit {
                id: self.next_id(),
                request,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Close the links and answer everything pending with `ConnectionClosed`.
    pub async fn stop(&self) -> Result<(), StamError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(ClientCommand::Stop { reply }).await?;
        Ok(rx.await?)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Redacted view of the session credentials.
    pub async fn session(&self) -> Result<Option<SessionSnapshot>, StamError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(ClientCommand::Session { reply }).await?;
        Ok(rx.await?)
    }

    // ── Typed helpers ────────────────────────────────────────────

    /// Exchange versions. `NewVersion` means the server is newer.
    pub async fn get_version(&self) -> Result<Response, StamError> {
        self.request(Request::GetVersion {
            version: self.local_version,
            version_text: self.local_version_text.clone(),
        })
        .await
    }

    pub async fn user_properties(&self) -> Result<Response, StamError> {
        self.request(Request::GetUserProps).await
    }

    pub async fn change_readable_name(&self, name: impl Into<String>) -> Result<Response, StamError> {
        self.request(Request::ChangeReadableName { name: name.into() })
            .await
    }

    /// Change the login password. The old password is proven with the
    /// current session's credentials.
    pub async fn change_password(&self, new_password: impl Into<String>) -> Result<Response, StamError> {
        self.request(Request::ChangePassword {
            old_material: String::new(),
            new_password: new_password.into(),
        })
        .await
    }

    pub async fn games_list(&self, max_past_games: u32) -> Result<(Response, Vec<GameEntry>), StamError> {
        self.list(Request::GetGamesList { max_past_games }).await
    }

    pub async fn games_info_list(&self) -> Result<(Response, Vec<GameInfoEntry>), StamError> {
        self.list(Request::GetGamesInfoList).await
    }

    pub async fn tickets_list(&self) -> Result<(Response, Vec<TicketEntry>), StamError> {
        self.list(Request::GetTicketsList).await
    }

    pub async fn available_tickets(
        &self,
        game_index: u32,
    ) -> Result<(Response, Vec<AvailableTicket>), StamError> {
        self.list(Request::GetAvailableTickets { game_index }).await
    }

    pub async fn meeting_info(&self, game_index: u32) -> Result<(Response, Option<MeetingInfo>), StamError> {
        let response = self.request(Request::GetMeetingInfo { game_index }).await?;
        if !response.is_success() {
            return Ok((response, None));
        }
        let info = MeetingInfo::decode(response.data())?;
        Ok((response, Some(info)))
    }

    pub async fn add_ticket(&self, name: impl Into<String>, discount: u32) -> Result<Response, StamError> {
        self.request(Request::AddTicket {
            name: name.into(),
            discount,
        })
        .await
    }

    pub async fn remove_ticket(&self, index: u32) -> Result<Response, StamError> {
        self.request(Request::RemoveTicket { index }).await
    }

    pub async fn change_ticket(
        &self,
        index: u32,
        name: impl Into<String>,
        place: impl Into<String>,
        discount: u32,
    ) -> Result<Response, StamError> {
        self.request(Request::ChangeTicket {
            index,
            name: name.into(),
            place: place.into(),
            discount,
        })
        .await
    }

    /// Mark a game's kick-off time as final, or clear the mark.
    pub async fn set_fixed_game_time(&self, game_index: u32, fixed: bool) -> Result<Response, StamError> {
        self.request(Request::SetFixedGameTime { game_index, fixed })
            .await
    }

    async fn list<T: ListItem>(&self, request: Request) -> Result<(Response, Vec<T>), StamError> {
        let response = self.request(request).await?;
        if !response.is_success() {
            return Ok((response, Vec::new()));
        }
        let items = decode_list(response.data())?;
        Ok((response, items))
    }
}

// ── Driver ───────────────────────────────────────────────────────

struct Driver {
    machine: ConnectionMachine,
    discovery: Option<UdpLink>,
    data: Option<UdpLink>,
    /// Bumped for every opened link.
    generation: u64,
    link_tx: LinkSender,
    replies: HashMap<RequestId, oneshot::Sender<Response>>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ClientCommand>,
        mut links: mpsc::Receiver<LinkMessage>,
    ) {
        loop {
            let deadline = self.machine.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("all client handles dropped");
                        self.apply(Input::Stop).await;
                        break;
                    }
                },
                Some(message) = links.recv() => self.on_link(message).await,
                _ = timer => self.apply(Input::Tick).await,
            }
        }
    }

    async fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Start {
                id,
                user_name,
                password,
                reply,
            } => {
                self.replies.insert(id, reply);
                self.apply(Input::Start {
                    id,
                    user_name,
                    password,
                })
                .await;
            }
            ClientCommand::Submit { id, request, reply } => {
                self.replies.insert(id, reply);
                self.apply(Input::Submit { id, request }).await;
            }
            ClientCommand::Session { reply } => {
                let _ = reply.send(self.machine.session());
            }
            ClientCommand::Stop { reply } => {
                self.apply(Input::Stop).await;
                let _ = reply.send(());
            }
        }
    }

    async fn on_link(&mut self, message: LinkMessage) {
        let current = match message.link {
            Link::Discovery => self.discovery.as_ref(),
            Link::Data => self.data.as_ref(),
        }
        .map(UdpLink::generation);
        if current != Some(message.generation) {
            debug!(link = %message.link, generation = message.generation, "traffic from replaced link dropped");
            return;
        }
        let input = match message.event {
            LinkEvent::Frame(frame) => Input::Received {
                link: message.link,
                message: frame,
            },
            LinkEvent::Error(reason) => Input::TransportError {
                link: message.link,
                reason,
            },
        };
        self.apply(input).await;
    }

    /// Run `input` through the machine, carrying out actions until no
    /// follow-up input is left.
    async fn apply(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            for action in self.machine.handle(input, Instant::now().into_std()) {
                if let Some(follow_up) = self.execute(action).await {
                    inputs.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Input> {
        match action {
            Action::Send { link, message } => {
                if link == Link::Discovery && self.discovery.is_none() {
                    let address = self.machine.config().discovery_address();
                    match self.open(&address, Link::Discovery).await {
                        Ok(l) => self.discovery = Some(l),
                        Err(e) => return Some(transport_error(link, e)),
                    }
                }
                let target = match link {
                    Link::Discovery => self.discovery.as_ref(),
                    Link::Data => self.data.as_ref(),
                };
                let Some(target) = target else {
                    return Some(Input::TransportError {
                        link,
                        reason: "link not open".into(),
                    });
                };
                target.send(&message).await.err().map(|e| transport_error(link, e))
            }
            Action::OpenData { port } => {
                let address = self.machine.config().session_address(port);
                match self.open(&address, Link::Data).await {
                    Ok(l) => {
                        self.data = Some(l);
                        Some(Input::DataLinkOpened)
                    }
                    Err(e) => Some(transport_error(Link::Data, e)),
                }
            }
            Action::Close(link) => {
                let closed = match link {
                    Link::Discovery => self.discovery.take(),
                    Link::Data => self.data.take(),
                };
                if let Some(l) = closed {
                    l.close();
                }
                None
            }
            Action::Complete { id, response } => {
                match self.replies.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(response);
                    }
                    None => warn!(id, "completion without a waiting caller"),
                }
                None
            }
            Action::Notify(event) => {
                if let ConnectionEvent::StateChanged(state) = &event {
                    self.state_tx.send_replace(state.clone());
                }
                if self.events.try_send(event).is_err() {
                    debug!("event dropped, receiver full or gone");
                }
                None
            }
        }
    }

    async fn open(&mut self, address: &str, link: Link) -> Result<UdpLink, StamError> {
        self.generation += 1;
        UdpLink::open(address, link, self.generation, self.link_tx.clone()).await
    }
}

fn transport_error(link: Link, error: StamError) -> Input {
    Input::TransportError {
        link,
        reason: error.to_string(),
    }
}
