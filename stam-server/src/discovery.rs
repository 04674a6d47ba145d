//! The well-known discovery port.
//!
//! Every `CONNECT_USER` from a known user gets a fresh session socket on an
//! OS-assigned port plus a login challenge; the answer carries the port,
//! the salt and the random string. Unknown users get `NoUser`.
//!
//! A repeated request from the same address and user replaces the earlier
//! session. At most `max_sessions` sessions run at once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::distributions::Alphanumeric;
use stam_core::message::{Command, ResultCode};
use stam_core::protocol::{Request, Response, ResponseBody};
use stam_core::{MAX_FRAME_SIZE, Message, StamError};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handler::{Handler, SessionContext};
use crate::session::Session;
use crate::store::Store;

const CHALLENGE_LEN: usize = 16;

type SessionKey = (String, SocketAddr);

struct SessionHandle {
    port: u16,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ── Server ───────────────────────────────────────────────────────

/// Discovery socket plus everything needed to start sessions.
pub struct Server {
    socket: UdpSocket,
    config: ServerConfig,
    store: Arc<Mutex<Store>>,
    handler: Handler,
    cancel: CancellationToken,
    sessions: HashMap<SessionKey, SessionHandle>,
}

impl Server {
    /// Bind the discovery socket and seed the store from `config`.
    pub async fn bind(config: ServerConfig) -> Result<Self, StamError> {
        let socket = UdpSocket::bind(config.discovery_address()).await?;
        let store = Arc::new(Mutex::new(Store::from_config(&config)));
        let handler = Handler::new(
            store.clone(),
            config.session.version,
            config.session.version_text.clone(),
        );
        Ok(Self {
            socket,
            config,
            store,
            handler,
            cancel: CancellationToken::new(),
            sessions: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StamError> {
        Ok(self.socket.local_addr()?)
    }

    /// Shared handle to the data.
    pub fn store(&self) -> Arc<Mutex<Store>> {
        self.store.clone()
    }

    /// Token that stops the server and all of its sessions.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn run(mut self) -> Result<(), StamError> {
        info!(addr = %self.local_addr()?, "discovery listening");
        let mut datagram = vec![0u8; MAX_FRAME_SIZE];

        loop {
            let (n, from) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = self.socket.recv_from(&mut datagram) => match r {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "discovery receive failed");
                        continue;
                    }
                },
            };

            let message = match Message::from_bytes(&datagram[..n]) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%from, error = %e, "bad discovery datagram");
                    continue;
                }
            };
            let user_name = match Request::decode(&message) {
                Ok(Request::ConnectUser { user_name }) => user_name,
                Ok(other) => {
                    warn!(%from, command = %other.command(), "non-connect request on discovery port");
                    continue;
                }
                Err(e) => {
                    warn!(%from, error = %e, "undecodable discovery request");
                    continue;
                }
            };

            let answer = match self.open_session(&user_name, from).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(user = %user_name, error = %e, "cannot open session");
                    Response::local(Command::ConnectUser, ResultCode::Common)
                }
            };
            match answer.encode() {
                Ok(ack) => {
                    if let Err(e) = self.socket.send_to(&ack.to_bytes(), from).await {
                        warn!(%from, error = %e, "cannot answer discovery");
                    }
                }
                Err(e) => warn!(error = %e, "cannot encode discovery answer"),
            }
        }
        info!("discovery stopped");
        Ok(())
    }

    /// Sessions still running.
    pub fn active_sessions(&mut self) -> usize {
        self.sessions.retain(|_, s| !s.task.is_finished());
        self.sessions.len()
    }

    async fn open_session(&mut self, user_name: &str, from: SocketAddr) -> Result<Response, StamError> {
        let known = self
            .store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .user(user_name)
            .is_some();
        if !known {
            info!(user = %user_name, %from, "connect from unknown user");
            return Ok(Response::local(Command::ConnectUser, ResultCode::NoUser));
        }

        let key = (user_name.to_string(), from);
        if let Some(old) = self.sessions.remove(&key) {
            debug!(user = %user_name, %from, port = old.port, "session replaced");
            old.cancel.cancel();
        }
        if self.active_sessions() >= self.config.session.max_sessions {
            warn!(user = %user_name, %from, limit = self.config.session.max_sessions, "too many sessions");
            return Ok(Response::local(Command::ConnectUser, ResultCode::Common));
        }

        let socket = UdpSocket::bind((self.config.network.bind_address.as_str(), 0)).await?;
        let port = socket.local_addr()?.port();
        let salt = challenge();
        let random = challenge();
        debug!(user = %user_name, port, "session opened");

        let cancel = self.cancel.child_token();
        let session = Session::new(
            socket,
            from.ip(),
            SessionContext::new(user_name, salt.clone(), random.clone()),
            self.handler.clone(),
            self.config.idle_timeout(),
            cancel.clone(),
        );
        let task = tokio::spawn(session.run());
        self.sessions.insert(key, SessionHandle { port, cancel, task });

        Ok(Response::new(
            Command::ConnectUser,
            ResultCode::Success,
            ResponseBody::Connect { port, salt, random },
        ))
    }
}

fn challenge() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CHALLENGE_LEN)
        .map(char::from)
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────
