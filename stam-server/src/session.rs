//! One data session: a UDP socket on its own port serving one user.
//!
//! The first datagram from the address that asked for the session pins the
//! peer; anything from elsewhere is dropped. The session ends after the
//! configured idle time or when the server shuts down.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use stam_core::{MAX_FRAME_SIZE, ReassemblyBuffer};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::{Handler, SessionContext};

pub struct Session {
    socket: UdpSocket,
    client_ip: IpAddr,
    ctx: SessionContext,
    handler: Handler,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        socket: UdpSocket,
        client_ip: IpAddr,
        ctx: SessionContext,
        handler: Handler,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            client_ip,
            ctx,
            handler,
            idle_timeout,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let port = self.socket.local_addr().map(|a| a.port()).unwrap_or_default();
        let mut peer: Option<SocketAddr> = None;
        let mut buffer = ReassemblyBuffer::new();
        let mut datagram = vec![0u8; MAX_FRAME_SIZE];

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = tokio::time::timeout(self.idle_timeout, self.socket.recv_from(&mut datagram)) => r,
            };
            let (n, from) = match received {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!(user = %self.ctx.user_name, port, error = %e, "session socket failed");
                    break;
                }
                Err(_) => {
                    info!(user = %self.ctx.user_name, port, "session idle, closing");
                    break;
                }
            };

            match peer {
                Some(p) if p != from => {
                    warn!(port, %from, "datagram from foreign sender dropped");
                    continue;
                }
                None if from.ip() != self.client_ip => {
                    warn!(port, %from, expected = %self.client_ip, "datagram from foreign host dropped");
                    continue;
                }
                None => {
                    debug!(user = %self.ctx.user_name, port, %from, "session peer pinned");
                    peer = Some(from);
                }
                Some(_) => {}
            }

            buffer.append(&datagram[..n]);
            for message in buffer.drain_messages() {
                let Some(ack) = self.handler.handle(&mut self.ctx, &message, now_ms()) else {
                    continue;
                };
                if let Err(e) = self.socket.send_to(&ack.to_bytes(), from).await {
                    warn!(user = %self.ctx.user_name, error = %e, "cannot send ack");
                }
            }
        }
        debug!(
            user = %self.ctx.user_name,
            port,
            discarded = buffer.discarded_bytes(),
            "session ended"
        );
    }
}

/// Wall clock in unix milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, UserConfig};
    use crate::store::Store;
    use stam_core::message::{ACK_NOT_LOGGED_IN, Command, ResultCode};
    use stam_core::{Message, Request, Response, login_material};
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    async fn spawn_session(idle: Duration) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let config = ServerConfig {
            users: vec![UserConfig {
                name: "alice".into(),
                password: "secret".into(),
                ..UserConfig::default()
            }],
            ..ServerConfig::default()
        };
        let handler = Handler::new(
            Arc::new(Mutex::new(Store::from_config(&config))),
            0x0001_0200,
            "V1.2.0",
        );
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let session = Session::new(
            socket,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            SessionContext::new("alice", "s", "r"),
            handler,
            idle,
            CancellationToken::new(),
        );
        (addr, tokio::spawn(session.run()))
    }

    async fn exchange(client: &UdpSocket, to: SocketAddr, bytes: &[u8]) -> Message {
        client.send_to(bytes, to).await.unwrap();
        let mut buf = vec![0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        Message::from_bytes(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn login_then_request() {
        let (addr, _task) = spawn_session(Duration::from_secs(30)).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let ack = exchange(&client, addr, &Request::GetUserProps.encode().unwrap().to_bytes()).await;
        assert_eq!(ack.opcode(), ACK_NOT_LOGGED_IN);

        let login = Request::Login {
            material: login_material("secret", "s", "r"),
        };
        let ack = exchange(&client, addr, &login.encode().unwrap().to_bytes()).await;
        assert_eq!(
            Response::decode(Command::LoginUser, &ack).code,
            ResultCode::Success
        );

        let ack = exchange(&client, addr, &Request::GetUserProps.encode().unwrap().to_bytes()).await;
        assert!(Response::decode(Command::GetUserProps, &ack).is_success());
    }

    #[tokio::test]
    async fn garbage_before_frame_is_skipped() {
        let (addr, _task) = spawn_session(Duration::from_secs(30)).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut bytes = b"noise".to_vec();
        bytes.extend(Request::GetUserProps.encode().unwrap().to_bytes());
        let ack = exchange(&client, addr, &bytes).await;
        assert_eq!(ack.opcode(), ACK_NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn idle_session_ends() {
        let (_addr, task) = spawn_session(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session still running")
            .unwrap();
    }
}
