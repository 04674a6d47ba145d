//! One UDP socket talking to one peer.
//!
//! The socket is not `connect`ed; datagrams from any other sender are
//! dropped by the reader task. Received bytes go through a
//! [`ReassemblyBuffer`] and complete frames are forwarded, tagged with the
//! link and its generation so the owner can tell a replaced link's
//! leftovers from live traffic.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::buffer::ReassemblyBuffer;
use crate::error::StamError;
use crate::frame::{MAX_FRAME_SIZE, Message};
use crate::state::Link;

/// What a link reports to its owner.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Message),
    /// The socket failed; the reader has stopped.
    Error(String),
}

#[derive(Debug)]
pub struct LinkMessage {
    pub link: Link,
    pub generation: u64,
    pub event: LinkEvent,
}

pub type LinkSender = mpsc::Sender<LinkMessage>;

#[derive(Debug)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    link: Link,
    generation: u64,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl UdpLink {
    /// Resolve `address`, bind an ephemeral local port and start reading.
    pub async fn open(
        address: &str,
        link: Link,
        generation: u64,
        events: LinkSender,
    ) -> Result<Self, StamError> {
        let peer = lookup_host(address)
            .await?
            .next()
            .ok_or_else(|| StamError::AddressResolution(address.to_string()))?;
        let local = if peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = Arc::new(UdpSocket::bind(local).await?);
        debug!(%link, %peer, local = %socket.local_addr()?, "link opened");

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            socket.clone(),
            peer,
            link,
            generation,
            cancel.clone(),
            events,
        ));
        Ok(Self {
            socket,
            peer,
            link,
            generation,
            cancel,
            reader,
        })
    }

    pub async fn send(&self, message: &Message) -> Result<(), StamError> {
        trace!(link = %self.link, ?message, "send");
        self.socket.send_to(&message.to_bytes(), self.peer).await?;
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StamError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the reader; buffered bytes are dropped with it.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.reader.is_finished()
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    link: Link,
    generation: u64,
    cancel: CancellationToken,
    events: LinkSender,
) {
    let mut buffer = ReassemblyBuffer::new();
    let mut datagram = vec![0u8; MAX_FRAME_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut datagram) => r,
        };
        match received {
            Ok((n, from)) if from == peer => {
                buffer.append(&datagram[..n]);
                for message in buffer.drain_messages() {
                    let msg = LinkMessage {
                        link,
                        generation,
                        event: LinkEvent::Frame(message),
                    };
                    if events.send(msg).await.is_err() {
                        return;
                    }
                }
            }
            Ok((n, from)) => {
                warn!(%link, %from, bytes = n, "datagram from unexpected sender dropped");
            }
            Err(e) => {
                let msg = LinkMessage {
                    link,
                    generation,
                    event: LinkEvent::Error(e.to_string()),
                };
                let _ = events.send(msg).await;
                break;
            }
        }
    }
    debug!(%link, discarded = buffer.discarded_bytes(), "link reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::Receiver<LinkMessage>) -> LinkMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn frames_split_over_datagrams_are_reassembled() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let link = UdpLink::open(&peer.local_addr().unwrap().to_string(), Link::Data, 3, tx)
            .await
            .unwrap();

        // Learn the link's address from a first send.
        link.send(&Message::empty(1)).await.unwrap();
        let mut buf = [0u8; 64];
        let (_, link_addr) = peer.recv_from(&mut buf).await.unwrap();

        let mut bytes = encode(0x1003_0002, b"one").unwrap();
        bytes.extend(encode(0x1003_0003, b"two").unwrap());
        peer.send_to(&bytes[..5], link_addr).await.unwrap();
        peer.send_to(&bytes[5..], link_addr).await.unwrap();

        for expected in [0x1003_0002u32, 0x1003_0003] {
            let msg = recv(&mut rx).await;
            assert_eq!(msg.link, Link::Data);
            assert_eq!(msg.generation, 3);
            match msg.event {
                LinkEvent::Frame(m) => assert_eq!(m.opcode(), expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn foreign_sender_is_filtered() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let link = UdpLink::open(&peer.local_addr().unwrap().to_string(), Link::Discovery, 0, tx)
            .await
            .unwrap();
        let link_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, link.local_addr().unwrap().port()));

        stranger
            .send_to(&encode(7, b"spoof").unwrap(), link_addr)
            .await
            .unwrap();
        peer.send_to(&encode(8, b"real").unwrap(), link_addr)
            .await
            .unwrap();

        match recv(&mut rx).await.event {
            LinkEvent::Frame(m) => assert_eq!(m.opcode(), 8),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_stops_reader() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let link = UdpLink::open(&peer.local_addr().unwrap().to_string(), Link::Data, 0, tx)
            .await
            .unwrap();
        link.close();
        assert!(link.is_closed());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !link.reader.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unresolvable_address_fails() {
        let (tx, _rx) = mpsc::channel(1);
        assert!(UdpLink::open("not a socket address", Link::Data, 0, tx)
            .await
            .is_err());
    }
}
