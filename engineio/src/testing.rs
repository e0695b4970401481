//! In-memory transports for tests. A [`MockConnector`] hands every transport
//! the session opens to the test as a [`MockPeer`], which plays the server.

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use url::Url;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::packet::{HandshakePacket, Packet, PacketId};
use crate::transport::{transport_url, Connector, Transport, TransportKind};

/// A frame written by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub is_binary: bool,
}

impl Frame {
    /// Decodes the frame the way a server would.
    pub fn packet(&self) -> Result<Packet> {
        if self.is_binary {
            Ok(Packet::new(PacketId::MessageBinary, self.data.clone()))
        } else {
            Packet::try_from(self.data.clone())
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    accepted: Mutex<VecDeque<MockPeer>>,
    notify: tokio::sync::Notify,
}

/// Connector whose transports are backed by channels.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` connection attempts with a refused connection.
    pub fn refuse(&self, count: usize) {
        self.shared.refusals.store(count, Ordering::Release);
    }

    /// Number of connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Waits for the next transport the client opens.
    pub async fn accept(&self) -> MockPeer {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(peer) = self.try_accept() {
                return peer;
            }
            notified.await;
        }
    }

    /// Returns an already opened transport, if any.
    pub fn try_accept(&self) -> Option<MockPeer> {
        self.shared
            .accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, kind: TransportKind, url: Url) -> Result<Arc<dyn Transport>> {
        self.shared.attempts.fetch_add(1, Ordering::AcqRel);
        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::IncompleteIo(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused by mock",
            )));
        }

        let url = transport_url(url, kind)?;
        let (to_peer, from_client) = unbounded_channel();
        let (to_client, from_peer) = unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = MockTransport {
            kind,
            base_url: RwLock::new(url.clone()),
            outbound: Mutex::new(Some(to_peer)),
            inbound: Mutex::new(Some(from_peer)),
            closed: closed.clone(),
        };
        let peer = MockPeer {
            kind,
            url,
            to_client: Mutex::new(Some(to_client)),
            from_client: AsyncMutex::new(from_client),
            closed,
        };

        self.shared
            .accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(peer);
        self.shared.notify.notify_waiters();
        Ok(Arc::new(transport))
    }
}

/// The client side of an in-memory connection.
#[derive(Debug)]
pub struct MockTransport {
    kind: TransportKind,
    base_url: RwLock<Url>,
    outbound: Mutex<Option<UnboundedSender<Frame>>>,
    inbound: Mutex<Option<UnboundedReceiver<Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    fn frames(mut inbound: UnboundedReceiver<Bytes>) -> impl Stream<Item = Result<Bytes>> + Send {
        stream! {
            while let Some(data) = inbound.recv().await {
                yield Ok(data);
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn emit(&self, data: Bytes, is_binary_att: bool) -> Result<()> {
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx
                .send(Frame {
                    data,
                    is_binary: is_binary_att,
                })
                .map_err(|_| Error::StoppedTransport()),
            None => Err(Error::StoppedTransport()),
        }
    }

    fn stream(&self) -> Result<Generator<Result<Bytes>>> {
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(Error::IllegalStreamReuse())?;
        Ok(Box::pin(Self::frames(inbound)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }

    async fn base_url(&self) -> Result<Url> {
        Ok(self.base_url.read().await.clone())
    }

    async fn set_base_url(&self, base_url: Url) -> Result<()> {
        *self.base_url.write().await = transport_url(base_url, self.kind)?;
        Ok(())
    }
}

/// The server side of an in-memory connection.
#[derive(Debug)]
pub struct MockPeer {
    kind: TransportKind,
    url: Url,
    to_client: Mutex<Option<UnboundedSender<Bytes>>>,
    from_client: AsyncMutex<UnboundedReceiver<Frame>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The url the transport was opened with.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the client closed its end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends a raw frame, which may hold several `\x1e` separated packets.
    pub fn send_raw(&self, data: impl Into<Bytes>) -> bool {
        self.to_client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(false, |tx| tx.send(data.into()).is_ok())
    }

    pub fn send_packet(&self, packet: Packet) -> bool {
        self.send_raw(Bytes::from(packet))
    }

    /// Sends a text message packet.
    pub fn send_message(&self, text: &str) -> bool {
        self.send_packet(Packet::new(PacketId::Message, text.to_owned()))
    }

    /// Sends the open packet.
    pub fn open(&self, sid: &str, upgrades: &[&str], ping_interval: u64, ping_timeout: u64) -> bool {
        let handshake = HandshakePacket {
            sid: sid.to_owned(),
            upgrades: upgrades.iter().map(|upgrade| (*upgrade).to_owned()).collect(),
            ping_interval,
            ping_timeout,
            max_payload: Some(1_000_000),
        };
        match serde_json::to_vec(&handshake) {
            Ok(json) => self.send_packet(Packet::new(PacketId::Open, json)),
            Err(_) => false,
        }
    }

    /// Next frame written by the client, `None` once it closed.
    pub async fn recv(&self) -> Option<Frame> {
        self.from_client.lock().await.recv().await
    }

    /// Next packet written by the client.
    pub async fn recv_packet(&self) -> Option<Packet> {
        self.recv().await.and_then(|frame| frame.packet().ok())
    }

    /// Next packet that is neither a ping answer nor a noop.
    pub async fn recv_message(&self) -> Option<Packet> {
        loop {
            let packet = self.recv_packet().await?;
            match packet.packet_id {
                PacketId::Pong | PacketId::Noop => continue,
                _ => return Some(packet),
            }
        }
    }

    /// Drops the server end, the client sees the transport end.
    pub fn disconnect(&self) {
        self.to_client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
