use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, trace, warn};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::packet::{HandshakePacket, Packet, PacketId, Payload};
use crate::transport::{Connector, Transport, TransportKind};

/// What the transport readers hand to the client stream.
#[derive(Debug)]
pub(crate) enum Inbound {
    Packet(Packet),
    /// The transport with the given id failed or ended.
    Failed(usize, Error),
    /// The session was closed locally.
    Closed,
}

/// Owns the active transport of a session and the tasks reading from it.
pub(crate) struct Socket {
    transport: RwLock<Arc<dyn Transport>>,
    active_id: AtomicUsize,
    next_id: AtomicUsize,
    inbound_tx: UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<UnboundedReceiver<Inbound>>>,
    handshake: HandshakePacket,
    connected: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Socket {
    /// Creates the socket around a transport that already completed the
    /// handshake. `buffered` holds packets that arrived with the open packet.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        stream: Generator<Result<Bytes>>,
        handshake: HandshakePacket,
        buffered: Vec<Packet>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = unbounded_channel();
        for packet in buffered {
            let _ = inbound_tx.send(Inbound::Packet(packet));
        }

        let socket = Arc::new(Socket {
            transport: RwLock::new(transport),
            active_id: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            handshake,
            connected: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });
        socket.spawn_reader(0, stream);
        socket
    }

    pub(crate) fn handshake(&self) -> &HandshakePacket {
        &self.handshake
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_active(&self, transport_id: usize) -> bool {
        self.active_id.load(Ordering::Acquire) == transport_id
    }

    /// Tears the session down without talking to the server, used once the
    /// server closed or the transport died.
    pub(crate) async fn release(&self) {
        self.connected.store(false, Ordering::Release);
        self.abort_tasks();
        let transport = self.transport.read().await.clone();
        if let Err(err) = transport.close().await {
            debug!("closing {} transport failed: {}", transport.kind(), err);
        }
    }

    /// Maximum time without a server ping before the session is considered dead.
    pub(crate) fn max_ping_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake.ping_interval + self.handshake.ping_timeout)
    }

    pub(crate) fn take_inbound(&self) -> Result<UnboundedReceiver<Inbound>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(Error::IllegalStreamReuse())
    }

    pub(crate) async fn transport_kind(&self) -> TransportKind {
        self.transport.read().await.kind()
    }

    /// Sends a packet to the server.
    pub(crate) async fn emit(&self, packet: Packet) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::IllegalActionBeforeOpen());
        }

        let is_binary = packet.packet_id == PacketId::MessageBinary;

        // send a post request with the encoded payload as body
        // if this is a binary attachment, then send the raw bytes
        let data: Bytes = if is_binary {
            packet.data
        } else {
            packet.into()
        };

        let transport = self.transport.read().await;
        transport.emit(data, is_binary).await
    }

    /// Closes the session. Sends a best-effort close packet, the server may
    /// already be gone.
    pub(crate) async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            self.abort_tasks();
            return Ok(());
        }

        let transport = self.transport.read().await.clone();
        let close = Bytes::from(Packet::new(PacketId::Close, Bytes::new()));
        let close_timeout = Duration::from_millis(self.handshake.ping_timeout);
        match timeout(close_timeout, transport.emit(close, false)).await {
            Ok(Err(err)) => debug!("close packet not delivered: {}", err),
            Err(_) => debug!("close packet timed out"),
            Ok(Ok(())) => (),
        }
        self.abort_tasks();
        let _ = self.inbound_tx.send(Inbound::Closed);
        transport.close().await
    }

    fn abort_tasks(&self) {
        let tasks =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for task in tasks {
            task.abort();
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    /// Forwards decoded packets of one transport until it ends.
    fn spawn_reader(&self, transport_id: usize, mut stream: Generator<Result<Bytes>>) {
        let tx = self.inbound_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let payload = match item.and_then(Payload::try_from) {
                    Ok(payload) => payload,
                    Err(err) if err.is_transport() => {
                        let _ = tx.send(Inbound::Failed(transport_id, err));
                        return;
                    }
                    Err(err) => {
                        warn!("dropping undecodable payload: {}", err);
                        continue;
                    }
                };
                for packet in payload {
                    trace!("received {:?} over transport {}", packet.packet_id, transport_id);
                    if tx.send(Inbound::Packet(packet)).is_err() {
                        return;
                    }
                }
            }
            let _ = tx.send(Inbound::Failed(transport_id, Error::StoppedTransport()));
        });
        self.track(task);
    }

    /// Probes a websocket transport and switches over to it when the server
    /// answers. Failures leave the session on its current transport.
    pub(crate) fn spawn_upgrade(self: &Arc<Self>, connector: Arc<dyn Connector>, url: Url) {
        let socket = Arc::clone(self);
        let task = tokio::spawn(async move {
            let probe_timeout = Duration::from_millis(socket.handshake.ping_timeout);
            let connect = connector.connect(TransportKind::Websocket, url);
            let websocket = match timeout(probe_timeout, connect).await {
                Ok(Ok(websocket)) => websocket,
                Ok(Err(err)) => {
                    debug!("websocket upgrade failed, staying on polling: {}", err);
                    return;
                }
                Err(_) => {
                    debug!("websocket connect timed out, staying on polling");
                    return;
                }
            };

            match timeout(probe_timeout, socket.probe(Arc::clone(&websocket))).await {
                Ok(Ok(previous)) => {
                    debug!("upgraded to websocket");
                    if let Err(err) = previous.close().await {
                        debug!("closing the polling transport failed: {}", err);
                    }
                }
                Ok(Err(err)) => {
                    debug!("websocket upgrade failed, staying on polling: {}", err);
                    let _ = websocket.close().await;
                }
                Err(_) => {
                    debug!("websocket probe timed out, staying on polling");
                    let _ = websocket.close().await;
                }
            }
        });
        self.track(task);
    }

    /// Runs the probe exchange and returns the transport that was replaced.
    async fn probe(&self, websocket: Arc<dyn Transport>) -> Result<Arc<dyn Transport>> {
        let mut stream = websocket.stream()?;

        let ping = Bytes::from(Packet::new(PacketId::Ping, Bytes::from_static(b"probe")));
        websocket.emit(ping, false).await?;

        let answer = stream.next().await.ok_or(Error::IllegalWebsocketUpgrade())??;
        if answer != Bytes::from(Packet::new(PacketId::Pong, Bytes::from_static(b"probe"))) {
            return Err(Error::InvalidPacket());
        }

        self.switch_transport(websocket, stream).await
    }

    /// Replaces the active transport. Holding the write lock keeps other
    /// writes from interleaving with the upgrade packet.
    async fn switch_transport(
        &self,
        websocket: Arc<dyn Transport>,
        stream: Generator<Result<Bytes>>,
    ) -> Result<Arc<dyn Transport>> {
        let mut active = self.transport.write().await;
        if !self.is_connected() {
            return Err(Error::IllegalActionBeforeOpen());
        }

        let upgrade = Bytes::from(Packet::new(PacketId::Upgrade, Bytes::new()));
        websocket.emit(upgrade, false).await?;

        let previous = std::mem::replace(&mut *active, websocket);
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.active_id.store(id, Ordering::Release);
        self.spawn_reader(id, stream);
        Ok(previous)
    }
}

impl Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("handshake", &self.handshake)
            .field("active_id", &self.active_id.load(Ordering::Relaxed))
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
