use async_stream::stream;
use futures_util::Stream;
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::packet::{HandshakePacket, Packet, PacketId};
use crate::socket::{Inbound, Socket};
use crate::transport::TransportKind;

/// An open engine.io session. Cloning yields another handle to the same
/// session.
#[derive(Clone, Debug)]
pub struct Client {
    socket: Arc<Socket>,
}

impl Client {
    pub(crate) fn new(socket: Arc<Socket>) -> Self {
        Client { socket }
    }

    /// Sends a packet to the server.
    pub async fn emit(&self, packet: Packet) -> Result<()> {
        self.socket.emit(packet).await
    }

    /// Returns the inbound message packets. Pings are answered on the way, a
    /// close packet is yielded as the last item. The stream can be taken
    /// once per session.
    pub fn stream(&self) -> Result<Generator<Result<Packet>>> {
        let inbound = self.socket.take_inbound()?;
        Ok(Box::pin(Self::packets(self.socket.clone(), inbound)))
    }

    fn packets(
        socket: Arc<Socket>,
        mut inbound: UnboundedReceiver<Inbound>,
    ) -> impl Stream<Item = Result<Packet>> + Send + 'static {
        stream! {
            let period = socket.max_ping_timeout();
            let mut last_ping = Instant::now();
            loop {
                let received = match timeout_at(last_ping + period, inbound.recv()).await {
                    Err(_) => {
                        warn!("no ping from the server within {:?}", period);
                        socket.release().await;
                        yield Err(Error::PingTimeout());
                        break;
                    }
                    Ok(None) | Ok(Some(Inbound::Closed)) => break,
                    Ok(Some(Inbound::Failed(id, err))) => {
                        if !socket.is_active(id) {
                            trace!("transport {} retired: {}", id, err);
                            continue;
                        }
                        socket.release().await;
                        yield Err(err);
                        break;
                    }
                    Ok(Some(Inbound::Packet(packet))) => packet,
                };

                match received.packet_id {
                    PacketId::Ping => {
                        last_ping = Instant::now();
                        let pong = Packet::new(PacketId::Pong, received.data);
                        if let Err(err) = socket.emit(pong).await {
                            socket.release().await;
                            yield Err(err);
                            break;
                        }
                    }
                    PacketId::Close => {
                        debug!("server closed the session");
                        socket.release().await;
                        yield Ok(received);
                        break;
                    }
                    PacketId::Message | PacketId::MessageBinary => yield Ok(received),
                    PacketId::Noop | PacketId::Upgrade | PacketId::Pong | PacketId::Open => {
                        trace!("ignoring {:?} packet", received.packet_id)
                    }
                }
            }
        }
    }

    /// Closes the session with a best-effort close packet. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.socket.close().await
    }

    /// The transport currently carrying the session.
    pub async fn transport(&self) -> TransportKind {
        self.socket.transport_kind().await
    }

    pub fn handshake(&self) -> &HandshakePacket {
        self.socket.handshake()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{MockConnector, MockPeer};
    use crate::{ClientBuilder, TransportMode};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::time::Duration;
    use url::Url;

    fn builder(connector: &MockConnector, mode: TransportMode) -> Result<ClientBuilder> {
        Ok(ClientBuilder::new(Url::parse("http://localhost:4200")?)
            .connector(Arc::new(connector.clone()))
            .mode(mode))
    }

    /// Opens a session over a single transport that never upgrades.
    async fn open(
        connector: &MockConnector,
        mode: TransportMode,
        ping_interval: u64,
        ping_timeout: u64,
    ) -> Result<(Client, MockPeer)> {
        let server = async {
            let peer = connector.accept().await;
            peer.open("abc", &[], ping_interval, ping_timeout);
            peer
        };
        let (client, peer) = tokio::join!(builder(connector, mode)?.build(), server);
        Ok((client?, peer))
    }

    async fn wait_closed(peer: &MockPeer) {
        while !peer.is_closed() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_polling_handshake_and_upgrade() -> Result<()> {
        let connector = MockConnector::new();
        let server = async {
            let polling = connector.accept().await;
            assert_eq!(polling.kind(), TransportKind::Polling);
            assert!(polling
                .url()
                .query_pairs()
                .any(|(key, value)| key == "EIO" && value == "4"));
            assert_eq!(polling.url().path(), "/engine.io/");
            polling.open("abc", &["websocket"], 25000, 20000);

            let websocket = connector.accept().await;
            assert_eq!(websocket.kind(), TransportKind::Websocket);
            assert_eq!(websocket.url().scheme(), "ws");
            assert!(websocket
                .url()
                .query_pairs()
                .any(|(key, value)| key == "sid" && value == "abc"));
            assert_eq!(
                websocket.recv_packet().await,
                Some(Packet::new(PacketId::Ping, "probe"))
            );
            websocket.send_packet(Packet::new(PacketId::Pong, "probe"));
            assert_eq!(
                websocket.recv_packet().await,
                Some(Packet::new(PacketId::Upgrade, Bytes::new()))
            );
            (polling, websocket)
        };

        let (client, (polling, websocket)) = tokio::join!(
            builder(&connector, TransportMode::Any)?.build(),
            server
        );
        let client = client?;

        assert_eq!(client.handshake().sid, "abc");
        assert_eq!(client.transport().await, TransportKind::Websocket);
        wait_closed(&polling).await;

        client.emit(Packet::new(PacketId::Message, "hi")).await?;
        assert_eq!(
            websocket.recv_packet().await,
            Some(Packet::new(PacketId::Message, "hi"))
        );

        // the retired polling transport ending does not end the session
        polling.disconnect();
        let mut stream = client.stream()?;
        websocket.send_message("still here");
        assert_eq!(
            stream.next().await.transpose()?,
            Some(Packet::new(PacketId::Message, "still here"))
        );
        assert!(client.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_probe_stays_on_polling() -> Result<()> {
        let connector = MockConnector::new();
        let server = async {
            let polling = connector.accept().await;
            polling.open("abc", &["websocket"], 25000, 20000);
            let websocket = connector.accept().await;
            let _ = websocket.recv_packet().await;
            websocket.send_packet(Packet::new(PacketId::Pong, "nope"));
            wait_closed(&websocket).await;
            polling
        };

        let (client, polling) = tokio::join!(
            builder(&connector, TransportMode::Any)?.build(),
            server
        );
        let client = client?;

        assert_eq!(client.transport().await, TransportKind::Polling);
        client.emit(Packet::new(PacketId::Message, "hi")).await?;
        assert_eq!(
            polling.recv_packet().await,
            Some(Packet::new(PacketId::Message, "hi"))
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_upgrade_stays_on_polling() -> Result<()> {
        let connector = MockConnector::new();
        let server = async {
            let polling = connector.accept().await;
            polling.open("abc", &["websocket"], 25000, 2000);
            let websocket = connector.accept().await;
            assert_eq!(
                websocket.recv_packet().await,
                Some(Packet::new(PacketId::Ping, "probe"))
            );
            (polling, websocket)
        };

        let (client, (polling, websocket)) = tokio::join!(
            builder(&connector, TransportMode::Any)?.build(),
            server
        );
        let client = client?;

        // the probe gives up after the ping timeout and closes the websocket
        let started = Instant::now();
        assert!(websocket.recv_packet().await.is_none());
        assert!(websocket.is_closed());
        assert!(started.elapsed() <= Duration::from_millis(2000));

        assert_eq!(client.transport().await, TransportKind::Polling);
        assert!(client.is_connected());
        client.emit(Packet::new(PacketId::Message, "hi")).await?;
        assert_eq!(
            polling.recv_message().await,
            Some(Packet::new(PacketId::Message, "hi"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_probe_without_advertised_websocket() -> Result<()> {
        let connector = MockConnector::new();
        let (client, _peer) = open(&connector, TransportMode::Any, 25000, 20000).await?;
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.transport().await, TransportKind::Polling);

        let connector = MockConnector::new();
        let server = async {
            let peer = connector.accept().await;
            peer.open("abc", &["websocket"], 25000, 20000);
            peer
        };
        let (client, _peer) = tokio::join!(
            builder(&connector, TransportMode::Polling)?.build(),
            server
        );
        client?;
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_pings_are_answered() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = open(&connector, TransportMode::Websocket, 25000, 20000).await?;
        assert_eq!(peer.kind(), TransportKind::Websocket);
        assert_eq!(client.transport().await, TransportKind::Websocket);

        let mut stream = client.stream()?;
        peer.send_packet(Packet::new(PacketId::Ping, Bytes::new()));
        peer.send_message("hello");

        assert_eq!(
            stream.next().await.transpose()?,
            Some(Packet::new(PacketId::Message, "hello"))
        );
        assert_eq!(
            peer.recv_packet().await,
            Some(Packet::new(PacketId::Pong, Bytes::new()))
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ping_times_out() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = open(&connector, TransportMode::Websocket, 100, 50).await?;
        let mut stream = client.stream()?;

        let started = Instant::now();
        assert!(matches!(
            stream.next().await,
            Some(Err(Error::PingTimeout()))
        ));
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(stream.next().await.is_none());
        assert!(!client.is_connected());
        assert!(peer.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_packets_sent_with_the_open_packet() -> Result<()> {
        let connector = MockConnector::new();
        let server = async {
            let peer = connector.accept().await;
            peer.send_raw(
                r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#
                    .to_owned()
                    + "\x1e4hello",
            );
            peer
        };
        let (client, _peer) = tokio::join!(
            builder(&connector, TransportMode::Polling)?.build(),
            server
        );
        let mut stream = client?.stream()?;
        assert_eq!(
            stream.next().await.transpose()?,
            Some(Packet::new(PacketId::Message, "hello"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_handshake() -> Result<()> {
        let connector = MockConnector::new();
        let server = async {
            let peer = connector.accept().await;
            peer.send_message("not an open packet");
            peer
        };
        let (client, peer) = tokio::join!(
            builder(&connector, TransportMode::Websocket)?.build(),
            server
        );
        assert!(matches!(client, Err(Error::InvalidHandshake(_))));
        assert!(peer.is_closed());

        let server = async {
            let peer = connector.accept().await;
            peer.disconnect();
            peer
        };
        let (client, _peer) = tokio::join!(
            builder(&connector, TransportMode::Websocket)?.build(),
            server
        );
        assert!(matches!(client, Err(Error::InvalidHandshake(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() -> Result<()> {
        let connector = MockConnector::new();
        let (client, _peer) = tokio::join!(
            builder(&connector, TransportMode::Polling)?
                .handshake_timeout(Duration::from_secs(5))
                .build(),
            connector.accept()
        );
        assert!(matches!(client, Err(Error::TimedOut(5000))));
        Ok(())
    }

    #[tokio::test]
    async fn test_refused_connection() -> Result<()> {
        let connector = MockConnector::new();
        connector.refuse(1);
        let client = builder(&connector, TransportMode::Polling)?.build().await;
        match client {
            Err(err) => assert!(err.is_transport()),
            Ok(client) => panic!("connected despite refusal: {:?}", client),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_close() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = open(&connector, TransportMode::Websocket, 25000, 20000).await?;
        let mut stream = client.stream()?;
        assert!(matches!(client.stream(), Err(Error::IllegalStreamReuse())));

        client.close().await?;
        client.close().await?;

        assert_eq!(
            peer.recv_packet().await,
            Some(Packet::new(PacketId::Close, Bytes::new()))
        );
        assert!(peer.recv_packet().await.is_none());
        assert!(peer.is_closed());
        assert!(stream.next().await.is_none());
        assert!(matches!(
            client.emit(Packet::new(PacketId::Message, "late")).await,
            Err(Error::IllegalActionBeforeOpen())
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_close_and_transport_loss() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = open(&connector, TransportMode::Websocket, 25000, 20000).await?;
        let mut stream = client.stream()?;
        peer.send_packet(Packet::new(PacketId::Close, Bytes::new()));
        assert_eq!(
            stream.next().await.transpose()?.map(|packet| packet.packet_id),
            Some(PacketId::Close)
        );
        assert!(stream.next().await.is_none());
        assert!(!client.is_connected());

        let (client, peer) = open(&connector, TransportMode::Websocket, 25000, 20000).await?;
        let mut stream = client.stream()?;
        peer.disconnect();
        assert!(matches!(
            stream.next().await,
            Some(Err(Error::StoppedTransport()))
        ));
        assert!(stream.next().await.is_none());
        assert!(!client.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_binary_messages() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = open(&connector, TransportMode::Websocket, 25000, 20000).await?;
        let mut stream = client.stream()?;

        client
            .emit(Packet::new(PacketId::MessageBinary, vec![1u8, 2, 3]))
            .await?;
        let frame = peer.recv().await;
        assert_eq!(
            frame.map(|frame| (frame.is_binary, frame.data)),
            Some((true, Bytes::from_static(&[1, 2, 3])))
        );

        peer.send_packet(Packet::new(PacketId::MessageBinary, vec![4u8, 5]));
        assert_eq!(
            stream.next().await.transpose()?,
            Some(Packet::new(PacketId::MessageBinary, vec![4u8, 5]))
        );
        Ok(())
    }
}
