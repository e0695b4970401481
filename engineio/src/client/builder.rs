use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;
use log::debug;
use native_tls::TlsConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

use super::Client;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::packet::{HandshakePacket, Packet, Payload};
use crate::socket::Socket;
use crate::transport::{Connector, DefaultConnector, Transport, TransportKind, TransportMode};
use crate::ENGINE_IO_VERSION;

/// Same default as the reference javascript client.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Configures and opens an engine.io session.
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    url: Url,
    tls_config: Option<TlsConnector>,
    headers: Option<HeaderMap>,
    connector: Option<Arc<dyn Connector>>,
    mode: TransportMode,
    handshake_timeout: Duration,
}

/// A transport that delivered the open packet.
struct Opened {
    transport: Arc<dyn Transport>,
    stream: Generator<Result<Bytes>>,
    handshake: HandshakePacket,
    buffered: Vec<Packet>,
}

impl ClientBuilder {
    pub fn new(url: Url) -> Self {
        let mut url = url;
        url.query_pairs_mut()
            .append_pair("EIO", &ENGINE_IO_VERSION.to_string());

        // No path add engine.io
        if url.path() == "/" {
            url.set_path("/engine.io/");
        }
        ClientBuilder {
            url,
            tls_config: None,
            headers: None,
            connector: None,
            mode: TransportMode::Any,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Overrides the request path, e.g. `/socket.io/`.
    pub fn path(mut self, path: &str) -> Self {
        self.url.set_path(path);
        self
    }

    /// Appends a query parameter to every request of the session.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    /// Specify transport's tls config
    pub fn tls_config(mut self, tls_config: TlsConnector) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Specify transport's HTTP headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Opens transports through `connector` instead of the network. Tls
    /// config and headers are then up to the connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounds the time until the server's open packet arrives.
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Performs the handshake and returns a connected client. Polling is used
    /// for the handshake unless the mode forces websockets. In
    /// [`TransportMode::Any`] the session upgrades to websocket in the
    /// background when the server offers it.
    pub async fn build(self) -> Result<Client> {
        let ClientBuilder {
            url,
            tls_config,
            headers,
            connector,
            mode,
            handshake_timeout,
        } = self;
        let connector =
            connector.unwrap_or_else(|| Arc::new(DefaultConnector::new(tls_config, headers)));

        let kind = match mode {
            TransportMode::Websocket => TransportKind::Websocket,
            TransportMode::Any | TransportMode::Polling => TransportKind::Polling,
        };

        let opened = timeout(
            handshake_timeout,
            Self::handshake(connector.as_ref(), kind, url.clone()),
        )
        .await
        .map_err(|_| Error::TimedOut(handshake_timeout.as_millis() as u64))??;

        // update the base_url with the new sid
        let mut url = url;
        url.query_pairs_mut()
            .append_pair("sid", &opened.handshake.sid[..]);
        opened.transport.set_base_url(url.clone()).await?;
        debug!(
            "engine.io session {} opened over {}",
            opened.handshake.sid,
            opened.transport.kind()
        );

        let allows_websocket = opened.handshake.allows_websocket();
        let socket = Socket::new(
            opened.transport,
            opened.stream,
            opened.handshake,
            opened.buffered,
        );

        if mode == TransportMode::Any {
            if allows_websocket {
                socket.spawn_upgrade(connector, url);
            } else {
                debug!("server does not offer websocket, staying on polling");
            }
        }

        Ok(Client::new(socket))
    }

    async fn handshake(connector: &dyn Connector, kind: TransportKind, url: Url) -> Result<Opened> {
        let transport = connector.connect(kind, url).await?;
        let mut stream = transport.stream()?;
        match Self::read_open(&mut stream).await {
            Ok((handshake, buffered)) => Ok(Opened {
                transport,
                stream,
                handshake,
                buffered,
            }),
            Err(err) => {
                let _ = transport.close().await;
                Err(err)
            }
        }
    }

    /// Reads the open packet, packets sent along with it are kept.
    async fn read_open(
        stream: &mut Generator<Result<Bytes>>,
    ) -> Result<(HandshakePacket, Vec<Packet>)> {
        let bytes = stream.next().await.ok_or_else(|| {
            Error::InvalidHandshake("connection closed before the open packet".to_owned())
        })??;

        let mut packets = Payload::try_from(bytes)
            .map_err(|err| Error::InvalidHandshake(err.to_string()))?
            .into_iter();
        let open = packets
            .next()
            .ok_or_else(|| Error::InvalidHandshake("empty payload".to_owned()))?;
        let handshake = HandshakePacket::try_from(open)?;

        Ok((handshake, packets.collect()))
    }
}
