use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, Stream, StreamExt,
};
use http::HeaderMap;
use log::trace;
use native_tls::TlsConnector;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{
    net::TcpStream,
    sync::{Mutex, RwLock},
};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::client::IntoClientRequest, Connector,
    MaybeTlsStream, WebSocketStream,
};
use tungstenite::Message;
use url::Url;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::packet::{Packet, PacketId};
use crate::transport::{transport_url, Transport, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An asynchronous websocket transport type. Handles plain (`ws://`) and
/// secure (`wss://`) connections, the scheme follows the url it is opened
/// with.
pub struct WebsocketTransport {
    sender: Mutex<SplitSink<WsStream, Message>>,
    receiver: std::sync::Mutex<Option<SplitStream<WsStream>>>,
    base_url: RwLock<Url>,
    closed: AtomicBool,
}

impl WebsocketTransport {
    /// Creates a new instance over a request that might hold additional headers, a possible
    /// Tls connector and an URL.
    pub async fn new(
        base_url: Url,
        tls_config: Option<TlsConnector>,
        headers: Option<HeaderMap>,
    ) -> Result<Self> {
        let url = transport_url(base_url, TransportKind::Websocket)?;

        let mut req = url.as_str().into_client_request()?;
        if let Some(map) = headers {
            req.headers_mut().extend(map);
        }

        let (ws_stream, _) =
            connect_async_tls_with_config(req, None, false, tls_config.map(Connector::NativeTls))
                .await?;
        let (sender, receiver) = ws_stream.split();

        Ok(WebsocketTransport {
            sender: Mutex::new(sender),
            receiver: std::sync::Mutex::new(Some(receiver)),
            base_url: RwLock::new(url),
            closed: AtomicBool::new(false),
        })
    }

    /// Maps websocket frames to engine.io frames. Binary frames become
    /// base64 binary messages so they decode like their polling counterpart.
    fn frames(mut receiver: SplitStream<WsStream>) -> impl Stream<Item = Result<Bytes>> + Send {
        try_stream! {
            while let Some(message) = receiver.next().await {
                match message? {
                    Message::Text(text) => yield Bytes::from(text),
                    Message::Binary(data) => {
                        yield Bytes::from(Packet::new(PacketId::MessageBinary, data))
                    }
                    Message::Close(frame) => {
                        trace!("websocket closed by server: {:?}", frame);
                        break;
                    }
                    // ping, pong and raw frames are answered by tungstenite
                    _ => (),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WebsocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn emit(&self, data: Bytes, is_binary_att: bool) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StoppedTransport());
        }

        let message = if is_binary_att {
            Message::binary(data.to_vec())
        } else {
            Message::text(std::str::from_utf8(data.as_ref())?.to_owned())
        };

        self.sender.lock().await.send(message).await?;

        Ok(())
    }

    fn stream(&self) -> Result<Generator<Result<Bytes>>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(Error::IllegalStreamReuse())?;
        Ok(Box::pin(Self::frames(receiver)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sender = self.sender.lock().await;
        // the peer may already be gone
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
        Ok(())
    }

    async fn base_url(&self) -> Result<Url> {
        Ok(self.base_url.read().await.clone())
    }

    async fn set_base_url(&self, base_url: Url) -> Result<()> {
        *self.base_url.write().await = transport_url(base_url, TransportKind::Websocket)?;
        Ok(())
    }
}

impl Debug for WebsocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketTransport")
            .field(
                "base_url",
                &self
                    .base_url
                    .try_read()
                    .map_or("Currently not available".to_owned(), |url| url.to_string()),
            )
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
