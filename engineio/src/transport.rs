use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::transports::{PollingTransport, WebsocketTransport};
use adler32::adler32;
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use native_tls::TlsConnector;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

/// The two ways of carrying engine.io packets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransportKind {
    Polling,
    Websocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Websocket => "websocket",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transports a session may use.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TransportMode {
    /// Handshake over polling and upgrade to websocket when the server allows it.
    #[default]
    Any,
    Polling,
    Websocket,
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    fn kind(&self) -> TransportKind;

    /// Sends a packet to the server. This optionally handles sending of a
    /// socketio binary attachment via the boolean attribute `is_binary_att`.
    async fn emit(&self, data: Bytes, is_binary_att: bool) -> Result<()>;

    /// Returns the inbound frames of this transport. The stream is lazy and
    /// can be taken exactly once, a second call fails with
    /// [`Error::IllegalStreamReuse`].
    fn stream(&self) -> Result<Generator<Result<Bytes>>>;

    /// Closes the transport. Calling this more than once is a no-op.
    async fn close(&self) -> Result<()>;

    /// Returns start of the url. ex. http://localhost:2998/engine.io/?EIO=4&transport=polling
    /// Must have EIO and transport already set.
    async fn base_url(&self) -> Result<Url>;

    /// Used to update the base path, like when adding the sid.
    async fn set_base_url(&self, base_url: Url) -> Result<()>;

    /// Full query address
    async fn address(&self) -> Result<Url> {
        cache_busted(self.base_url().await?)
    }
}

/// Appends the `t` query parameter that keeps proxies from caching requests.
pub(crate) fn cache_busted(mut url: Url) -> Result<Url> {
    let reader = format!("{:#?}", SystemTime::now());
    let hash = adler32(reader.as_bytes())?;
    url.query_pairs_mut().append_pair("t", &hash.to_string());
    Ok(url)
}

/// Sets the `transport` query parameter for `kind`, replacing an existing one.
/// Websocket urls get their scheme switched to `ws`/`wss`.
pub fn transport_url(mut url: Url, kind: TransportKind) -> Result<Url> {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "transport")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("transport", kind.as_str());

    let scheme = match (kind, url.scheme()) {
        (TransportKind::Polling, "http" | "https") => None,
        (TransportKind::Polling, "ws") => Some("http"),
        (TransportKind::Polling, "wss") => Some("https"),
        (TransportKind::Websocket, "ws" | "wss") => None,
        (TransportKind::Websocket, "http") => Some("ws"),
        (TransportKind::Websocket, "https") => Some("wss"),
        (_, other) => return Err(Error::InvalidUrlScheme(other.to_owned())),
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidUrlScheme(scheme.to_owned()))?;
    }
    Ok(url)
}

/// Opens transports. The session asks its connector for every transport it
/// needs, which is the seam tests use to substitute in-memory transports.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self, kind: TransportKind, url: Url) -> Result<Arc<dyn Transport>>;
}

/// Opens real network transports with optional tls configuration and
/// opening headers.
#[derive(Clone, Debug, Default)]
pub struct DefaultConnector {
    tls_config: Option<TlsConnector>,
    headers: Option<HeaderMap>,
}

impl DefaultConnector {
    pub fn new(tls_config: Option<TlsConnector>, headers: Option<HeaderMap>) -> Self {
        DefaultConnector {
            tls_config,
            headers,
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, kind: TransportKind, url: Url) -> Result<Arc<dyn Transport>> {
        Ok(match kind {
            TransportKind::Polling => Arc::new(PollingTransport::new(
                url,
                self.tls_config.clone(),
                self.headers.clone(),
            )?),
            TransportKind::Websocket => Arc::new(
                WebsocketTransport::new(url, self.tls_config.clone(), self.headers.clone())
                    .await?,
            ),
        })
    }
}
