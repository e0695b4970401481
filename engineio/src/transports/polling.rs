use async_stream::try_stream;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use http::HeaderMap;
use log::trace;
use native_tls::TlsConnector;
use reqwest::{Client, ClientBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::transport::{cache_busted, transport_url, Transport, TransportKind};

/// Bounds connecting and every POST. Long-polling GETs may legitimately
/// last a whole ping interval, the session heartbeat bounds those.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// An asynchronous polling type. Makes use of the nonblocking reqwest types and
/// methods.
#[derive(Clone, Debug)]
pub struct PollingTransport {
    client: Client,
    base_url: Arc<RwLock<Url>>,
    stream_taken: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl PollingTransport {
    pub fn new(
        base_url: Url,
        tls_config: Option<TlsConnector>,
        opening_headers: Option<HeaderMap>,
    ) -> Result<Self> {
        let mut builder = ClientBuilder::new().connect_timeout(REQUEST_TIMEOUT);
        if let Some(config) = tls_config {
            builder = builder.use_preconfigured_tls(config);
        }
        if let Some(map) = opening_headers {
            builder = builder.default_headers(map);
        }

        Ok(PollingTransport {
            client: builder.build()?,
            base_url: Arc::new(RwLock::new(transport_url(base_url, TransportKind::Polling)?)),
            stream_taken: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Issues one GET at a time, the next one once the previous response body
    /// was handed out.
    fn poll_loop(
        client: Client,
        base_url: Arc<RwLock<Url>>,
        closed: Arc<AtomicBool>,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        try_stream! {
            while !closed.load(Ordering::Acquire) {
                let address = cache_busted(base_url.read().await.clone())?;
                trace!("polling {}", address);
                let response = client.get(address).send().await?;
                let status = response.status().as_u16();
                if status != 200 {
                    Err(Error::IncompleteHttp(status))?;
                }
                let body = response.bytes().await?;
                if !body.is_empty() {
                    yield body;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn emit(&self, data: Bytes, is_binary_att: bool) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StoppedTransport());
        }

        let data_to_send = if is_binary_att {
            // the binary attachment gets `base64` encoded
            let mut packet_bytes = BytesMut::with_capacity(data.len() + 1);
            packet_bytes.put_u8(b'b');

            let encoded_data = general_purpose::STANDARD.encode(data);
            packet_bytes.put(encoded_data.as_bytes());

            packet_bytes.freeze()
        } else {
            data
        };

        let status = self
            .client
            .post(self.address().await?)
            .timeout(REQUEST_TIMEOUT)
            .body(data_to_send)
            .send()
            .await?
            .status()
            .as_u16();

        if status != 200 {
            let error = Error::IncompleteHttp(status);
            return Err(error);
        }

        Ok(())
    }

    fn stream(&self) -> Result<Generator<Result<Bytes>>> {
        if self.stream_taken.swap(true, Ordering::AcqRel) {
            return Err(Error::IllegalStreamReuse());
        }

        Ok(Box::pin(Self::poll_loop(
            self.client.clone(),
            self.base_url.clone(),
            self.closed.clone(),
        )))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn base_url(&self) -> Result<Url> {
        Ok(self.base_url.read().await.clone())
    }

    async fn set_base_url(&self, base_url: Url) -> Result<()> {
        *self.base_url.write().await = transport_url(base_url, TransportKind::Polling)?;
        Ok(())
    }
}
