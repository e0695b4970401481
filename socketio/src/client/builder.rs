use native_tls::TlsConnector;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use unisock_engineio::{Connector, TransportMode};

use super::ack::AckSender;
use super::callback::{Callback, DynCallback};
use super::client::{Client, Listeners};
use crate::config::{ClientOption, Config};
use crate::error::Result;
use crate::{Event, Value};

/// A builder class for a `socket.io` client. This handles setting up the
/// client and configuring the callbacks and connection settings. The
/// `connect` method acts as the `build` method and returns a connected
/// [`Client`].
pub struct ClientBuilder {
    address: String,
    options: Vec<ClientOption>,
    opening_headers: BTreeMap<String, String>,
    connect_params: BTreeMap<String, String>,
    tls_config: Option<TlsConnector>,
    connector: Option<Arc<dyn Connector>>,
    on: Listeners,
}

impl ClientBuilder {
    /// Create as client builder from a URL. URLs must be in the form
    /// `[ws or wss or http or https]://[domain]:[port]`. If no port is
    /// given, the default port of the scheme is used.
    /// # Example
    /// ```rust,no_run
    /// use unisock::{ClientBuilder, Value};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let socket = ClientBuilder::new("http://localhost:4200")
    ///         .on("test", |args: Vec<Value>, _| async move {
    ///             println!("Received: {:?}", args);
    ///         })
    ///         .connect()
    ///         .await
    ///         .expect("error while connecting");
    ///
    ///     let result = socket.emit("foo", vec![Value::from("bar")]);
    ///     assert!(result.is_ok());
    /// }
    /// ```
    pub fn new<T: Into<String>>(address: T) -> Self {
        Self {
            address: address.into(),
            options: Vec::new(),
            opening_headers: BTreeMap::new(),
            connect_params: BTreeMap::new(),
            tls_config: None,
            connector: None,
            on: HashMap::new(),
        }
    }

    /// Registers a new callback for a certain [`crate::event::Event`]. The event could either be
    /// one of the lifecycle events like `connect`, `disconnect`, `error` or
    /// `reconnect`, or a custom event defined by a string, e.g. `onPayment`
    /// or `foo`. Several callbacks may be registered for one event.
    pub fn on<E, F, Fut>(mut self, event: E, callback: F) -> Self
    where
        E: Into<Event>,
        F: FnMut(Vec<Value>, Client) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        self.on
            .entry(event.into())
            .or_default()
            .push(Callback::<DynCallback>::new(callback));
        self
    }

    /// Registers a callback for events the server wants acknowledged, see
    /// [`Client::on_with_ack`].
    pub fn on_with_ack<E, F, Fut>(mut self, event: E, callback: F) -> Self
    where
        E: Into<Event>,
        F: FnMut(Vec<Value>, Client, AckSender) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        self.on
            .entry(event.into())
            .or_default()
            .push(Callback::<DynCallback>::new_with_ack(callback));
        self
    }

    /// Applies an entry of the option list.
    pub fn option(mut self, option: ClientOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn options<I: IntoIterator<Item = ClientOption>>(mut self, options: I) -> Self {
        self.options.extend(options);
        self
    }

    /// Request path of the server, `/socket.io/` unless set.
    pub fn path<T: Into<String>>(self, path: T) -> Self {
        self.option(ClientOption::Path(path.into()))
    }

    /// Restricts the transports. [`TransportMode::Any`] starts with polling
    /// and upgrades to websocket when possible.
    pub fn transport_type(self, mode: TransportMode) -> Self {
        self.option(ClientOption::ForcePolling(mode == TransportMode::Polling))
            .option(ClientOption::ForceWebsockets(mode == TransportMode::Websocket))
    }

    /// Sets a custom http header sent with every request of the transports.
    pub fn opening_header<K: Into<String>, V: Into<String>>(mut self, key: K, val: V) -> Self {
        self.opening_headers.insert(key.into(), val.into());
        self
    }

    /// Adds a query parameter to every request of the transports.
    pub fn query<K: Into<String>, V: Into<String>>(mut self, key: K, val: V) -> Self {
        self.connect_params.insert(key.into(), val.into());
        self
    }

    /// Payload of the connect packet, e.g. a token the server checks.
    pub fn auth(self, auth: serde_json::Value) -> Self {
        self.option(ClientOption::Auth(auth))
    }

    /// Whether to reconnect after the connection was lost. Enabled by default.
    pub fn reconnect(self, reconnect: bool) -> Self {
        self.option(ClientOption::Reconnects(reconnect))
    }

    /// Bounds the delay between reconnection attempts.
    pub fn reconnect_delay(self, min: Duration, max: Duration) -> Self {
        self.option(ClientOption::ReconnectWait(min))
            .option(ClientOption::ReconnectWaitMax(max))
    }

    /// Gives up after `attempts` failed reconnection attempts in a row.
    pub fn max_reconnect_attempts(self, attempts: u32) -> Self {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
        self.option(ClientOption::ReconnectAttempts(attempts))
    }

    pub fn randomization_factor(self, factor: f64) -> Self {
        self.option(ClientOption::RandomizationFactor(factor))
    }

    /// Time the server has to accept the connection.
    pub fn connect_timeout(self, timeout: Duration) -> Self {
        self.option(ClientOption::ConnectTimeout(timeout))
    }

    /// Uses a preconfigured TLS connector for secure communication. This configures
    /// both the `polling` as well as the `websocket` transport type.
    pub fn tls_config(mut self, tls_config: TlsConnector) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Opens transports through `connector`, e.g. in-memory ones in tests.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Traces every packet sent and received.
    pub fn log(self, log: bool) -> Self {
        self.option(ClientOption::Log(log))
    }

    fn config(mut self) -> Result<(String, Config, Listeners)> {
        if !self.opening_headers.is_empty() {
            self.options
                .push(ClientOption::ExtraHeaders(self.opening_headers));
        }
        if !self.connect_params.is_empty() {
            self.options
                .push(ClientOption::ConnectParams(self.connect_params));
        }
        let mut config = Config::from_options(self.options)?;
        config.tls_config = self.tls_config;
        config.connector = self.connector;
        Ok((self.address, config, self.on))
    }

    /// Creates the client without connecting it.
    pub fn build(self) -> Result<Client> {
        let (address, config, on) = self.config()?;
        Client::with_listeners(&address, config, on)
    }

    /// Creates the client and connects it to the server.
    pub async fn connect(self) -> Result<Client> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
