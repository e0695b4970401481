use http::{HeaderMap, HeaderName, HeaderValue};
use log::debug;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use unisock_engineio::{Connector, TransportMode};
use url::Url;

use crate::error::{Error, Result};
use crate::reconnect::ReconnectPolicy;

/// Connection settings of a [`crate::Client`]. Fixed once the client is
/// created.
#[derive(Clone, Debug)]
pub struct Config {
    /// Request path of the socket.io endpoint.
    pub path: String,
    pub transport: TransportMode,
    /// Switches `http`/`ws` urls to their tls counterpart.
    pub secure: bool,
    pub extra_headers: BTreeMap<String, String>,
    /// Query parameters sent with every request.
    pub connect_params: BTreeMap<String, String>,
    /// Payload of the CONNECT packet.
    pub auth: Option<serde_json::Value>,
    pub reconnects: bool,
    /// `None` retries forever.
    pub reconnect_attempts: Option<u32>,
    pub reconnect_wait: Duration,
    pub reconnect_wait_max: Duration,
    pub randomization_factor: f64,
    /// Time allowed for the server to confirm the connection. Defaults to the
    /// ping timeout announced in the handshake.
    pub connect_timeout: Option<Duration>,
    /// Accepted for compatibility, packets are never compressed.
    pub compress: bool,
    /// Accept self signed and otherwise invalid certificates.
    pub self_signed: bool,
    /// Every client owns its engine.io session, so this always holds.
    pub force_new: bool,
    /// Trace every packet sent and received.
    pub log: bool,
    pub tls_config: Option<TlsConnector>,
    /// Opens the transports; the network is used when unset.
    pub connector: Option<Arc<dyn Connector>>,
}

impl Default for Config {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Config {
            path: "/socket.io/".to_owned(),
            transport: TransportMode::Any,
            secure: false,
            extra_headers: BTreeMap::new(),
            connect_params: BTreeMap::new(),
            auth: None,
            reconnects: true,
            reconnect_attempts: policy.max_attempts,
            reconnect_wait: policy.base,
            reconnect_wait_max: policy.max,
            randomization_factor: policy.randomization_factor,
            connect_timeout: None,
            compress: false,
            self_signed: false,
            force_new: true,
            log: false,
            tls_config: None,
            connector: None,
        }
    }
}

/// The option list accepted by the client, one entry per setting.
#[derive(Clone, Debug)]
pub enum ClientOption {
    Auth(serde_json::Value),
    Compress,
    ConnectParams(BTreeMap<String, String>),
    ConnectTimeout(Duration),
    ExtraHeaders(BTreeMap<String, String>),
    ForceNew(bool),
    ForcePolling(bool),
    ForceWebsockets(bool),
    Log(bool),
    Path(String),
    /// A negative count retries forever.
    ReconnectAttempts(i32),
    ReconnectWait(Duration),
    ReconnectWaitMax(Duration),
    Reconnects(bool),
    RandomizationFactor(f64),
    Secure(bool),
    SelfSigned(bool),
}

impl Config {
    /// Builds a configuration from an option list. Later options override
    /// earlier ones.
    pub fn from_options<I: IntoIterator<Item = ClientOption>>(options: I) -> Result<Config> {
        let mut config = Config::default();
        for option in options {
            config.apply(option)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Applies a single option. Values are checked by [`Config::validate`].
    pub fn apply(&mut self, option: ClientOption) -> Result<()> {
        match option {
            ClientOption::Auth(auth) => self.auth = Some(auth),
            ClientOption::Compress => self.compress = true,
            ClientOption::ConnectParams(params) => self.connect_params = params,
            ClientOption::ConnectTimeout(timeout) => self.connect_timeout = Some(timeout),
            ClientOption::ExtraHeaders(headers) => self.extra_headers = headers,
            ClientOption::ForceNew(force_new) => self.force_new = force_new,
            ClientOption::ForcePolling(force) => {
                self.transport = forced(self.transport, TransportMode::Polling, force)?
            }
            ClientOption::ForceWebsockets(force) => {
                self.transport = forced(self.transport, TransportMode::Websocket, force)?
            }
            ClientOption::Log(log) => self.log = log,
            ClientOption::Path(path) => self.path = path,
            ClientOption::ReconnectAttempts(attempts) => {
                self.reconnect_attempts = u32::try_from(attempts).ok()
            }
            ClientOption::ReconnectWait(wait) => self.reconnect_wait = wait,
            ClientOption::ReconnectWaitMax(wait) => self.reconnect_wait_max = wait,
            ClientOption::Reconnects(reconnects) => self.reconnects = reconnects,
            ClientOption::RandomizationFactor(factor) => self.randomization_factor = factor,
            ClientOption::Secure(secure) => self.secure = secure,
            ClientOption::SelfSigned(self_signed) => self.self_signed = self_signed,
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfiguration(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(Error::InvalidConfiguration(format!(
                "randomization factor must be within [0, 1]: {}",
                self.randomization_factor
            )));
        }
        if self.reconnect_wait_max.is_zero() {
            return Err(Error::InvalidConfiguration(
                "maximum reconnection delay must not be zero".to_owned(),
            ));
        }
        if self.reconnect_wait > self.reconnect_wait_max {
            return Err(Error::InvalidConfiguration(format!(
                "reconnection delay {:?} exceeds the maximum {:?}",
                self.reconnect_wait, self.reconnect_wait_max
            )));
        }
        if self.connect_timeout.map_or(false, |timeout| timeout.is_zero()) {
            return Err(Error::InvalidConfiguration(
                "connect timeout must not be zero".to_owned(),
            ));
        }
        self.header_map()?;
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: self.reconnect_wait,
            max: self.reconnect_wait_max,
            randomization_factor: self.randomization_factor,
            max_attempts: self.reconnect_attempts,
        }
    }

    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.extra_headers.len());
        for (name, value) in &self.extra_headers {
            headers.insert(HeaderName::from_str(name)?, HeaderValue::from_str(value)?);
        }
        Ok(headers)
    }

    /// Parses and checks the server address. Only `http`, `https`, `ws` and
    /// `wss` are accepted.
    pub fn server_url(&self, address: &str) -> Result<Url> {
        let mut url = Url::parse(address)?;
        let secure_scheme = match url.scheme() {
            "http" | "https" | "ws" | "wss" if !self.secure => None,
            "http" => Some("https"),
            "ws" => Some("wss"),
            "https" | "wss" => None,
            other => return Err(Error::InvalidUrlScheme(other.to_owned())),
        };
        if let Some(scheme) = secure_scheme {
            url.set_scheme(scheme)
                .map_err(|_| Error::InvalidUrlScheme(scheme.to_owned()))?;
        }
        Ok(url)
    }

    /// The tls connector handed to the transports, if any.
    pub fn tls_connector(&self) -> Result<Option<TlsConnector>> {
        if let Some(tls_config) = self.tls_config.as_ref() {
            return Ok(Some(tls_config.clone()));
        }
        if !self.self_signed {
            return Ok(None);
        }
        debug!("accepting invalid certificates");
        TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map(Some)
            .map_err(|err| Error::InvalidConfiguration(err.to_string()))
    }
}

/// The transport mode after forcing (or releasing) `mode`.
fn forced(current: TransportMode, mode: TransportMode, force: bool) -> Result<TransportMode> {
    match (force, current) {
        (true, TransportMode::Any) => Ok(mode),
        (true, current) if current == mode => Ok(mode),
        (true, _) => Err(Error::InvalidConfiguration(
            "cannot force both polling and websockets".to_owned(),
        )),
        (false, current) if current == mode => Ok(TransportMode::Any),
        (false, current) => Ok(current),
    }
}
