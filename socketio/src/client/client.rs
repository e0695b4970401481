use futures_util::future::BoxFuture;
use log::trace;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

use super::ack::{AckHandler, AckSender};
use super::callback::{run_isolated, Callback, DynAckCallback, DynCallback};
use super::driver::{Dispatch, Driver};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::{Event, Value};

pub(crate) type Listeners = HashMap<Event, Vec<Callback<DynCallback>>>;

/// Lifecycle of a [`Client`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    /// Not connected. This is the initial state and the state after
    /// [`Client::disconnect`], a server side disconnect or exhausted
    /// reconnection attempts. Only [`Client::connect`] leaves it.
    Disconnected,
    Connecting,
    Connected,
    /// The connection was lost and the client tries to restore it.
    Reconnecting,
}

/// Requests handed to the driver task.
pub(crate) enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<()>),
    Emit {
        event: String,
        args: Vec<Value>,
    },
    EmitWithAck {
        event: String,
        args: Vec<Value>,
        timeout: Duration,
        handler: AckHandler,
    },
    Ack {
        id: i32,
        args: Vec<Value>,
    },
}

struct Shared {
    commands: UnboundedSender<Command>,
    listeners: Mutex<Listeners>,
    state: watch::Receiver<ConnectionState>,
}

/// A socket.io client for the default namespace. Cloning yields another
/// handle to the same connection; the connection is released once every
/// handle is dropped.
///
/// All work happens on a driver task spawned on the tokio runtime the client
/// is created in. Methods only hand requests to that task, so [`Client::emit`]
/// and friends never wait for the network.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Shared>,
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Creates a disconnected client for the server at `address`, which must
    /// be an `http`, `https`, `ws` or `wss` url. Has to be called within a
    /// tokio runtime.
    ///
    /// # Example
    /// ```rust,no_run
    /// use unisock::{Client, Config, Value};
    ///
    /// # async fn run() -> Result<(), unisock::Error> {
    /// let client = Client::new("http://localhost:4200", Config::default())?;
    /// client.on("news", |args: Vec<Value>, _| async move {
    ///     println!("news: {:?}", args);
    /// });
    /// client.connect().await?;
    /// client.emit("update", vec!["hello".into(), 1.into()])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<T: AsRef<str>>(address: T, config: Config) -> Result<Client> {
        Self::with_listeners(address.as_ref(), config, HashMap::new())
    }

    pub(crate) fn with_listeners(address: &str, config: Config, listeners: Listeners) -> Result<Client> {
        config.validate()?;
        let url = config.server_url(address)?;
        let headers = config.header_map()?;
        let tls_config = config.tls_connector()?;
        let runtime = Handle::try_current().map_err(|_| Error::MissingRuntime())?;

        let (commands_tx, commands_rx) = unbounded_channel();
        let (dispatch_tx, dispatch_rx) = unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let client = Client {
            inner: Arc::new(Shared {
                commands: commands_tx,
                listeners: Mutex::new(listeners),
                state: state_rx,
            }),
        };

        let driver = Driver::new(
            url,
            config,
            headers,
            tls_config,
            commands_rx,
            dispatch_tx,
            state_tx,
        );
        runtime.spawn(driver.run());
        runtime.spawn(Self::dispatch_loop(Arc::downgrade(&client.inner), dispatch_rx));

        Ok(client)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::StoppedClient())
    }

    /// Connects to the server and waits until the server accepted the
    /// connection. Does nothing while the client is connecting, connected or
    /// reconnecting.
    ///
    /// A failed connection is reported here and with a `connect_error` event,
    /// it is not retried.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Connect(tx))?;
        rx.await.map_err(|_| Error::StoppedClient())?
    }

    /// Leaves the namespace and closes the connection. Stops reconnecting,
    /// drops queued packets and pending acknowledgements without invoking
    /// their callbacks.
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Disconnect(tx))?;
        rx.await.map_err(|_| Error::StoppedClient())
    }

    /// Registers a listener for `event`. Listeners for the same event run in
    /// registration order, one after another.
    pub fn on<E, F, Fut>(&self, event: E, callback: F)
    where
        E: Into<Event>,
        F: FnMut(Vec<Value>, Client) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        self.register(event.into(), Callback::<DynCallback>::new(callback));
    }

    /// Registers a listener for events the server wants acknowledged.
    ///
    /// # Example
    /// ```rust,no_run
    /// use unisock::{AckSender, Client, Config, Value};
    ///
    /// # fn run() -> Result<(), unisock::Error> {
    /// let client = Client::new("http://localhost:4200", Config::default())?;
    /// client.on_with_ack("question", |_args: Vec<Value>, _, ack: AckSender| async move {
    ///     let _ = ack.send(vec![42.into()]);
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn on_with_ack<E, F, Fut>(&self, event: E, callback: F)
    where
        E: Into<Event>,
        F: FnMut(Vec<Value>, Client, AckSender) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        self.register(event.into(), Callback::<DynCallback>::new_with_ack(callback));
    }

    fn register(&self, event: Event, callback: Callback<DynCallback>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(event)
            .or_default()
            .push(callback);
    }

    /// Sends an event. While the client is not connected the event is queued
    /// and sent once the connection is (re)established.
    pub fn emit<E: Into<Event>>(&self, event: E, args: Vec<Value>) -> Result<()> {
        self.send(Command::Emit {
            event: String::from(event.into()),
            args,
        })
    }

    /// Sends an event and asks the server to acknowledge it. `callback` gets
    /// the acknowledgement's arguments, or [`Error::AckTimeout`] when none
    /// arrived within `timeout`.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::time::Duration;
    /// use unisock::{Client, Config, Value};
    ///
    /// # fn run() -> Result<(), unisock::Error> {
    /// let client = Client::new("http://localhost:4200", Config::default())?;
    /// client.emit_with_ack("ping", vec![], Duration::from_secs(2), |result, _| async move {
    ///     match result {
    ///         Ok(args) => println!("acknowledged with {:?}", args),
    ///         Err(err) => eprintln!("no acknowledgement: {}", err),
    ///     }
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn emit_with_ack<E, F, Fut>(
        &self,
        event: E,
        args: Vec<Value>,
        timeout: Duration,
        callback: F,
    ) -> Result<()>
    where
        E: Into<Event>,
        F: FnOnce(Result<Vec<Value>>, Client) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        self.send(Command::EmitWithAck {
            event: String::from(event.into()),
            args,
            timeout,
            handler: AckHandler::Callback(Callback::<DynAckCallback>::new(callback)),
        })
    }

    /// Sends an event and waits for its acknowledgement. May be awaited
    /// inside a listener.
    pub async fn call<E: Into<Event>>(
        &self,
        event: E,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::EmitWithAck {
            event: String::from(event.into()),
            args,
            timeout,
            handler: AckHandler::Reply(tx),
        })?;
        rx.await.map_err(|_| Error::StoppedClient())?
    }

    pub(crate) fn ack(&self, id: i32, args: Vec<Value>) -> Result<()> {
        self.send(Command::Ack { id, args })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Starts the listeners of `event`. They are taken out of the registry
    /// meanwhile so a listener may register further listeners.
    fn start_listeners(
        &self,
        event: &Event,
        args: Vec<Value>,
        ack: Option<i32>,
    ) -> Vec<BoxFuture<'static, ()>> {
        let taken = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(event);
        let mut callbacks = match taken {
            Some(callbacks) => callbacks,
            None => {
                trace!("no listener for {}", event);
                return Vec::new();
            }
        };

        let futures = callbacks
            .iter_mut()
            .filter_map(|callback| {
                let ack = ack.map(|id| AckSender::new(self.clone(), id));
                callback.start(args.clone(), self.clone(), ack)
            })
            .collect();

        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let added = listeners.remove(event).unwrap_or_default();
        callbacks.extend(added);
        listeners.insert(event.clone(), callbacks);
        futures
    }

    /// Runs listeners and acknowledgement callbacks in the order the driver
    /// produced them.
    async fn dispatch_loop(shared: Weak<Shared>, mut dispatches: UnboundedReceiver<Dispatch>) {
        while let Some(dispatch) = dispatches.recv().await {
            let client = match shared.upgrade() {
                Some(inner) => Client { inner },
                None => break,
            };
            match dispatch {
                Dispatch::Event { event, args, ack } => {
                    for future in client.start_listeners(&event, args, ack) {
                        run_isolated(future).await;
                    }
                }
                Dispatch::Ack { callback, result } => callback.call(result, client).await,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ClientBuilder;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{sleep, timeout, Instant};
    use unisock_engineio::testing::{MockConnector, MockPeer};
    use unisock_engineio::{
        Connector, Generator, Packet as EnginePacket, PacketId as EnginePacketId,
        Result as EngineResult, Transport, TransportKind, TransportMode,
    };
    use url::Url;

    const URL: &str = "http://localhost:4200";

    type Recorded = UnboundedReceiver<(String, Vec<Value>)>;

    fn config(connector: &MockConnector) -> Config {
        Config {
            transport: TransportMode::Websocket,
            connector: Some(Arc::new(connector.clone())),
            reconnect_wait: Duration::from_millis(100),
            reconnect_wait_max: Duration::from_millis(400),
            randomization_factor: 0.0,
            ..Default::default()
        }
    }

    fn record(client: &Client, events: &[&'static str]) -> Recorded {
        let (tx, rx) = unbounded_channel();
        for &name in events {
            let tx = tx.clone();
            client.on(name, move |args, _| {
                let _ = tx.send((name.to_owned(), args));
                async {}
            });
        }
        rx
    }

    async fn next_name(events: &mut Recorded) -> Option<String> {
        events.recv().await.map(|(name, _)| name)
    }

    /// Next socket.io message the client wrote.
    async fn next_message(peer: &MockPeer) -> String {
        let packet = peer.recv_message().await.expect("transport closed");
        assert_eq!(packet.packet_id, EnginePacketId::Message);
        String::from_utf8(packet.data.to_vec()).expect("message is not utf-8")
    }

    /// Plays the server side of the engine.io and socket.io handshakes.
    async fn accept(connector: &MockConnector) -> MockPeer {
        let peer = connector.accept().await;
        peer.open("abc", &[], 25000, 20000);
        assert_eq!(next_message(&peer).await, "0");
        peer.send_message(r#"0{"sid":"xyz"}"#);
        peer
    }

    async fn connected(connector: &MockConnector, config: Config) -> Result<(Client, MockPeer)> {
        let client = Client::new(URL, config)?;
        let (result, peer) = tokio::join!(client.connect(), accept(connector));
        result?;
        Ok((client, peer))
    }

    /// In-memory transport whose writes hang once `stalled` is set.
    #[derive(Debug)]
    struct StallingTransport {
        inner: Arc<dyn Transport>,
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        fn kind(&self) -> TransportKind {
            self.inner.kind()
        }

        async fn emit(&self, data: Bytes, is_binary_att: bool) -> EngineResult<()> {
            if self.stalled.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }
            self.inner.emit(data, is_binary_att).await
        }

        fn stream(&self) -> EngineResult<Generator<EngineResult<Bytes>>> {
            self.inner.stream()
        }

        async fn close(&self) -> EngineResult<()> {
            self.inner.close().await
        }

        async fn base_url(&self) -> EngineResult<Url> {
            self.inner.base_url().await
        }

        async fn set_base_url(&self, base_url: Url) -> EngineResult<()> {
            self.inner.set_base_url(base_url).await
        }
    }

    #[derive(Debug)]
    struct StallingConnector {
        inner: MockConnector,
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for StallingConnector {
        async fn connect(&self, kind: TransportKind, url: Url) -> EngineResult<Arc<dyn Transport>> {
            let inner = self.inner.connect(kind, url).await?;
            Ok(Arc::new(StallingTransport {
                inner,
                stalled: self.stalled.clone(),
            }))
        }
    }

    async fn wait_for(client: &Client, state: ConnectionState) {
        let mut watch = client.watch_state();
        watch
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .expect("driver stopped");
    }

    #[tokio::test]
    async fn test_connect_and_receive_events() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;
        let mut events = record(&client, &["connect", "news"]);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (result, peer) = tokio::join!(client.connect(), accept(&connector));
        result?;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(peer.url().path(), "/socket.io/");
        assert_eq!(next_name(&mut events).await.as_deref(), Some("connect"));

        peer.send_message(r#"2["news",{"hello":"world"},1]"#);
        assert_eq!(
            events.recv().await,
            Some((
                "news".to_owned(),
                vec![Value::from(json!({"hello": "world"})), Value::from(1)]
            ))
        );

        // connecting again is a no-op
        client.connect().await?;
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_listeners_run_in_registration_order() -> Result<()> {
        let connector = MockConnector::new();
        let (tx, mut order) = unbounded_channel();
        let first = tx.clone();
        let client = ClientBuilder::new(URL)
            .transport_type(TransportMode::Websocket)
            .connector(Arc::new(connector.clone()))
            .on("update", move |_, _| {
                let _ = first.send("first");
                async {}
            })
            .build()?;
        client.on("update", |_, _| async { panic!("listener failed") });
        client.on("update", move |_, _| {
            let _ = tx.send("second");
            async {}
        });

        let (result, peer) = tokio::join!(client.connect(), accept(&connector));
        result?;
        peer.send_message(r#"2["update"]"#);
        assert_eq!(order.recv().await, Some("first"));
        assert_eq!(order.recv().await, Some("second"));

        // the panic did not stop the dispatching either
        peer.send_message(r#"2["update"]"#);
        assert_eq!(order.recv().await, Some("first"));
        assert_eq!(order.recv().await, Some("second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_emits_before_connect_follow_the_connect_packet() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;
        client.emit("update", vec!["hello".into(), 1.into()])?;
        client.emit("update", vec!["again".into()])?;

        let (result, peer) = tokio::join!(client.connect(), accept(&connector));
        result?;
        assert_eq!(next_message(&peer).await, r#"2["update","hello",1]"#);
        assert_eq!(next_message(&peer).await, r#"2["update","again"]"#);
        assert!(timeout(Duration::from_millis(100), peer.recv_message())
            .await
            .is_err());

        client.emit("update", vec![])?;
        assert_eq!(next_message(&peer).await, r#"2["update"]"#);
        Ok(())
    }

    #[tokio::test]
    async fn test_emits_while_connecting_follow_the_connect_packet() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;

        let server = async {
            let peer = connector.accept().await;
            assert_eq!(client.state(), ConnectionState::Connecting);
            client.emit("early", vec![1.into()])?;
            peer.open("abc", &[], 25000, 20000);
            assert_eq!(next_message(&peer).await, "0");
            client.emit("late", vec![])?;
            peer.send_message(r#"0{"sid":"xyz"}"#);
            Ok::<_, Error>(peer)
        };
        let (result, peer) = tokio::join!(client.connect(), server);
        result?;
        let peer = peer?;
        assert_eq!(next_message(&peer).await, r#"2["early",1]"#);
        assert_eq!(next_message(&peer).await, r#"2["late"]"#);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_write_respects_the_connect_timeout() -> Result<()> {
        let connector = MockConnector::new();
        let stalled = Arc::new(AtomicBool::new(true));
        let config = Config {
            connect_timeout: Some(Duration::from_secs(1)),
            connector: Some(Arc::new(StallingConnector {
                inner: connector.clone(),
                stalled,
            })),
            ..config(&connector)
        };
        let client = Client::new(URL, config)?;

        let server = async {
            let peer = connector.accept().await;
            peer.open("abc", &[], 25000, 20000);
            peer
        };
        let started = Instant::now();
        let (result, _peer) = tokio::join!(
            timeout(Duration::from_secs(30), client.connect()),
            server
        );
        let err = result
            .expect("connect did not give up")
            .expect_err("the connect packet was never written");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        timeout(Duration::from_secs(30), client.disconnect())
            .await
            .expect("disconnect did not return")?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_ends_the_session() -> Result<()> {
        let connector = MockConnector::new();
        let stalled = Arc::new(AtomicBool::new(false));
        let config = Config {
            connect_timeout: Some(Duration::from_secs(1)),
            reconnects: false,
            connector: Some(Arc::new(StallingConnector {
                inner: connector.clone(),
                stalled: stalled.clone(),
            })),
            ..config(&connector)
        };
        let (client, _peer) = connected(&connector, config).await?;
        let mut events = record(&client, &["disconnect"]);

        stalled.store(true, Ordering::Release);
        client.emit("update", vec![])?;
        timeout(
            Duration::from_secs(30),
            wait_for(&client, ConnectionState::Disconnected),
        )
        .await
        .expect("the stalled write was not given up");
        assert_eq!(
            events.recv().await,
            Some(("disconnect".to_owned(), vec![Value::from("transport error")]))
        );

        timeout(Duration::from_secs(30), client.disconnect())
            .await
            .expect("disconnect did not return")?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_inside_a_listener() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let (tx, mut results) = unbounded_channel();
        client.on("news", move |_, client| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(client.call("question", vec![], Duration::from_secs(1)).await);
            }
        });
        let mut events = record(&client, &["update"]);

        peer.send_message(r#"2["news"]"#);
        assert_eq!(next_message(&peer).await, r#"20["question"]"#);
        let result = results.recv().await.expect("listener dropped");
        assert!(matches!(result, Err(Error::AckTimeout(1000))));

        // later events still reach their listeners
        peer.send_message(r#"2["update"]"#);
        assert_eq!(next_name(&mut events).await.as_deref(), Some("update"));

        peer.send_message(r#"2["news"]"#);
        assert_eq!(next_message(&peer).await, r#"21["question"]"#);
        peer.send_message(r#"31["yes"]"#);
        let result = results.recv().await.expect("listener dropped");
        assert_eq!(result?, vec![Value::from("yes")]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ack_times_out_once() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let mut errors = record(&client, &["error"]);

        let (tx, mut results) = unbounded_channel();
        client.emit_with_ack("ping", vec![], Duration::from_secs(1), move |result, _| {
            async move {
                let _ = tx.send(result);
            }
        })?;
        assert_eq!(next_message(&peer).await, r#"20["ping"]"#);

        let result = results.recv().await.expect("callback dropped");
        assert!(matches!(result, Err(Error::AckTimeout(1000))));
        // invoked once, the callback is gone afterwards
        assert!(results.recv().await.is_none());

        // a late acknowledgement is discarded quietly
        peer.send_message("30[]");
        sleep(Duration::from_secs(1)).await;
        assert!(errors.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_acknowledgements() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;

        let server = async {
            assert_eq!(next_message(&peer).await, r#"20["ping",1]"#);
            peer.send_message(r#"30["pong"]"#);
        };
        let (result, ()) = tokio::join!(
            client.call("ping", vec![1.into()], Duration::from_secs(5)),
            server
        );
        assert_eq!(result?, vec![Value::from("pong")]);

        // ids keep increasing, binary acknowledgements are reassembled
        let server = async {
            assert_eq!(next_message(&peer).await, r#"21["file"]"#);
            peer.send_message(r#"61-1[{"_placeholder":true,"num":0}]"#);
            peer.send_packet(EnginePacket::new(
                EnginePacketId::MessageBinary,
                Bytes::from_static(b"\x01\x02"),
            ));
        };
        let (result, ()) = tokio::join!(
            client.call("file", vec![], Duration::from_secs(5)),
            server
        );
        assert_eq!(
            result?,
            vec![Value::Binary(Bytes::from_static(b"\x01\x02"))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_answer_server_acknowledgement() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        client.on_with_ack("question", |args, _, ack| async move {
            let _ = ack.send(vec![Value::from(format!("answer to {}", args.len()))]);
        });

        peer.send_message(r#"27["question","a"]"#);
        assert_eq!(next_message(&peer).await, r#"37["answer to 1"]"#);
        Ok(())
    }

    #[tokio::test]
    async fn test_binary_events() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let mut events = record(&client, &["file"]);

        peer.send_message(r#"51-["file",{"_placeholder":true,"num":0}]"#);
        peer.send_packet(EnginePacket::new(
            EnginePacketId::MessageBinary,
            Bytes::from_static(b"\x01\x02"),
        ));
        assert_eq!(
            events.recv().await,
            Some((
                "file".to_owned(),
                vec![Value::Binary(Bytes::from_static(b"\x01\x02"))]
            ))
        );

        client.emit("upload", vec![Value::from(vec![1u8, 2, 3])])?;
        assert_eq!(
            next_message(&peer).await,
            r#"51-["upload",{"_placeholder":true,"num":0}]"#
        );
        let frame = peer.recv().await.expect("transport closed");
        assert!(frame.is_binary);
        assert_eq!(frame.data, Bytes::from_static(&[1, 2, 3]));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_packet_keeps_the_session() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let mut events = record(&client, &["error", "news"]);

        peer.send_message(r#"2"not an array""#);
        peer.send_message("2[1]");
        peer.send_message(r#"2["news"]"#);
        assert_eq!(next_name(&mut events).await.as_deref(), Some("error"));
        assert_eq!(next_name(&mut events).await.as_deref(), Some("error"));
        assert_eq!(next_name(&mut events).await.as_deref(), Some("news"));
        assert_eq!(client.state(), ConnectionState::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_loss_without_reconnection() -> Result<()> {
        let connector = MockConnector::new();
        let config = Config {
            reconnects: false,
            ..config(&connector)
        };
        let (client, peer) = connected(&connector, config).await?;
        let mut events = record(&client, &["disconnect"]);

        peer.disconnect();
        wait_for(&client, ConnectionState::Disconnected).await;
        assert_eq!(next_name(&mut events).await.as_deref(), Some("disconnect"));

        sleep(Duration::from_millis(300)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_transport_loss() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;
        let mut events = record(&client, &["connect", "disconnect", "reconnect"]);
        let (result, peer) = tokio::join!(client.connect(), accept(&connector));
        result?;

        peer.disconnect();
        wait_for(&client, ConnectionState::Reconnecting).await;
        client.emit("queued", vec![])?;

        let peer = accept(&connector).await;
        assert_eq!(next_message(&peer).await, r#"2["queued"]"#);
        wait_for(&client, ConnectionState::Connected).await;

        let mut names = Vec::new();
        for _ in 0..4 {
            names.push(next_name(&mut events).await.unwrap_or_default());
        }
        assert_eq!(names, ["connect", "disconnect", "connect", "reconnect"]);
        assert_eq!(connector.attempts(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_gives_up_after_max_attempts() -> Result<()> {
        let connector = MockConnector::new();
        let config = Config {
            reconnect_attempts: Some(2),
            ..config(&connector)
        };
        let (client, peer) = connected(&connector, config).await?;
        let mut events = record(&client, &["reconnect_attempt", "reconnect_failed"]);

        connector.refuse(usize::MAX);
        peer.disconnect();
        wait_for(&client, ConnectionState::Disconnected).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(
            events.recv().await,
            Some(("reconnect_attempt".to_owned(), vec![Value::from(1u32)]))
        );
        assert_eq!(
            events.recv().await,
            Some(("reconnect_attempt".to_owned(), vec![Value::from(2u32)]))
        );
        assert_eq!(
            events.recv().await,
            Some(("reconnect_failed".to_owned(), vec![]))
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_reconnection() -> Result<()> {
        let connector = MockConnector::new();
        let config = Config {
            reconnect_wait: Duration::from_secs(5),
            reconnect_wait_max: Duration::from_secs(5),
            ..config(&connector)
        };
        let (client, peer) = connected(&connector, config).await?;

        peer.disconnect();
        wait_for(&client, ConnectionState::Reconnecting).await;
        client.disconnect().await?;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_drops_pending_acks() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let mut events = record(&client, &["disconnect"]);

        let (tx, mut results) = unbounded_channel::<Result<Vec<Value>>>();
        client.emit_with_ack("ping", vec![], Duration::from_secs(1), move |result, _| {
            async move {
                let _ = tx.send(result);
            }
        })?;
        assert_eq!(next_message(&peer).await, r#"20["ping"]"#);

        client.disconnect().await?;
        assert_eq!(next_message(&peer).await, "1");
        assert!(peer.is_closed());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.disconnect().await?;

        sleep(Duration::from_secs(5)).await;
        // the callback was dropped without being invoked
        assert!(results.recv().await.is_none());
        assert_eq!(
            events.recv().await,
            Some((
                "disconnect".to_owned(),
                vec![Value::from("io client disconnect")]
            ))
        );
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_disconnect_is_final() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        let mut events = record(&client, &["disconnect"]);

        peer.send_message("1");
        wait_for(&client, ConnectionState::Disconnected).await;
        assert_eq!(
            events.recv().await,
            Some((
                "disconnect".to_owned(),
                vec![Value::from("io server disconnect")]
            ))
        );

        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_error_reaches_the_caller() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;
        let mut events = record(&client, &["connect_error"]);

        let server = async {
            let peer = connector.accept().await;
            peer.open("abc", &[], 25000, 20000);
            assert_eq!(next_message(&peer).await, "0");
            peer.send_message(r#"4{"message":"Not authorized"}"#);
            peer
        };
        let (result, peer) = tokio::join!(client.connect(), server);
        let err = result.expect_err("server refused the connection");
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert!(err.to_string().contains("Not authorized"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(peer.is_closed());
        assert_eq!(next_name(&mut events).await.as_deref(), Some("connect_error"));
        assert_eq!(connector.attempts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_refused_connection() -> Result<()> {
        let connector = MockConnector::new();
        let client = Client::new(URL, config(&connector))?;
        connector.refuse(1);

        let err = client.connect().await.expect_err("connection was refused");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (result, _peer) = tokio::join!(client.connect(), accept(&connector));
        result?;
        assert_eq!(connector.attempts(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() -> Result<()> {
        let connector = MockConnector::new();
        let config = Config {
            connect_timeout: Some(Duration::from_secs(1)),
            ..config(&connector)
        };
        let client = Client::new(URL, config)?;

        let server = async {
            let peer = connector.accept().await;
            peer.open("abc", &[], 25000, 20000);
            assert_eq!(next_message(&peer).await, "0");
            peer
        };
        let (result, peer) = tokio::join!(client.connect(), server);
        assert!(matches!(result, Err(Error::IncompleteHandshake(1000))));
        assert!(peer.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_path_and_query() -> Result<()> {
        let connector = MockConnector::new();
        let client = ClientBuilder::new(URL)
            .transport_type(TransportMode::Websocket)
            .connector(Arc::new(connector.clone()))
            .path("/chat/")
            .query("token", "abc")
            .auth(json!({"user": "ada"}))
            .build()?;

        let server = async {
            let peer = connector.accept().await;
            let query: Vec<(String, String)> = peer.url().query_pairs().into_owned().collect();
            assert_eq!(peer.url().path(), "/chat/");
            assert!(query.contains(&("token".to_owned(), "abc".to_owned())));
            assert!(query.contains(&("EIO".to_owned(), "4".to_owned())));
            peer.open("abc", &[], 25000, 20000);
            assert_eq!(next_message(&peer).await, r#"0{"user":"ada"}"#);
            peer.send_message(r#"0{"sid":"xyz"}"#);
            peer
        };
        let (result, _peer) = tokio::join!(client.connect(), server);
        result?;
        assert_eq!(client.state(), ConnectionState::Connected);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_client_closes_the_transport() -> Result<()> {
        let connector = MockConnector::new();
        let (client, peer) = connected(&connector, config(&connector)).await?;
        drop(client);
        while !peer.is_closed() {
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    #[test]
    fn test_new_requires_a_runtime() {
        let result = Client::new(URL, Config::default());
        assert!(matches!(result, Err(Error::MissingRuntime())));
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let result = Client::new("ftp://localhost", Config::default());
        assert!(matches!(result, Err(Error::InvalidUrlScheme(_))));

        let config = Config {
            randomization_factor: 2.0,
            ..Default::default()
        };
        let result = Client::new(URL, config);
        assert_eq!(
            result.map(|_| ()).map_err(|err| err.kind()),
            Err(ErrorKind::Configuration)
        );
    }
}
