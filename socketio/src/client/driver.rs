//! The task behind a [`Client`](super::Client). It owns the connection state,
//! the emit queue and the pending acknowledgements; handles, transport
//! readers and timers only ever talk to it through channels.

use futures_util::StreamExt;
use http::HeaderMap;
use log::{debug, trace, warn};
use native_tls::TlsConnector;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use unisock_engineio::{
    Client as EngineClient, ClientBuilder as EngineClientBuilder, Error as EngineError,
    Generator, Packet as EnginePacket,
};
use url::Url;

use super::ack::{AckHandler, PendingAck};
use super::callback::{Callback, DynAckCallback};
use super::client::{Command, ConnectionState};
use crate::codec::{encode, Decoder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{Packet, DEFAULT_NAMESPACE};
use crate::reconnect::ReconnectPolicy;
use crate::{Event, Value};

/// Work for the task running listeners.
pub(crate) enum Dispatch {
    Event {
        event: Event,
        args: Vec<Value>,
        ack: Option<i32>,
    },
    Ack {
        callback: Callback<DynAckCallback>,
        result: Result<Vec<Value>>,
    },
}

/// Reported by the tasks opening and reading an engine.io session.
enum SessionEvent {
    Opened(EngineClient),
    OpenFailed(Error),
    Packet(EnginePacket),
    Closed(Option<EngineError>),
}

struct Session {
    engine: EngineClient,
    reader: JoinHandle<()>,
    /// Bounds every write and the final close of the session.
    write_timeout: Duration,
}

enum Step {
    Command(Option<Command>),
    Session(Option<(u64, SessionEvent)>),
    Timer,
}

pub(crate) struct Driver {
    address: Url,
    config: Config,
    headers: HeaderMap,
    tls_config: Option<TlsConnector>,
    policy: ReconnectPolicy,

    commands: UnboundedReceiver<Command>,
    dispatch: UnboundedSender<Dispatch>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,

    /// Bumped whenever a session is given up, events of older sessions are
    /// ignored.
    generation: u64,
    events_tx: UnboundedSender<(u64, SessionEvent)>,
    events_rx: UnboundedReceiver<(u64, SessionEvent)>,
    opening: Option<JoinHandle<()>>,
    session: Option<Session>,
    decoder: Decoder,

    queue: VecDeque<Packet>,
    acks: HashMap<i32, PendingAck>,
    next_ack_id: i32,

    waiter: Option<tokio::sync::oneshot::Sender<Result<()>>>,
    /// Set while waiting for the server to accept the namespace.
    connect_deadline: Option<(Instant, Duration)>,
    reconnect_at: Option<Instant>,
    /// Failed attempts since the connection was lost.
    failures: u32,
}

impl Driver {
    pub(crate) fn new(
        address: Url,
        config: Config,
        headers: HeaderMap,
        tls_config: Option<TlsConnector>,
        commands: UnboundedReceiver<Command>,
        dispatch: UnboundedSender<Dispatch>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Driver {
            address,
            policy: config.reconnect_policy(),
            config,
            headers,
            tls_config,
            commands,
            dispatch,
            state_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            events_tx,
            events_rx,
            opening: None,
            session: None,
            decoder: Decoder::new(),
            queue: VecDeque::new(),
            acks: HashMap::new(),
            next_ack_id: 0,
            waiter: None,
            connect_deadline: None,
            reconnect_at: None,
            failures: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        if self.config.compress {
            debug!("compression is not supported, packets are sent uncompressed");
        }

        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = self.events_rx.recv() => Step::Session(event),
                _ = sleep_until_some(deadline) => Step::Timer,
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command).await,
                // every handle is gone
                Step::Command(None) => break,
                Step::Session(Some((generation, event))) => {
                    if generation == self.generation {
                        self.handle_session_event(event).await;
                    } else {
                        Self::discard(event);
                    }
                }
                Step::Session(None) => break,
                Step::Timer => self.handle_timer().await,
            }
        }

        self.teardown().await;
        self.acks.clear();
        self.queue.clear();
        self.set_state(ConnectionState::Disconnected);
        debug!("client dropped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                if self.state == ConnectionState::Disconnected {
                    self.waiter = Some(reply);
                    self.set_state(ConnectionState::Connecting);
                    self.open();
                } else {
                    trace!("connect ignored while {:?}", self.state);
                    let _ = reply.send(Ok(()));
                }
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Emit { event, args } => {
                self.enqueue(Packet::Event {
                    nsp: DEFAULT_NAMESPACE.to_owned(),
                    event,
                    args,
                    id: None,
                })
                .await
            }
            Command::EmitWithAck {
                event,
                args,
                timeout,
                handler,
            } => {
                let id = self.next_ack_id;
                self.next_ack_id = following_ack_id(id);
                self.acks.insert(
                    id,
                    PendingAck {
                        timeout,
                        deadline: Instant::now() + timeout,
                        handler,
                    },
                );
                self.enqueue(Packet::Event {
                    nsp: DEFAULT_NAMESPACE.to_owned(),
                    event,
                    args,
                    id: Some(id),
                })
                .await
            }
            Command::Ack { id, args } => {
                self.enqueue(Packet::Ack {
                    nsp: DEFAULT_NAMESPACE.to_owned(),
                    id,
                    args,
                })
                .await
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened(engine) => self.opened(engine).await,
            SessionEvent::OpenFailed(err) => {
                self.opening = None;
                self.attempt_failed(err).await;
            }
            SessionEvent::Packet(packet) => self.received(packet).await,
            SessionEvent::Closed(err) => self.session_lost(err).await,
        }
    }

    fn discard(event: SessionEvent) {
        if let SessionEvent::Opened(engine) = event {
            tokio::spawn(async move {
                let _ = engine.close().await;
            });
        }
    }

    async fn handle_timer(&mut self) {
        let now = Instant::now();

        if let Some((deadline, timeout)) = self.connect_deadline {
            if deadline <= now {
                self.attempt_failed(Error::IncompleteHandshake(timeout.as_millis() as u64))
                    .await;
            }
        }

        if self.reconnect_at.map_or(false, |at| at <= now) {
            self.reconnect_at = None;
            debug!("reconnection attempt {}", self.failures + 1);
            self.open();
        }

        let mut expired: Vec<i32> = self
            .acks
            .iter()
            .filter(|(_, ack)| ack.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for id in expired {
            if let Some(ack) = self.acks.remove(&id) {
                debug!("acknowledgement {} timed out", id);
                self.resolve(
                    ack.handler,
                    Err(Error::AckTimeout(ack.timeout.as_millis() as u64)),
                );
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.connect_deadline
            .map(|(deadline, _)| deadline)
            .into_iter()
            .chain(self.reconnect_at)
            .chain(self.acks.values().map(|ack| ack.deadline))
            .min()
    }

    fn engine_builder(&self) -> EngineClientBuilder {
        let mut builder = EngineClientBuilder::new(self.address.clone())
            .path(&self.config.path)
            .mode(self.config.transport)
            .headers(self.headers.clone());
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.handshake_timeout(connect_timeout);
        }
        for (key, value) in &self.config.connect_params {
            builder = builder.query(key, value);
        }
        if let Some(tls_config) = self.tls_config.clone() {
            builder = builder.tls_config(tls_config);
        }
        if let Some(connector) = self.config.connector.clone() {
            builder = builder.connector(connector);
        }
        builder
    }

    /// Starts opening an engine.io session in the background.
    fn open(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let builder = self.engine_builder();
        let events = self.events_tx.clone();
        self.opening = Some(tokio::spawn(async move {
            let event = match builder.build().await {
                Ok(engine) => SessionEvent::Opened(engine),
                Err(err) => SessionEvent::OpenFailed(err.into()),
            };
            let _ = events.send((generation, event));
        }));
    }

    /// The engine.io session is up, asks the server for the namespace.
    async fn opened(&mut self, engine: EngineClient) {
        self.opening = None;
        let stream = match engine.stream() {
            Ok(stream) => stream,
            Err(err) => {
                let _ = engine.close().await;
                return self.attempt_failed(err.into()).await;
            }
        };
        let transport = engine.transport().await;
        debug!(
            "engine.io session {} opened over {}",
            engine.handshake().sid,
            transport
        );

        let limit = self
            .config
            .connect_timeout
            .unwrap_or_else(|| Duration::from_millis(engine.handshake().ping_timeout));
        let reader = self.spawn_reader(stream);
        self.session = Some(Session {
            engine,
            reader,
            write_timeout: limit,
        });
        self.decoder.reset();
        self.connect_deadline = Some((Instant::now() + limit, limit));

        let connect = Packet::Connect {
            nsp: DEFAULT_NAMESPACE.to_owned(),
            data: self.config.auth.clone(),
        };
        if let Err(err) = self.send(connect).await {
            self.attempt_failed(err).await;
        }
    }

    fn spawn_reader(
        &self,
        mut stream: Generator<std::result::Result<EnginePacket, EngineError>>,
    ) -> JoinHandle<()> {
        let generation = self.generation;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(packet) => {
                        if events
                            .send((generation, SessionEvent::Packet(packet)))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = events.send((generation, SessionEvent::Closed(Some(err))));
                        return;
                    }
                }
            }
            let _ = events.send((generation, SessionEvent::Closed(None)));
        })
    }

    async fn received(&mut self, packet: EnginePacket) {
        if self.config.log {
            trace!("received {:?}", packet);
        }
        for decoded in self.decoder.decode(packet) {
            match decoded {
                Ok(packet) => self.handle_packet(packet).await,
                Err(err) => {
                    warn!("dropping malformed packet: {}", err);
                    self.emit_event(Event::Error, vec![Value::from(err.to_string())], None);
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        if packet.nsp() != DEFAULT_NAMESPACE {
            trace!("ignoring packet for namespace {}", packet.nsp());
            return;
        }
        let awaiting_connect = self.connect_deadline.is_some();

        match packet {
            Packet::Connect { .. } if awaiting_connect => self.connected().await,
            Packet::Connect { .. } => trace!("ignoring repeated connect"),
            Packet::ConnectError { error, .. } => {
                let message = error
                    .get("message")
                    .and_then(|message| message.as_str())
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| error.to_string());
                if awaiting_connect {
                    self.attempt_failed(Error::InvalidHandshake(message)).await;
                } else {
                    warn!("ignoring connect error while {:?}: {}", self.state, message);
                }
            }
            Packet::Disconnect { .. } if awaiting_connect => {
                self.attempt_failed(Error::InvalidHandshake(
                    "server closed the namespace".to_owned(),
                ))
                .await
            }
            Packet::Disconnect { .. } => {
                debug!("server closed the namespace");
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.emit_event(Event::Disconnect, vec![Value::from("io server disconnect")], None);
            }
            Packet::Event {
                event, args, id, ..
            } => self.emit_event(Event::from(event), args, id),
            Packet::Ack { id, args, .. } => match self.acks.remove(&id) {
                Some(ack) => self.resolve(ack.handler, Ok(args)),
                None => trace!("discarding acknowledgement {}", id),
            },
        }
    }

    async fn connected(&mut self) {
        self.connect_deadline = None;
        let reconnected = self.state == ConnectionState::Reconnecting;
        self.failures = 0;
        self.set_state(ConnectionState::Connected);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Ok(()));
        }

        self.emit_event(Event::Connect, Vec::new(), None);
        if reconnected {
            self.emit_event(Event::Reconnect, Vec::new(), None);
        }
        self.flush().await;
    }

    /// Opening a session or joining the namespace failed.
    async fn attempt_failed(&mut self, err: Error) {
        warn!("connection attempt failed: {}", err);
        self.teardown().await;

        if self.state == ConnectionState::Reconnecting {
            self.failures = self.failures.saturating_add(1);
            self.emit_event(Event::ReconnectAttempt, vec![Value::from(self.failures)], None);
            if self.policy.is_exhausted(self.failures) {
                self.reconnect_failed();
            } else {
                self.schedule_reconnect();
            }
        } else {
            self.set_state(ConnectionState::Disconnected);
            let message = err.to_string();
            if let Some(waiter) = self.waiter.take() {
                let _ = waiter.send(Err(err));
            }
            self.emit_event(Event::ConnectError, vec![Value::from(message)], None);
        }
    }

    /// The transport of the current session ended.
    async fn session_lost(&mut self, err: Option<EngineError>) {
        if self.state != ConnectionState::Connected {
            let err = err.map_or(Error::StoppedEngineIoSocket, Error::from);
            return self.attempt_failed(err).await;
        }

        let reason = match &err {
            Some(EngineError::PingTimeout()) => "ping timeout",
            Some(_) => "transport error",
            None => "transport close",
        };
        match err {
            Some(err) => warn!("connection lost: {}", err),
            None => debug!("connection closed by the transport"),
        }
        self.teardown().await;
        self.emit_event(Event::Disconnect, vec![Value::from(reason)], None);

        if !self.config.reconnects {
            self.set_state(ConnectionState::Disconnected);
        } else if self.policy.is_exhausted(0) {
            self.reconnect_failed();
        } else {
            self.set_state(ConnectionState::Reconnecting);
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.policy.next_delay(self.failures);
        debug!("reconnecting in {:?}", delay);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn reconnect_failed(&mut self) {
        warn!("giving up after {} reconnection attempts", self.failures);
        self.failures = 0;
        self.set_state(ConnectionState::Disconnected);
        self.emit_event(Event::ReconnectFailed, Vec::new(), None);
    }

    async fn disconnect(&mut self) {
        let previous = self.state;
        if previous == ConnectionState::Connected {
            let packet = Packet::Disconnect {
                nsp: DEFAULT_NAMESPACE.to_owned(),
            };
            if let Err(err) = self.send(packet).await {
                trace!("could not send disconnect: {}", err);
            }
        }

        self.teardown().await;
        self.reconnect_at = None;
        self.failures = 0;
        self.queue.clear();
        self.acks.clear();
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(Error::StoppedClient()));
        }
        self.set_state(ConnectionState::Disconnected);

        if previous == ConnectionState::Connected {
            self.emit_event(Event::Disconnect, vec![Value::from("io client disconnect")], None);
        }
    }

    /// Gives up the current session, if any.
    async fn teardown(&mut self) {
        self.generation += 1;
        self.connect_deadline = None;
        self.decoder.reset();
        if let Some(opening) = self.opening.take() {
            opening.abort();
        }
        if let Some(session) = self.session.take() {
            session.reader.abort();
            match timeout(session.write_timeout, session.engine.close()).await {
                Ok(Err(err)) => trace!("closing the engine.io session: {}", err),
                Err(_) => debug!("closing the engine.io session timed out"),
                Ok(Ok(())) => (),
            }
        }
    }

    async fn enqueue(&mut self, packet: Packet) {
        self.queue.push_back(packet);
        if self.state == ConnectionState::Connected {
            self.flush().await;
        }
    }

    /// Sends queued packets in order. A packet stays queued until it was
    /// written, a failed write gives up the session.
    async fn flush(&mut self) {
        while let Some(packet) = self.queue.pop_front() {
            if let Err(err) = self.send(packet.clone()).await {
                warn!("sending failed, {} packets stay queued: {}", self.queue.len() + 1, err);
                self.queue.push_front(packet);
                let err = match err {
                    Error::IncompleteResponseFromEngineIo(err) => err,
                    _ => EngineError::StoppedTransport(),
                };
                self.session_lost(Some(err)).await;
                break;
            }
        }
    }

    /// Writes a packet and its attachments, each bounded by the write
    /// timeout of the session.
    async fn send(&self, packet: Packet) -> Result<()> {
        let session = self.session.as_ref().ok_or(Error::IllegalActionBeforeOpen())?;
        if self.config.log {
            trace!("sending {:?}", packet);
        }
        let limit = session.write_timeout;
        for packet in encode(packet) {
            timeout(limit, session.engine.emit(packet))
                .await
                .map_err(|_| EngineError::TimedOut(limit.as_millis() as u64))??;
        }
        Ok(())
    }

    fn resolve(&self, handler: AckHandler, result: Result<Vec<Value>>) {
        match handler {
            AckHandler::Callback(callback) => {
                let _ = self.dispatch.send(Dispatch::Ack { callback, result });
            }
            AckHandler::Reply(reply) => {
                let _ = reply.send(result);
            }
        }
    }

    fn emit_event(&self, event: Event, args: Vec<Value>, ack: Option<i32>) {
        let _ = self.dispatch.send(Dispatch::Event { event, args, ack });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Ack ids stay non-negative, the wire format has no sign.
fn following_ack_id(id: i32) -> i32 {
    id.checked_add(1).unwrap_or(0)
}
