use std::fmt::{Display, Formatter, Result as FmtResult};

/// An `Event` in `socket.io` is either one of the reserved lifecycle events
/// raised by the client itself or a custom event sent by the server.
#[derive(Debug, PartialEq, PartialOrd, Clone, Eq, Hash)]
pub enum Event {
    Connect,
    Disconnect,
    Error,
    ConnectError,
    Reconnect,
    ReconnectAttempt,
    ReconnectFailed,
    Custom(String),
}

impl Event {
    pub fn as_str(&self) -> &str {
        match self {
            Event::Connect => "connect",
            Event::Disconnect => "disconnect",
            Event::Error => "error",
            Event::ConnectError => "connect_error",
            Event::Reconnect => "reconnect",
            Event::ReconnectAttempt => "reconnect_attempt",
            Event::ReconnectFailed => "reconnect_failed",
            Event::Custom(name) => name,
        }
    }
}

impl From<String> for Event {
    fn from(string: String) -> Self {
        match &string[..] {
            "connect" => Event::Connect,
            "disconnect" => Event::Disconnect,
            "error" => Event::Error,
            "connect_error" => Event::ConnectError,
            "reconnect" => Event::Reconnect,
            "reconnect_attempt" => Event::ReconnectAttempt,
            "reconnect_failed" => Event::ReconnectFailed,
            _ => Event::Custom(string),
        }
    }
}

impl From<&str> for Event {
    fn from(string: &str) -> Self {
        Event::from(String::from(string))
    }
}

impl From<Event> for String {
    fn from(event: Event) -> Self {
        match event {
            Event::Custom(string) => string,
            other => other.as_str().to_owned(),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
