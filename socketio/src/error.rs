use serde_json::Error as JsonError;
use std::io::Error as IoError;
use std::num::ParseIntError;
use std::str::Utf8Error;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// Enumeration of all possible errors in the `socket.io` context.
#[derive(Error, Debug)]
#[non_exhaustive]
#[cfg_attr(tarpaulin, ignore)]
pub enum Error {
    // Conform to https://rust-lang.github.io/api-guidelines/naming.html#names-use-a-consistent-word-order-c-word-order
    // Negative verb-object
    #[error("Invalid packet id: {0}")]
    InvalidPacketId(char),
    #[error("Error while parsing an incomplete packet")]
    IncompletePacket(),
    #[error("Got an invalid packet which did not follow the protocol format")]
    InvalidPacket(),
    #[error("An error occurred while decoding the utf-8 text: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("Invalid Url during parsing")]
    InvalidUrl(#[from] UrlParseError),
    #[error("Invalid Url Scheme: {0}")]
    InvalidUrlScheme(String),
    #[error("Got illegal handshake response: {0}")]
    InvalidHandshake(String),
    #[error("Server did not confirm the connection within {0} ms")]
    IncompleteHandshake(u64),
    #[error("Called an action before the connection was established")]
    IllegalActionBeforeOpen(),
    #[error("string is not json serializable: {0}")]
    InvalidJson(#[from] JsonError),
    #[error("Got an IO-Error: {0}")]
    IncompleteIo(#[from] IoError),
    #[error("Error while parsing an integer")]
    InvalidInteger(#[from] ParseIntError),
    #[error("EngineIO Error: {0}")]
    IncompleteResponseFromEngineIo(#[from] unisock_engineio::Error),
    #[error("Expected {expected} binary attachments, got {received}")]
    InvalidAttachmentCount { expected: usize, received: usize },
    #[error("Got a binary attachment without a packet announcing it")]
    InvalidAttachment(),
    #[error("Binary placeholder {0} has no matching attachment")]
    InvalidPlaceholder(u64),
    #[error("Event name is missing or not a string")]
    InvalidEventName(),
    #[error("No acknowledgement within {0} ms")]
    AckTimeout(u64),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid header name")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("Invalid header value")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("A client needs to be created inside a tokio runtime")]
    MissingRuntime(),
    #[error("Underlying Engine.IO connection has closed")]
    StoppedEngineIoSocket,
    #[error("The client was disconnected")]
    StoppedClient(),
}

/// Coarse classification of [`Error`] values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The network or a transport failed.
    Transport,
    /// The server refused or never confirmed the session.
    Handshake,
    /// The peer sent something that does not follow the protocol.
    MalformedPacket,
    /// An acknowledgement did not arrive in time.
    AckTimeout,
    /// The client was configured with invalid values.
    Configuration,
    /// The client or session is closed.
    Closed,
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use unisock_engineio::Error as EngineError;

        match self {
            Error::InvalidPacketId(_)
            | Error::IncompletePacket()
            | Error::InvalidPacket()
            | Error::InvalidUtf8(_)
            | Error::InvalidJson(_)
            | Error::InvalidInteger(_)
            | Error::InvalidAttachmentCount { .. }
            | Error::InvalidAttachment()
            | Error::InvalidPlaceholder(_)
            | Error::InvalidEventName() => ErrorKind::MalformedPacket,
            Error::InvalidUrl(_)
            | Error::InvalidUrlScheme(_)
            | Error::InvalidConfiguration(_)
            | Error::InvalidHeaderName(_)
            | Error::InvalidHeaderValue(_)
            | Error::MissingRuntime() => ErrorKind::Configuration,
            Error::InvalidHandshake(_) | Error::IncompleteHandshake(_) => ErrorKind::Handshake,
            Error::AckTimeout(_) => ErrorKind::AckTimeout,
            Error::IllegalActionBeforeOpen() | Error::StoppedClient() => ErrorKind::Closed,
            Error::IncompleteIo(_) | Error::StoppedEngineIoSocket => ErrorKind::Transport,
            Error::IncompleteResponseFromEngineIo(err) => match err {
                EngineError::InvalidHandshake(_) => ErrorKind::Handshake,
                EngineError::InvalidUrl(_)
                | EngineError::InvalidUrlScheme(_)
                | EngineError::InvalidHttpConfiguration(_)
                | EngineError::InvalidHeaderNameFromReqwest(_)
                | EngineError::InvalidHeaderValueFromReqwest(_) => ErrorKind::Configuration,
                EngineError::IllegalActionBeforeOpen() => ErrorKind::Closed,
                err if err.is_transport() => ErrorKind::Transport,
                _ => ErrorKind::MalformedPacket,
            },
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, err)
    }
}
