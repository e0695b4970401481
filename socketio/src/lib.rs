//! Unisock is a socket.io client written in the Rust Programming Language.
//! It speaks revision 5 of the socket.io protocol on top of revision 4 of
//! engine.io, over http long-polling and websockets.
//!
//! ## Example usage
//!
//! ``` rust,no_run
//! use std::time::Duration;
//! use unisock::{ClientBuilder, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), unisock::Error> {
//!     // get a client that is connected to the default namespace
//!     let client = ClientBuilder::new("http://localhost:4200/")
//!         .on("test", |args: Vec<Value>, _| async move {
//!             println!("Received: {:?}", args);
//!         })
//!         .on("error", |err, _| async move { eprintln!("Error: {:?}", err) })
//!         .connect()
//!         .await?;
//!
//!     // emit to the "foo" event
//!     client.emit("foo", vec![Value::from(serde_json::json!({"token": 123}))])?;
//!
//!     // emit with an ack
//!     let ack = client
//!         .call("test", vec!["ping".into()], Duration::from_secs(2))
//!         .await?;
//!     println!("Ack data: {:?}", ack);
//!
//!     client.disconnect().await
//! }
//! ```
//!
//! The main entry point for using this crate is the [`ClientBuilder`] which provides
//! a way to easily configure a client in the needed way. A [`Client`] may also
//! be created from a [`Config`] or a list of [`ClientOption`]s.
//!
//! ## Current features
//!
//! - connecting to the default namespace, optionally with an auth payload.
//! - registering several listeners per event, acknowledging server events.
//! - emitting events with and without acknowledgements, with binary data.
//! - queuing emits while the client is not connected.
//! - reconnecting with exponential backoff after the connection was lost.
//!
//! Lifecycle changes are reported as events: `connect`, `disconnect`,
//! `connect_error`, `error`, `reconnect`, `reconnect_attempt` and
//! `reconnect_failed`. [`Client::state`] tells the current
//! [`ConnectionState`].
#![allow(clippy::rc_buffer)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![warn(clippy::perf)]
#![warn(clippy::correctness)]

/// Defines client only structs
pub mod client;
pub mod codec;
pub mod config;
/// Defines the events that could be sent or received.
pub mod event;
pub mod packet;
pub mod reconnect;
pub mod value;

/// Contains the error type which will be returned with every result in this
/// crate.
pub mod error;

pub use client::{AckSender, Client, ClientBuilder, ConnectionState};
pub use config::{ClientOption, Config};
pub use error::{Error, ErrorKind};
pub use event::Event;
pub use reconnect::ReconnectPolicy;
pub use unisock_engineio::TransportMode;
pub use value::Value;
