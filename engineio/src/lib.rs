//! # unisock-engineio
//!
//! An implementation of an engine.io client written in the rust programming
//! language. This implementation supports revision 4 of the engine.io
//! protocol.
//!
//! ## Example usage
//!
//! ``` rust,no_run
//! use unisock_engineio::{ClientBuilder, Packet, PacketId};
//! use futures_util::StreamExt;
//! use url::Url;
//!
//! # async fn run() -> Result<(), unisock_engineio::Error> {
//! let client = ClientBuilder::new(Url::parse("http://localhost:4201")?)
//!     .build()
//!     .await?;
//!
//! let mut stream = client.stream()?;
//! client.emit(Packet::new(PacketId::Message, "Hello World")).await?;
//!
//! while let Some(packet) = stream.next().await {
//!     println!("{:?}", packet?);
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The session starts with a polling handshake and upgrades to websocket
//! when the server offers it. [`TransportMode`] forces either transport.
//! Transports are opened through a [`Connector`]; the [`DefaultConnector`]
//! opens network connections with an optional `TlsConnector` and opening
//! headers.
#![allow(clippy::rc_buffer)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![warn(clippy::perf)]
#![warn(clippy::correctness)]

pub mod client;
mod generator;
pub mod packet;
mod socket;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;
pub mod transports;

pub const ENGINE_IO_VERSION: i32 = 4;

/// Contains the error type which will be returned with every result in this
/// crate. Handles all kinds of errors.
pub mod error;

pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use generator::Generator;
pub use packet::{HandshakePacket, Packet, PacketId};
pub use transport::{Connector, DefaultConnector, Transport, TransportKind, TransportMode};

// Re-export TLS configurations to make socketio integration easier
#[doc(hidden)]
pub use native_tls::TlsConnector as TlsConfig;
