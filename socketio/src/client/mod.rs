mod ack;
mod builder;
/// Internal callback type
mod callback;
#[allow(clippy::module_inception)]
mod client;
mod driver;

pub use ack::AckSender;
pub use builder::ClientBuilder;
pub use client::{Client, ConnectionState};
