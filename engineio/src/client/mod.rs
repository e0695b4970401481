mod builder;
#[allow(clippy::module_inception)]
mod client;

pub use builder::ClientBuilder;
pub use client::Client;
