use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::callback::{Callback, DynAckCallback};
use super::client::Client;
use crate::error::Result;
use crate::Value;

/// Where the outcome of an acknowledgement goes.
#[derive(Debug)]
pub(crate) enum AckHandler {
    /// Runs on the listener task, after the listeners dispatched before it.
    Callback(Callback<DynAckCallback>),
    /// Completes a [`Client::call`] straight from the driver.
    Reply(oneshot::Sender<Result<Vec<Value>>>),
}

/// An acknowledgement the client is waiting for.
#[derive(Debug)]
pub(crate) struct PendingAck {
    pub timeout: Duration,
    pub deadline: Instant,
    pub handler: AckHandler,
}

/// Answers an event the server sent with an acknowledgement id.
#[derive(Clone, Debug)]
pub struct AckSender {
    client: Client,
    id: i32,
}

impl AckSender {
    pub(crate) fn new(client: Client, id: i32) -> Self {
        AckSender { client, id }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Sends the acknowledgement. Like [`Client::emit`] it is queued while
    /// the client is not connected.
    pub fn send(&self, args: Vec<Value>) -> Result<()> {
        self.client.ack(self.id, args)
    }
}
