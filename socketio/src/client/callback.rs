use futures_util::{future::BoxFuture, FutureExt};
use log::warn;
use std::fmt::Debug;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::ack::AckSender;
use super::client::Client;
use crate::error::Result;
use crate::Value;

/// Internal type, provides a way to store futures and return them in a boxed manner.
pub(crate) type DynCallback = Box<
    dyn FnMut(Vec<Value>, Client, Option<AckSender>) -> BoxFuture<'static, ()>
        + 'static
        + Send
        + Sync,
>;

pub(crate) type DynAckCallback = Box<
    dyn FnOnce(Result<Vec<Value>>, Client) -> BoxFuture<'static, ()> + 'static + Send + Sync,
>;

pub(crate) struct Callback<T> {
    inner: T,
}

impl<T> Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

impl Callback<DynCallback> {
    pub(crate) fn new<T, Fut>(mut callback: T) -> Self
    where
        T: FnMut(Vec<Value>, Client) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        Callback {
            inner: Box::new(move |args, client, _ack| callback(args, client).boxed()),
        }
    }

    /// A listener that answers the server. It only runs for events the server
    /// asked an acknowledgement for.
    pub(crate) fn new_with_ack<T, Fut>(mut callback: T) -> Self
    where
        T: FnMut(Vec<Value>, Client, AckSender) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        Callback {
            inner: Box::new(move |args, client, ack| match ack {
                Some(ack) => callback(args, client, ack).boxed(),
                None => std::future::ready(()).boxed(),
            }),
        }
    }

    /// Starts the listener. A listener that panics while creating its future
    /// yields `None`.
    pub(crate) fn start(
        &mut self,
        args: Vec<Value>,
        client: Client,
        ack: Option<AckSender>,
    ) -> Option<BoxFuture<'static, ()>> {
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner(args, client, ack))) {
            Ok(future) => Some(future),
            Err(_) => {
                warn!("listener panicked");
                None
            }
        }
    }
}

impl Callback<DynAckCallback> {
    pub(crate) fn new<T, Fut>(callback: T) -> Self
    where
        T: FnOnce(Result<Vec<Value>>, Client) -> Fut + Sync + Send + 'static,
        Fut: Future<Output = ()> + 'static + Send,
    {
        Callback {
            inner: Box::new(move |result, client| callback(result, client).boxed()),
        }
    }

    pub(crate) async fn call(self, result: Result<Vec<Value>>, client: Client) {
        let inner = self.inner;
        match catch_unwind(AssertUnwindSafe(move || inner(result, client))) {
            Ok(future) => run_isolated(future).await,
            Err(_) => warn!("acknowledgement callback panicked"),
        }
    }
}

/// Awaits a callback future, a panic inside it only ends that future.
pub(crate) async fn run_isolated(future: BoxFuture<'static, ()>) {
    if AssertUnwindSafe(future).catch_unwind().await.is_err() {
        warn!("callback panicked");
    }
}
