use std::pin::Pin;

use futures_util::Stream;

/// A generator is a [`Send`] [`futures_util::Stream`] that yields a certain
/// type `T` whenever it's polled. Transports and clients hand out their
/// inbound data as generators.
pub type Generator<T> = Pin<Box<dyn Stream<Item = T> + 'static + Send>>;
