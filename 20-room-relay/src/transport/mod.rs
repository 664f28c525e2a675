//! Publish/subscribe transports the relay runs over.
//!
//! A transport is split into two halves, mirroring the two connections the
//! relay holds open: a [`Publisher`] that only issues `PUBLISH`, and a
//! [`Subscriber`] that only receives. Two implementations ship:
//!
//! - [`redis`]: one Redis connection per half.
//! - [`memory`]: an in-process bus over a Tokio `broadcast` channel, used by
//!   tests and standalone nodes.

use std::future::Future;

use thiserror::Error;

pub mod memory;
pub mod redis;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("subscription stream closed")]
    Closed,
}

/// One notification read from a subscriber connection.
#[derive(Debug)]
pub enum RelayEvent {
    /// A message published on a channel matching a subscribed pattern.
    Message {
        pattern: String,
        channel: String,
        payload: Vec<u8>,
    },
    /// A (p)subscribe or (p)unsubscribe confirmation with the number of
    /// subscriptions still active on the connection.
    Subscription {
        kind: String,
        channel: String,
        count: usize,
    },
    /// The connection failed; nothing more will arrive.
    Error(RelayError),
}

pub trait Publisher: Send + 'static {
    fn publish(
        &mut self,
        channel: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

pub trait Subscriber: Send + 'static {
    fn psubscribe(&mut self, pattern: &str) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Waits for the next notification. Called in a loop by the relay listener.
    fn receive(&mut self) -> impl Future<Output = RelayEvent> + Send;
}
