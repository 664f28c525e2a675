//! The relay channel between processes.
//!
//! Each process publishes on `prefix#uid` and pattern-subscribes to
//! `prefix#*`, so it hears every process including itself. Telling its own
//! echoes apart is left to the adaptor, which compares [`origin_uid`] against
//! its uid.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::transport::{Publisher, RelayError, RelayEvent, Subscriber};

pub const SEPARATOR: char = '#';

/// Publications waiting on a slow or hung server beyond this are dropped.
pub const PUBLISH_QUEUE_CAPACITY: usize = 1024;

/// The publishing half. Cheap to clone; all clones feed one publisher task.
#[derive(Clone)]
pub struct RelayChannel {
    channel: String,
    pattern: String,
    outbound: mpsc::Sender<Vec<u8>>,
}

/// One message read off the subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub pattern: String,
    pub channel: String,
    pub payload: Vec<u8>,
}

pub fn publish_channel(prefix: &str, uid: &str) -> String {
    format!("{prefix}{SEPARATOR}{uid}")
}

pub fn subscribe_pattern(prefix: &str) -> String {
    format!("{prefix}{SEPARATOR}*")
}

/// The uid a relay channel name was published under: its segment after the
/// last separator. Prefixes may contain the separator; uids never do.
pub fn origin_uid(channel: &str) -> Option<&str> {
    channel.rsplit_once(SEPARATOR).map(|(_, uid)| uid)
}

impl RelayChannel {
    /// Subscribes `subscriber` to every process under `prefix` and starts the
    /// task that owns `publisher`.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn open<P, S>(
        prefix: &str,
        uid: &str,
        publisher: P,
        subscriber: S,
    ) -> Result<(Self, Inbound<S>), RelayError>
    where
        P: Publisher,
        S: Subscriber,
    {
        Self::open_with_capacity(prefix, uid, publisher, subscriber, PUBLISH_QUEUE_CAPACITY).await
    }

    /// Like [`open`](Self::open) with at most `capacity` publications queued.
    pub async fn open_with_capacity<P, S>(
        prefix: &str,
        uid: &str,
        publisher: P,
        mut subscriber: S,
        capacity: usize,
    ) -> Result<(Self, Inbound<S>), RelayError>
    where
        P: Publisher,
        S: Subscriber,
    {
        let channel = publish_channel(prefix, uid);
        let pattern = subscribe_pattern(prefix);
        subscriber.psubscribe(&pattern).await?;

        let (outbound, queue) = mpsc::channel(capacity.max(1));
        spawn_publisher(publisher, channel.clone(), queue);

        let relay = Self {
            channel,
            pattern,
            outbound,
        };
        let inbound = Inbound {
            subscriber,
            finished: false,
        };
        Ok((relay, inbound))
    }

    /// Channel this process publishes on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Pattern this process is subscribed to.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Queues `payload` for publication and returns immediately. Returns
    /// false if it was dropped because the queue is full or the publisher
    /// task has stopped.
    ///
    /// There is no acknowledgment or retry; a failed publish is only logged.
    pub fn publish(&self, payload: Vec<u8>) -> bool {
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(channel = %self.channel, "relay publish queue is full; message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(channel = %self.channel, "relay publisher has stopped; message not published");
                false
            }
        }
    }
}

fn spawn_publisher<P: Publisher>(
    mut publisher: P,
    channel: String,
    mut queue: mpsc::Receiver<Vec<u8>>,
) {
    tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            if let Err(error) = publisher.publish(&channel, &payload).await {
                warn!(%channel, %error, "failed to publish to relay");
            }
        }
        debug!(%channel, "relay publisher stopped");
    });
}

/// The subscription as a sequence of messages.
///
/// The sequence ends for good when the subscription count drops to zero or
/// the transport fails. It is never restarted: after that the process only
/// serves its own connections.
pub struct Inbound<S> {
    subscriber: S,
    finished: bool,
}

impl<S: Subscriber> Inbound<S> {
    pub async fn next(&mut self) -> Option<InboundMessage> {
        while !self.finished {
            match self.subscriber.receive().await {
                RelayEvent::Message {
                    pattern,
                    channel,
                    payload,
                } => {
                    return Some(InboundMessage {
                        pattern,
                        channel,
                        payload,
                    });
                }
                RelayEvent::Subscription {
                    kind,
                    channel,
                    count,
                } => {
                    debug!(%kind, %channel, count, "relay subscription changed");
                    if count == 0 {
                        info!("relay subscription count reached zero");
                        self.finished = true;
                    }
                }
                RelayEvent::Error(error) => {
                    warn!(%error, "relay subscription failed");
                    self.finished = true;
                }
            }
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
