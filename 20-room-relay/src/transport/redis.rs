//! Redis transport: one multiplexed connection for `PUBLISH`, one pub/sub
//! connection for `PSUBSCRIBE`.

use std::{collections::VecDeque, pin::Pin};

use futures_util::{Stream, StreamExt};
use ::redis::{
    AsyncCommands, Client, IntoConnectionInfo, Msg,
    aio::{MultiplexedConnection, PubSub},
};
use tracing::debug;

use super::{Publisher, RelayError, RelayEvent, Subscriber};
use crate::config::RelayOptions;

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Dials both connections described by `options`.
pub async fn connect(
    options: &RelayOptions,
) -> Result<(RedisPublisher, RedisSubscriber), RelayError> {
    let client = client(options)?;
    let publisher = RedisPublisher {
        connection: client.get_multiplexed_async_connection().await?,
    };
    let subscriber = RedisSubscriber {
        state: SubscriberState::Idle(client.get_async_pubsub().await?),
        patterns: 0,
        pending: VecDeque::new(),
    };
    debug!(
        host = %options.host,
        port = options.port,
        "dialed redis publish and subscribe connections"
    );
    Ok((publisher, subscriber))
}

fn client(options: &RelayOptions) -> Result<Client, RelayError> {
    let mut info = (options.host.as_str(), options.port).into_connection_info()?;
    info.redis.password = options.password.clone();
    Ok(Client::open(info)?)
}

pub struct RedisPublisher {
    connection: MultiplexedConnection,
}

impl Publisher for RedisPublisher {
    async fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<(), RelayError> {
        let _receivers: i64 = self.connection.publish(channel, payload).await?;
        Ok(())
    }
}

enum SubscriberState {
    /// Still accepting subscriptions.
    Idle(PubSub),
    /// Converted into a message stream by the first receive.
    Streaming(MessageStream),
    Closed,
}

pub struct RedisSubscriber {
    state: SubscriberState,
    patterns: usize,
    pending: VecDeque<RelayEvent>,
}

impl Subscriber for RedisSubscriber {
    async fn psubscribe(&mut self, pattern: &str) -> Result<(), RelayError> {
        let SubscriberState::Idle(pubsub) = &mut self.state else {
            return Err(RelayError::Closed);
        };
        pubsub.psubscribe(pattern).await?;
        self.patterns += 1;
        // The async client swallows the server's confirmation; surface one so
        // the listener logs subscriptions the same way for every transport.
        self.pending.push_back(RelayEvent::Subscription {
            kind: "psubscribe".to_string(),
            channel: pattern.to_string(),
            count: self.patterns,
        });
        Ok(())
    }

    async fn receive(&mut self) -> RelayEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }

        self.state = match std::mem::replace(&mut self.state, SubscriberState::Closed) {
            SubscriberState::Idle(pubsub) => {
                SubscriberState::Streaming(Box::pin(pubsub.into_on_message()))
            }
            other => other,
        };

        let SubscriberState::Streaming(messages) = &mut self.state else {
            return RelayEvent::Error(RelayError::Closed);
        };

        match messages.next().await {
            Some(message) => RelayEvent::Message {
                pattern: message.get_pattern::<String>().unwrap_or_default(),
                channel: message.get_channel_name().to_string(),
                payload: message.get_payload_bytes().to_vec(),
            },
            None => {
                self.state = SubscriberState::Closed;
                RelayEvent::Error(RelayError::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_carries_password() {
        let options = RelayOptions {
            password: Some("hunter2".to_string()),
            ..RelayOptions::default()
        };
        assert!(client(&options).is_ok());
    }
}
