//! The broadcast adaptor: local rooms plus cross-process fan-out.
//!
//! A send delivers to the local members of a room and then publishes the
//! envelope on the relay. Every other process's listener decodes it and
//! delivers to its own members without publishing again, so a message makes
//! exactly one hop. A process also hears its own publications through the
//! pattern subscription; those are recognised by the uid in the channel name
//! and dropped.
//!
//! Whether a dispatch came from the relay is passed down as an [`Origin`]
//! argument. Nothing about it is stored on the adaptor, so a caller sending
//! concurrently with the listener can never suppress or duplicate a publish.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    codec::Envelope,
    config::{self, RelayOptions},
    connection::Connection,
    registry::RoomRegistry,
    relay::{self, Inbound, RelayChannel},
    transport::{self, Publisher, Subscriber},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A caller on this process; the envelope is published after local delivery.
    Local,
    /// Another process, via the relay; delivery stays local.
    Remote,
}

struct Shared {
    uid: String,
    prefix: String,
    registry: RoomRegistry,
    relay: RelayChannel,
    /// Cleared once the listener stops; after that nothing is published.
    listening: AtomicBool,
}

pub struct Adaptor {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

/// A fresh random process identifier.
pub fn generate_uid() -> String {
    Uuid::new_v4().to_string()
}

impl Adaptor {
    /// Dials Redis twice (publish and subscribe), picks a uid and starts
    /// listening. Any dial failure aborts construction.
    pub async fn connect(options: RelayOptions) -> Result<Self> {
        options.validate()?;
        let (publisher, subscriber) = transport::redis::connect(&options)
            .await
            .with_context(|| {
                format!("failed to connect to redis at {}:{}", options.host, options.port)
            })?;
        Self::start(&options.prefix, generate_uid(), publisher, subscriber).await
    }

    /// Starts an adaptor over any transport under a given uid.
    ///
    /// Two adaptors only relay to each other when their uids differ.
    pub async fn start<P, S>(
        prefix: &str,
        uid: String,
        publisher: P,
        subscriber: S,
    ) -> Result<Self>
    where
        P: Publisher,
        S: Subscriber,
    {
        config::validate_prefix(prefix)?;
        let (relay, inbound) = RelayChannel::open(prefix, &uid, publisher, subscriber)
            .await
            .context("failed to subscribe to relay")?;

        info!(
            %uid,
            channel = relay.channel(),
            pattern = relay.pattern(),
            "relay adaptor started"
        );

        let shared = Arc::new(Shared {
            uid,
            prefix: prefix.to_string(),
            registry: RoomRegistry::new(),
            relay,
            listening: AtomicBool::new(true),
        });
        let listener = tokio::spawn(run_listener(Arc::clone(&shared), inbound));

        Ok(Self { shared, listener })
    }

    pub fn uid(&self) -> &str {
        &self.shared.uid
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    /// Adds a connection to a room on this process only.
    pub fn join(&self, room: &str, connection: Arc<dyn Connection>) {
        debug!(room, connection = connection.id(), "join");
        self.shared.registry.join(room, connection);
    }

    pub fn leave(&self, room: &str, connection: &dyn Connection) {
        debug!(room, connection = connection.id(), "leave");
        self.shared.registry.leave(room, connection.id());
    }

    /// Delivers `event` to every member of `room` on every process.
    pub fn send(&self, room: &str, event: &str, args: Vec<Value>) {
        self.send_except(None, room, event, args);
    }

    /// Like [`send`](Self::send), skipping the connection with id `except`
    /// wherever it is found.
    pub fn send_except(&self, except: Option<&str>, room: &str, event: &str, args: Vec<Value>) {
        let envelope = Envelope::new(room, event, args).except(except);
        self.shared.dispatch(&envelope, Origin::Local);
    }

    /// With no connection, every non-empty local room. With a connection,
    /// the rooms that connection itself tracks, which the registry does not
    /// double-check.
    pub fn rooms_of(&self, connection: Option<&dyn Connection>) -> Vec<String> {
        match connection {
            Some(connection) => connection.rooms(),
            None => self.shared.registry.room_names(),
        }
    }

    /// Members of `room` on this process; other processes are not counted.
    pub fn member_count(&self, room: &str) -> usize {
        self.shared.registry.member_count(room)
    }

    /// Removes every local member of `room` at once.
    pub fn clear(&self, room: &str) {
        let removed = self.shared.registry.clear(room);
        debug!(room, removed, "cleared room");
    }

    /// False once the relay listener has stopped. Sends still reach local
    /// members but no longer arrive from or leave for other processes.
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire) && !self.listener.is_finished()
    }

    /// Stops the relay listener. Local rooms keep working.
    pub fn shutdown(&self) {
        info!(uid = %self.shared.uid, "stopping relay listener");
        self.shared.stop_listening();
        self.listener.abort();
    }
}

impl Drop for Adaptor {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Shared {
    fn dispatch(&self, envelope: &Envelope, origin: Origin) {
        let members = self.registry.members_of(&envelope.room);
        let mut delivered = 0usize;
        for member in members {
            if envelope.except.as_deref() == Some(member.id()) {
                continue;
            }
            match member.emit(&envelope.event, &envelope.args) {
                Ok(()) => delivered += 1,
                Err(error) => warn!(
                    room = %envelope.room,
                    connection = member.id(),
                    error = %error,
                    "failed to deliver to connection"
                ),
            }
        }
        trace!(
            room = %envelope.room,
            event = %envelope.event,
            delivered,
            ?origin,
            "delivered locally"
        );

        if origin == Origin::Remote {
            return;
        }
        if self.listening.load(Ordering::Acquire) {
            self.relay.publish(envelope.encode());
        } else {
            trace!(room = %envelope.room, "relay stopped; not publishing");
        }
    }

    fn stop_listening(&self) {
        self.listening.store(false, Ordering::Release);
    }

    fn handle_inbound(&self, channel: &str, payload: &[u8]) {
        match relay::origin_uid(channel) {
            Some(uid) if uid == self.uid => {
                trace!(%channel, "ignoring own publication");
                return;
            }
            Some(_) => {}
            None => {
                warn!(%channel, "relay channel carries no uid; dropping message");
                return;
            }
        }

        match Envelope::decode(payload) {
            Ok(envelope) => self.dispatch(&envelope, Origin::Remote),
            Err(error) => warn!(%channel, %error, "dropping undecodable relay message"),
        }
    }
}

async fn run_listener<S: Subscriber>(shared: Arc<Shared>, mut inbound: Inbound<S>) {
    while let Some(message) = inbound.next().await {
        shared.handle_inbound(&message.channel, &message.payload);
    }
    shared.stop_listening();
    warn!(
        uid = %shared.uid,
        "relay listener stopped; broadcasts are now local to this process"
    );
}
