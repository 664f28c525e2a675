//! The connection capability set the relay delivers to.
//!
//! The registry and adaptor only ever see `dyn Connection`, so the host can
//! plug in whatever socket type it owns. [`ChannelConnection`] is the
//! implementation used by the node front-end and by tests: every emit is
//! pushed onto an unbounded Tokio channel that a writer task drains.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use serde_json::Value;
use tokio::sync::mpsc;

pub type ConnectionId = String;

/// A locally connected client that can receive room broadcasts.
pub trait Connection: Send + Sync {
    /// Stable identifier, unique for the connection's lifetime.
    fn id(&self) -> &str;

    /// Delivers one event. Must not block; failures are logged by the caller.
    fn emit(&self, event: &str, args: &[Value]) -> Result<()>;

    /// Rooms this connection believes it has joined.
    fn rooms(&self) -> Vec<String>;
}

/// One event handed to a [`ChannelConnection`].
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub event: String,
    pub args: Vec<Value>,
}

pub struct ChannelConnection {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Emitted>,
    rooms: Mutex<BTreeSet<String>>,
}

impl ChannelConnection {
    pub fn new(id: impl Into<ConnectionId>, outbox: mpsc::UnboundedSender<Emitted>) -> Self {
        Self {
            id: id.into(),
            outbox,
            rooms: Mutex::new(BTreeSet::new()),
        }
    }

    /// Builds a connection together with the receiving end of its outbox.
    pub fn pair(id: impl Into<ConnectionId>) -> (Arc<Self>, mpsc::UnboundedReceiver<Emitted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(id, tx)), rx)
    }

    /// Records that the connection joined `room`. Returns false if it already had.
    pub fn mark_joined(&self, room: &str) -> bool {
        self.lock_rooms().insert(room.to_string())
    }

    /// Records that the connection left `room`. Returns false if it was not a member.
    pub fn mark_left(&self, room: &str) -> bool {
        self.lock_rooms().remove(room)
    }

    /// Forgets every room and returns what was joined.
    pub fn take_rooms(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock_rooms()).into_iter().collect()
    }

    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        // A poisoned set is still a valid set of names.
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, args: &[Value]) -> Result<()> {
        self.outbox
            .send(Emitted {
                event: event.to_string(),
                args: args.to_vec(),
            })
            .map_err(|_| anyhow!("connection {} is closed", self.id))
    }

    fn rooms(&self) -> Vec<String> {
        self.lock_rooms().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_forwards_to_outbox() {
        let (connection, mut rx) = ChannelConnection::pair("a");
        connection
            .emit("chat", &[json!("hi"), json!(1)])
            .expect("open outbox");

        let emitted = rx.try_recv().expect("one event queued");
        assert_eq!(emitted.event, "chat");
        assert_eq!(emitted.args, vec![json!("hi"), json!(1)]);
    }

    #[test]
    fn emit_fails_once_receiver_is_gone() {
        let (connection, rx) = ChannelConnection::pair("a");
        drop(rx);
        assert!(connection.emit("chat", &[]).is_err());
    }

    #[test]
    fn room_bookkeeping_is_a_set() {
        let (connection, _rx) = ChannelConnection::pair("a");
        assert!(connection.mark_joined("lobby"));
        assert!(!connection.mark_joined("lobby"));
        assert!(connection.mark_joined("games"));
        assert_eq!(connection.rooms(), vec!["games", "lobby"]);

        assert!(connection.mark_left("games"));
        assert!(!connection.mark_left("games"));
        assert_eq!(connection.take_rooms(), vec!["lobby"]);
        assert!(connection.rooms().is_empty());
    }
}
