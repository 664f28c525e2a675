//! The adaptor contract as a socket.io-style host calls it.
//!
//! Hosts pass sockets rather than ids and pass an optional socket to skip on
//! broadcast. This trait maps those call shapes onto [`Adaptor`]; hosts hold
//! an `Arc<dyn BroadcastAdaptor>` so tests can swap the implementation.

use std::sync::Arc;

use serde_json::Value;

use crate::{adaptor::Adaptor, connection::Connection};

pub trait BroadcastAdaptor: Send + Sync {
    fn join(&self, room: &str, socket: Arc<dyn Connection>);

    fn leave(&self, room: &str, socket: &dyn Connection);

    /// Sends to `room` on every process, skipping `ignore` if given.
    fn broadcast(&self, ignore: Option<&dyn Connection>, room: &str, event: &str, args: Vec<Value>);

    /// Local members of `room`.
    fn member_count(&self, room: &str) -> usize;

    fn clear(&self, room: &str);

    /// All local rooms, or the rooms `socket` believes it joined.
    fn rooms(&self, socket: Option<&dyn Connection>) -> Vec<String>;
}

impl BroadcastAdaptor for Adaptor {
    fn join(&self, room: &str, socket: Arc<dyn Connection>) {
        Adaptor::join(self, room, socket);
    }

    fn leave(&self, room: &str, socket: &dyn Connection) {
        Adaptor::leave(self, room, socket);
    }

    fn broadcast(&self, ignore: Option<&dyn Connection>, room: &str, event: &str, args: Vec<Value>) {
        self.send_except(ignore.map(|socket| socket.id()), room, event, args);
    }

    fn member_count(&self, room: &str) -> usize {
        Adaptor::member_count(self, room)
    }

    fn clear(&self, room: &str) {
        Adaptor::clear(self, room);
    }

    fn rooms(&self, socket: Option<&dyn Connection>) -> Vec<String> {
        self.rooms_of(socket)
    }
}
