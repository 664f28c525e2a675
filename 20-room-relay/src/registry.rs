//! Local room membership.
//!
//! Maps room name to the connections on this process that joined it. The map
//! is a `DashMap`, so joins and leaves from connection tasks never contend
//! with the relay listener unless they hit the same shard. Membership is never
//! shared between processes.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::connection::{Connection, ConnectionId};

type Members = BTreeMap<ConnectionId, Arc<dyn Connection>>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Members>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` to `room`, creating the room on first join.
    ///
    /// Joining twice replaces the stored handle; the member set never holds
    /// two entries for one id.
    pub fn join(&self, room: &str, connection: Arc<dyn Connection>) {
        let id = connection.id().to_string();
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, connection);
    }

    /// Removes a connection from `room` and drops the room once it is empty.
    ///
    /// Returns whether the connection was a member.
    pub fn leave(&self, room: &str, connection_id: &str) -> bool {
        match self.rooms.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(connection_id).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of the members of `room`, taken under the shard lock.
    ///
    /// Callers deliver from the snapshot, so joins or leaves racing with a
    /// broadcast never change who that broadcast reaches.
    pub fn members_of(&self, room: &str) -> Vec<Arc<dyn Connection>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(connection_id))
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Every non-empty room, sorted.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drops `room` and all of its members. Returns how many were removed.
    pub fn clear(&self, room: &str) -> usize {
        self.rooms
            .remove(room)
            .map_or(0, |(_, members)| members.len())
    }
}
