//! Room membership index
//!
//! Maps room names to member connection ids. Owned exclusively by the
//! dispatcher; rooms are created on first join and dropped when empty.

use std::collections::{HashMap, HashSet};

use crate::types::{ConnectionId, RoomName};

/// A named set of connections sharing a broadcast target
#[derive(Debug)]
pub struct Room {
    /// Room name for identification
    pub name: RoomName,
    /// Current members
    pub members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            members: HashSet::new(),
        }
    }

    /// Add a member; returns false if it was already present
    pub fn add(&mut self, id: ConnectionId) -> bool {
        self.members.insert(id)
    }

    /// Remove a member; returns false if it was not present
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.members.remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Room name → room
#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<RoomName, Room>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `room`, creating the room if needed
    ///
    /// Idempotent: returns false when `id` was already a member.
    pub fn join(&mut self, room: &RoomName, id: &ConnectionId) -> bool {
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()))
            .add(id.clone())
    }

    /// Remove `id` from `room`, dropping the room once empty
    pub fn leave(&mut self, room: &RoomName, id: &ConnectionId) -> bool {
        let Some(entry) = self.rooms.get_mut(room) else {
            return false;
        };

        let removed = entry.remove(id);
        if entry.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Members of `room`; empty for unknown rooms
    pub fn members<'a>(&'a self, room: &RoomName) -> impl Iterator<Item = &'a ConnectionId> + 'a {
        self.rooms
            .get(room)
            .into_iter()
            .flat_map(|r| r.members.iter())
    }

    pub fn get(&self, room: &RoomName) -> Option<&Room> {
        self.rooms.get(room)
    }

    pub fn contains(&self, room: &RoomName, id: &ConnectionId) -> bool {
        self.rooms.get(room).is_some_and(|r| r.contains(id))
    }

    /// Number of non-empty rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}
