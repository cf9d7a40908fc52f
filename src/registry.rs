use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::room::Room;

pub type SharedRoom = Arc<Mutex<Room>>;

/// Process-wide map of live rooms. The map lock is only held for a lookup,
/// an insert or a removal; room state lives behind each room's own lock.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, SharedRoom>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, room_id: &str) -> SharedRoom {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created new room: {}", room_id);
            Arc::new(Mutex::new(Room::new(room_id)))
        });
        Arc::clone(room)
    }

    /// Locks the live room for `room_id`, creating it if needed. A handle that
    /// turns out to be retired is evicted (if the map still holds it) and the
    /// lookup retried, so callers never mutate an orphaned room.
    pub async fn lock_live(&self, room_id: &str) -> OwnedMutexGuard<Room> {
        loop {
            let room = self.get_or_create(room_id).await;
            let guard = Arc::clone(&room).lock_owned().await;
            if !guard.is_retired() {
                return guard;
            }
            drop(guard);

            let mut rooms = self.rooms.write().await;
            if rooms
                .get(room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &room))
            {
                rooms.remove(room_id);
            }
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Drops the room if it has no users. The room is retired under its own
    /// lock before it leaves the map, so a joiner still holding the old handle
    /// can tell it must look the room up again.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            return false;
        };

        let mut room = room.lock().await;
        if !room.is_empty() {
            return false;
        }
        room.retire();
        drop(room);

        rooms.remove(room_id);
        info!("Room {} deleted (no users)", room_id);
        true
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
