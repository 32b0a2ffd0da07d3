//! Process-wide store of live rooms.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use platforms::PlatformKind;
use platforms::danmaku::DanmuProtocol;
use tokio::sync::Mutex;
use tracing::debug;

use super::Room;

/// Registry key for a room: `"<platform-tag>:<canonical-room-id>"`.
pub fn room_key(platform: PlatformKind, room_id: u64) -> String {
    format!("{}:{}", platform.tag(), room_id)
}

/// Keyed store of live rooms; at most one room exists per key.
///
/// A room is present exactly while it has subscribers (or is being created
/// for one); teardown evicts the entry through [`RoomRegistry::remove`].
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a local subscriber to the room for the protocol's key,
    /// creating and connecting the room when it is the first one.
    ///
    /// The protocol must already carry the canonical room id; deduplication
    /// relies on canonicalization happening before this lookup.
    pub async fn subscribe(self: &Arc<Self>, protocol: Arc<dyn DanmuProtocol>, socket: WebSocket) {
        let key = room_key(protocol.platform(), protocol.room_id());
        let mut socket = socket;

        loop {
            let room = self.get_or_create(&key, &protocol).await;

            socket = match room.add_subscriber(socket).await {
                None => {
                    room.connect().await;
                    return;
                }
                // Raced with the teardown of a dying room: evict the stale
                // entry and retry with a fresh one.
                Some(rejected) => {
                    self.evict_if_same(&key, &room).await;
                    rejected
                }
            };
        }
    }

    async fn get_or_create(
        self: &Arc<Self>,
        key: &str,
        protocol: &Arc<dyn DanmuProtocol>,
    ) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "room created");
                Room::new(key.to_string(), Arc::clone(protocol), Arc::clone(self))
            })
            .clone()
    }

    /// Remove the entry for `key`; idempotent.
    pub(crate) async fn remove(&self, key: &str) {
        self.rooms.lock().await.remove(key);
    }

    /// Remove the entry for `key` only if it still points at `room`.
    async fn evict_if_same(&self, key: &str, room: &Arc<Room>) {
        let mut rooms = self.rooms.lock().await;
        if rooms.get(key).is_some_and(|r| Arc::ptr_eq(r, room)) {
            rooms.remove(key);
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.rooms.lock().await.contains_key(key)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(key).cloned()
    }
}
