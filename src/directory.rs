use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::ChatBackend;
use crate::error::ChatResult;
use crate::events::{Room, RoomId};

/// Cached room list for the signed-in identity.
///
/// The backend orders rooms newest first and the cache keeps that order.
pub struct RoomDirectory {
    backend: Arc<dyn ChatBackend>,
    rooms: Vec<Room>,
    loading: bool,
    last_refresh: Option<DateTime<Utc>>,
}

impl RoomDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            rooms: Vec::new(),
            loading: false,
            last_refresh: None,
        }
    }

    /// Fetch the room list and cache it.
    ///
    /// A failed fetch yields an empty list instead of an error.
    pub async fn list(&mut self) -> &[Room] {
        self.begin_refresh();
        let fetched = self.backend.list_rooms().await;
        self.store(fetched)
    }

    /// Flag a fetch issued elsewhere as in progress
    pub fn begin_refresh(&mut self) {
        self.loading = true;
    }

    /// Cache the outcome of a room list fetch, degrading failures to empty
    pub fn store(&mut self, fetched: ChatResult<Vec<Room>>) -> &[Room] {
        match fetched {
            Ok(rooms) => {
                debug!(count = rooms.len(), "room directory refreshed");
                self.rooms = rooms;
                self.last_refresh = Some(Utc::now());
            }
            Err(e) => {
                warn!(error = %e, "room directory fetch failed, showing no rooms");
                self.rooms.clear();
            }
        }
        self.loading = false;
        &self.rooms
    }

    /// Last fetched rooms without touching the network
    pub fn cached(&self) -> &[Room] {
        &self.rooms
    }

    /// Most recently created room, by backend ordering
    pub fn newest(&self) -> Option<&Room> {
        self.rooms.first()
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| &room.room_id == room_id)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedBackend;

    #[tokio::test]
    async fn test_list_keeps_backend_order() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_rooms(vec![
            Room::new("r2", Some("Second".to_string())),
            Room::new("r1", None),
        ]);
        let mut directory = RoomDirectory::new(backend.clone());

        let rooms = directory.list().await;
        assert_eq!(rooms.len(), 2);
        assert_eq!(directory.newest().unwrap().room_id, RoomId::new("r2"));
        assert_eq!(directory.get(&RoomId::new("r1")).unwrap().title, None);
        assert!(directory.last_refresh().is_some());
        assert!(!directory.is_loading());
    }

    #[tokio::test]
    async fn test_failed_fetch_degrades_to_empty() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_rooms(vec![Room::new("r1", None)]);
        backend.push_rooms_failure();
        let mut directory = RoomDirectory::new(backend.clone());

        assert_eq!(directory.list().await.len(), 1);
        assert!(directory.list().await.is_empty());
        assert!(directory.newest().is_none());
        assert_eq!(backend.list_calls(), 2);
    }

    #[test]
    fn test_store_tracks_loading() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut directory = RoomDirectory::new(backend.clone());

        directory.begin_refresh();
        assert!(directory.is_loading());
        directory.store(Ok(vec![Room::new("r1", None)]));
        assert!(!directory.is_loading());
        assert_eq!(directory.newest().unwrap().room_id, RoomId::new("r1"));

        directory.begin_refresh();
        directory.store(Err(crate::error::ChatError::MissingBody));
        assert!(!directory.is_loading());
        assert!(directory.cached().is_empty());
        assert_eq!(backend.list_calls(), 0);
    }

    #[test]
    fn test_untitled_rooms_use_label() {
        let room = Room::new("r1", None);
        assert_eq!(room.display_title("New chat"), "New chat");
        let room = Room::new("r2", Some("Refunds".to_string()));
        assert_eq!(room.display_title("New chat"), "Refunds");
    }
}
