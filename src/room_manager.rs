use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::id_types::{RoomId, RoomName};
use crate::metrics::ACTIVE_ROOMS;
use crate::room::Room;

/// Snapshot entry for `RoomManager::list`.
pub struct RoomSummary {
    pub id: RoomId,
    pub name: RoomName,
    pub member_count: usize,
}

/// Concurrent map `RoomId -> Room`.
pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomManager {
    pub fn new() -> Self {
        RoomManager {
            rooms: DashMap::new(),
        }
    }

    /// Assigns a fresh unique ID.
    pub fn create_room(&self, name: RoomName) -> Arc<Room> {
        let id = RoomId::generate();
        let room = Arc::new(Room::new(id.clone(), name.clone()));
        self.rooms.insert(id.clone(), room.clone());
        ACTIVE_ROOMS.inc();
        info!(room = %id, name = %name, "room created");
        room
    }

    pub fn get_room(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|r| r.clone())
    }

    /// Linear scan; there's no separate by-name index since room names
    /// aren't unique and lookups here only back the HTTP room-detail route.
    pub fn find_by_name(&self, name: &RoomName) -> Option<Arc<Room>> {
        self.rooms.iter().find(|e| &e.value().name == name).map(|e| e.value().clone())
    }

    /// Caller is responsible for evicting members first (see
    /// `Orchestrator::evict_room`).
    pub fn stop_room(&self, id: &RoomId) {
        if self.rooms.remove(id).is_some() {
            ACTIVE_ROOMS.dec();
            info!(room = %id, "room stopped");
        }
    }

    pub async fn list(&self) -> Vec<RoomSummary> {
        let mut out = Vec::with_capacity(self.rooms.len());
        for entry in self.rooms.iter() {
            out.push(RoomSummary {
                id: entry.key().clone(),
                name: entry.value().name.clone(),
                member_count: entry.value().member_count().await,
            });
        }
        out
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_room_assigns_unique_ids() {
        let mgr = RoomManager::new();
        let a = mgr.create_room(RoomName::from("lab"));
        let b = mgr.create_room(RoomName::from("lab"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn get_room_returns_none_for_unknown_id() {
        let mgr = RoomManager::new();
        assert!(mgr.get_room(&RoomId::from("ghost")).is_none());
    }

    #[test]
    fn stop_room_removes_it() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(RoomName::from("lab"));
        mgr.stop_room(&room.id);
        assert!(mgr.get_room(&room.id).is_none());
    }

    #[test]
    fn find_by_name_matches_display_label() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(RoomName::from("lab"));
        let found = mgr.find_by_name(&RoomName::from("lab")).unwrap();
        assert_eq!(found.id, room.id);
        assert!(mgr.find_by_name(&RoomName::from("ghost")).is_none());
    }

    #[tokio::test]
    async fn list_reflects_member_counts() {
        let mgr = RoomManager::new();
        let room = mgr.create_room(RoomName::from("lab"));
        let summaries = mgr.list().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, room.id);
        assert_eq!(summaries[0].member_count, 0);
    }
}
