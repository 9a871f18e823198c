/// Tab → room mapping and its string encoding for chrome.storage
///
/// The whole mapping lives under a single storage key as a JSON object
/// keyed by the decimal tab id, e.g. `{"7":"QX7K2","12":"ABCDE"}`.

use crate::room_code::RoomCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Browser tab identifier, stable for the tab's lifetime
pub type TabId = i32;

/// Rooms joined by each tab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabRoomMap {
    rooms: BTreeMap<TabId, RoomCode>,
}

impl TabRoomMap {
    pub fn new() -> Self {
        TabRoomMap {
            rooms: BTreeMap::new(),
        }
    }

    /// Set the room for a tab, replacing any previous one
    pub fn insert(&mut self, tab_id: TabId, room: RoomCode) -> Option<RoomCode> {
        self.rooms.insert(tab_id, room)
    }

    pub fn remove(&mut self, tab_id: TabId) -> Option<RoomCode> {
        self.rooms.remove(&tab_id)
    }

    pub fn get(&self, tab_id: TabId) -> Option<&RoomCode> {
        self.rooms.get(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.rooms.contains_key(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TabId, &RoomCode)> {
        self.rooms.iter().map(|(tab_id, room)| (*tab_id, room))
    }
}

impl FromIterator<(TabId, RoomCode)> for TabRoomMap {
    fn from_iter<I: IntoIterator<Item = (TabId, RoomCode)>>(iter: I) -> Self {
        TabRoomMap {
            rooms: iter.into_iter().collect(),
        }
    }
}

/// Decode the stored value. Missing or malformed values decode to an empty map.
pub fn parse_rooms(raw: Option<&str>) -> TabRoomMap {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return TabRoomMap::new();
    };

    match serde_json::from_str(raw) {
        Ok(rooms) => rooms,
        Err(e) => {
            log::debug!("Ignoring malformed rooms value {:?}: {}", raw, e);
            TabRoomMap::new()
        }
    }
}

pub fn serialize_rooms(rooms: &TabRoomMap) -> String {
    // String keys and string values cannot fail to encode
    serde_json::to_string(rooms).unwrap_or_else(|_| "{}".to_string())
}

/// Upsert one tab's room into the stored value and re-encode it
pub fn store_room(raw: Option<&str>, tab_id: TabId, room: RoomCode) -> String {
    let mut rooms = parse_rooms(raw);
    rooms.insert(tab_id, room);
    serialize_rooms(&rooms)
}

/// Remove one tab's room from the stored value and re-encode it
pub fn delete_room(raw: Option<&str>, tab_id: TabId) -> String {
    let mut rooms = parse_rooms(raw);
    rooms.remove(tab_id);
    serialize_rooms(&rooms)
}

pub fn room_for(raw: Option<&str>, tab_id: TabId) -> Option<RoomCode> {
    parse_rooms(raw).get(tab_id).cloned()
}
