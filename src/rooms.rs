//! Room membership routing.
//!
//! A room is a named multicast group: global, role-scoped, the coordinator
//! group, alert-type-scoped, or geo-cell-scoped. Membership is held in a
//! bidirectional index (room -> connection ids, connection id -> rooms) so
//! disconnect cleanup is proportional to the rooms that one connection
//! joined, never a scan over all rooms.

use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::alerts::EmergencyAlert;
use crate::auth::Role;
use crate::geo::GeoCell;

/// A multicast group key. Rooms are emergent: they exist exactly while they
/// have members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connection on every process. Only critical alerts and operator
    /// system messages reach it.
    Global,
    /// All connections sharing a non-citizen role.
    Role(Role),
    /// Coordinators and admins together; receives responder status traffic.
    Coordinators,
    /// Connections subscribed to one alert-type label.
    AlertKind(String),
    /// Connections whose last known location falls in one geo cell.
    Cell(GeoCell),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Global => write!(f, "global"),
            Room::Role(role) => write!(f, "role:{role}"),
            Room::Coordinators => write!(f, "coordinators"),
            Room::AlertKind(kind) => write!(f, "kind:{kind}"),
            Room::Cell(cell) => write!(f, "cell:{cell}"),
        }
    }
}

/// Bidirectional room membership index for one process.
#[derive(Default)]
pub struct RoomRouter {
    members: DashMap<Room, HashSet<Uuid>>,
    joined: DashMap<Uuid, HashSet<Room>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Re-adding is a no-op.
    pub fn join(&self, conn_id: Uuid, room: Room) {
        self.members
            .entry(room.clone())
            .or_default()
            .insert(conn_id);
        self.joined.entry(conn_id).or_default().insert(room);
    }

    /// Remove a connection from a room. Leaving a room it never joined is a
    /// no-op.
    pub fn leave(&self, conn_id: Uuid, room: &Room) {
        let mut drop_room = false;
        if let Some(mut members) = self.members.get_mut(room) {
            members.remove(&conn_id);
            drop_room = members.is_empty();
        }
        if drop_room {
            self.members.remove(room);
        }
        if let Some(mut rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(room);
        }
    }

    /// Rooms every connection enters at connect time: always global, the
    /// role room for non-citizens, and the coordinator group for
    /// coordinators and admins.
    pub fn rooms_at_connect(role: Role) -> Vec<Room> {
        let mut rooms = vec![Room::Global];
        if role != Role::Citizen {
            rooms.push(Room::Role(role));
        }
        if role.is_coordinator() {
            rooms.push(Room::Coordinators);
        }
        rooms
    }

    /// Join the connect-time room set for a new connection.
    pub fn join_initial(&self, conn_id: Uuid, role: Role) {
        for room in Self::rooms_at_connect(role) {
            self.join(conn_id, room);
        }
    }

    /// Move a connection into the geo-cell room for its new location,
    /// leaving the previous cell room if any. Returns the new cell.
    pub fn on_location_update(&self, conn_id: Uuid, lat: f64, lng: f64) -> GeoCell {
        let cell = GeoCell::of(lat, lng);
        let previous: Option<Room> = self.joined.get(&conn_id).and_then(|rooms| {
            rooms
                .iter()
                .find(|r| matches!(r, Room::Cell(c) if *c != cell))
                .cloned()
        });
        if let Some(old) = previous {
            self.leave(conn_id, &old);
        }
        self.join(conn_id, Room::Cell(cell));
        cell
    }

    /// Replace a connection's alert-type rooms with the given set.
    /// Subscription lists fully replace; they never merge.
    pub fn on_subscription_change(&self, conn_id: Uuid, kinds: &HashSet<String>) {
        let stale: Vec<Room> = self
            .joined
            .get(&conn_id)
            .map(|rooms| {
                rooms
                    .iter()
                    .filter(|r| matches!(r, Room::AlertKind(k) if !kinds.contains(k)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for room in stale {
            self.leave(conn_id, &room);
        }
        for kind in kinds {
            self.join(conn_id, Room::AlertKind(kind.clone()));
        }
    }

    /// The rooms an alert must reach: its geo cell and its alert-type room,
    /// plus the global room only when severity is critical. Non-critical
    /// alerts deliberately never spam every connected client.
    pub fn target_rooms_for(alert: &EmergencyAlert) -> Vec<Room> {
        let mut rooms = vec![
            Room::Cell(GeoCell::of(alert.location.lat, alert.location.lng)),
            Room::AlertKind(alert.kind.clone()),
        ];
        if alert.severity == crate::alerts::Severity::Critical {
            rooms.push(Room::Global);
        }
        rooms
    }

    /// Current members of a room.
    pub fn members_of(&self, room: &Room) -> Vec<Uuid> {
        self.members
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Deduplicated union of members across several rooms.
    pub fn members_of_any(&self, rooms: &[Room]) -> HashSet<Uuid> {
        let mut ids = HashSet::new();
        for room in rooms {
            if let Some(members) = self.members.get(room) {
                ids.extend(members.iter().copied());
            }
        }
        ids
    }

    pub fn in_room(&self, conn_id: Uuid, room: &Room) -> bool {
        self.members
            .get(room)
            .map(|m| m.contains(&conn_id))
            .unwrap_or(false)
    }

    /// Rooms a connection currently belongs to.
    pub fn rooms_of(&self, conn_id: Uuid) -> HashSet<Room> {
        self.joined
            .get(&conn_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Drop a connection from every room it joined. O(rooms for that
    /// connection).
    pub fn remove_connection(&self, conn_id: Uuid) {
        let rooms = self
            .joined
            .remove(&conn_id)
            .map(|(_, r)| r)
            .unwrap_or_default();
        for room in rooms {
            let mut drop_room = false;
            if let Some(mut members) = self.members.get_mut(&room) {
                members.remove(&conn_id);
                drop_room = members.is_empty();
            }
            if drop_room {
                self.members.remove(&room);
            }
        }
    }

    /// Connection count per geo-cell room, for the metrics snapshot.
    pub fn cell_occupancy(&self) -> Vec<(GeoCell, usize)> {
        self.members
            .iter()
            .filter_map(|e| match e.key() {
                Room::Cell(cell) => Some((*cell, e.value().len())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertLocation, Severity};
    use chrono::Utc;

    fn alert(severity: Severity) -> EmergencyAlert {
        EmergencyAlert {
            id: "a1".to_string(),
            kind: "flood".to_string(),
            severity,
            location: AlertLocation {
                lat: 19.0760,
                lng: 72.8777,
                radius_km: 50.0,
                address: String::new(),
            },
            message: String::new(),
            created_at: Utc::now(),
            source: "test".to_string(),
            affected_areas: vec![],
            expected_duration: None,
            instructions: vec![],
            resources: None,
            supersedes: None,
        }
    }

    #[test]
    fn join_is_idempotent() {
        let router = RoomRouter::new();
        let conn = Uuid::new_v4();
        router.join(conn, Room::Global);
        router.join(conn, Room::Global);
        assert_eq!(router.members_of(&Room::Global).len(), 1);
    }

    #[test]
    fn leave_unknown_room_is_a_noop() {
        let router = RoomRouter::new();
        router.leave(Uuid::new_v4(), &Room::Global);
        assert!(router.members_of(&Room::Global).is_empty());
    }

    #[test]
    fn non_citizen_roles_imply_role_room() {
        for role in [Role::Responder, Role::Coordinator, Role::Admin] {
            let router = RoomRouter::new();
            let conn = Uuid::new_v4();
            router.join_initial(conn, role);
            assert!(router.in_room(conn, &Room::Global));
            assert!(router.in_room(conn, &Room::Role(role)), "role {role}");
        }
    }

    #[test]
    fn citizens_get_only_global() {
        let router = RoomRouter::new();
        let conn = Uuid::new_v4();
        router.join_initial(conn, Role::Citizen);
        assert_eq!(router.rooms_of(conn), HashSet::from([Room::Global]));
    }

    #[test]
    fn coordinators_and_admins_share_the_coordinator_room() {
        let router = RoomRouter::new();
        let coord = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let responder = Uuid::new_v4();
        router.join_initial(coord, Role::Coordinator);
        router.join_initial(admin, Role::Admin);
        router.join_initial(responder, Role::Responder);

        assert!(router.in_room(coord, &Room::Coordinators));
        assert!(router.in_room(admin, &Room::Coordinators));
        assert!(!router.in_room(responder, &Room::Coordinators));
    }

    #[test]
    fn location_update_swaps_cell_rooms() {
        let router = RoomRouter::new();
        let conn = Uuid::new_v4();

        let first = router.on_location_update(conn, 19.0760, 72.8777);
        assert!(router.in_room(conn, &Room::Cell(first)));

        let second = router.on_location_update(conn, 28.6139, 77.2090);
        assert_ne!(first, second);
        assert!(!router.in_room(conn, &Room::Cell(first)));
        assert!(router.in_room(conn, &Room::Cell(second)));
    }

    #[test]
    fn subscriptions_replace_not_merge() {
        let router = RoomRouter::new();
        let conn = Uuid::new_v4();

        router.on_subscription_change(conn, &HashSet::from(["flood".to_string()]));
        assert!(router.in_room(conn, &Room::AlertKind("flood".to_string())));

        router.on_subscription_change(conn, &HashSet::from(["fire".to_string()]));
        assert!(!router.in_room(conn, &Room::AlertKind("flood".to_string())));
        assert!(router.in_room(conn, &Room::AlertKind("fire".to_string())));
    }

    #[test]
    fn critical_alerts_target_global_others_do_not() {
        let critical = RoomRouter::target_rooms_for(&alert(Severity::Critical));
        assert!(critical.contains(&Room::Global));
        assert!(critical.contains(&Room::AlertKind("flood".to_string())));
        assert!(critical.contains(&Room::Cell(GeoCell::of(19.0760, 72.8777))));

        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            let rooms = RoomRouter::target_rooms_for(&alert(severity));
            assert!(!rooms.contains(&Room::Global), "severity {severity:?}");
            assert_eq!(rooms.len(), 2);
        }
    }

    #[test]
    fn remove_connection_clears_all_memberships() {
        let router = RoomRouter::new();
        let conn = Uuid::new_v4();
        router.join_initial(conn, Role::Responder);
        router.on_location_update(conn, 19.0, 72.0);
        router.on_subscription_change(conn, &HashSet::from(["flood".to_string()]));

        router.remove_connection(conn);
        assert!(router.rooms_of(conn).is_empty());
        assert!(router.members_of(&Room::Global).is_empty());
        assert!(router
            .members_of(&Room::AlertKind("flood".to_string()))
            .is_empty());
    }
}
