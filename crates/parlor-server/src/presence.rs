//! Presence registry: which users currently hold at least one live
//! connection, and when offline users were last active.
//!
//! All operations are plain map edits. The registry is owned by the
//! connection [`Hub`](crate::hub::Hub) and only ever touched under its lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use parlor_shared::protocol::PresenceSnapshot;
use parlor_shared::types::{ConnectionId, UserId};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: HashMap<UserId, HashSet<ConnectionId>>,
    last_activity: HashMap<UserId, DateTime<Utc>>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the user's live set. Returns `true` only on the 0 -> 1
    /// edge; registering an already known handle is not an edge.
    pub fn register(&mut self, user: &UserId, conn: ConnectionId) -> bool {
        self.last_seen.remove(user);

        let set = self.connections.entry(user.clone()).or_default();
        let was_offline = set.is_empty();
        let inserted = set.insert(conn);
        let edge = was_offline && inserted;

        if edge {
            // Activity from a previous session must not leak into this one.
            self.last_activity.remove(user);
        }
        edge
    }

    /// Remove `conn`. Returns `true` only on the 1 -> 0 edge, at which point
    /// the user's last-seen time is recorded.
    pub fn unregister(&mut self, user: &UserId, conn: ConnectionId) -> bool {
        self.unregister_at(user, conn, Utc::now())
    }

    pub fn unregister_at(&mut self, user: &UserId, conn: ConnectionId, now: DateTime<Utc>) -> bool {
        let Some(set) = self.connections.get_mut(user) else {
            return false;
        };
        if !set.remove(&conn) || !set.is_empty() {
            return false;
        }

        self.connections.remove(user);
        let seen = self.last_activity.get(user).copied().unwrap_or(now);
        self.last_seen.insert(user.clone(), seen);
        true
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.connections.get(user).is_some_and(|s| !s.is_empty())
    }

    /// Live connections of `user`, in no particular order.
    pub fn connections_of(&self, user: &UserId) -> Vec<ConnectionId> {
        self.connections
            .get(user)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn touch_activity(&mut self, user: &UserId) {
        self.touch_activity_at(user, Utc::now());
    }

    pub fn touch_activity_at(&mut self, user: &UserId, at: DateTime<Utc>) {
        self.last_activity.insert(user.clone(), at);
    }

    pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(user).copied()
    }

    /// Online users (sorted) plus last-seen times of users currently offline.
    pub fn snapshot(&self) -> PresenceSnapshot {
        let mut online_user_ids: Vec<UserId> = self.connections.keys().cloned().collect();
        online_user_ids.sort();

        PresenceSnapshot {
            online_user_ids,
            last_seen_by_user_id: self.last_seen.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[test]
    fn edges_fire_only_on_first_and_last_connection() {
        let mut reg = PresenceRegistry::new();
        let (c1, c2) = (ConnectionId(1), ConnectionId(2));

        assert!(reg.register(&alice(), c1));
        assert!(!reg.register(&alice(), c2));
        assert!(!reg.register(&alice(), c2));
        assert!(reg.is_online(&alice()));

        assert!(!reg.unregister(&alice(), c1));
        assert!(reg.is_online(&alice()));
        assert!(reg.unregister(&alice(), c2));
        assert!(!reg.is_online(&alice()));

        // Unknown handles never produce an edge.
        assert!(!reg.unregister(&alice(), c2));
    }

    #[test]
    fn last_seen_uses_latest_activity_and_clears_on_return() {
        let mut reg = PresenceRegistry::new();
        let active = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let left = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

        reg.register(&alice(), ConnectionId(1));
        reg.touch_activity_at(&alice(), active);
        assert!(reg.unregister_at(&alice(), ConnectionId(1), left));
        assert_eq!(reg.last_seen(&alice()), Some(active));

        let snap = reg.snapshot();
        assert!(snap.online_user_ids.is_empty());
        assert_eq!(snap.last_seen_by_user_id.get(&alice()), Some(&active));

        reg.register(&alice(), ConnectionId(2));
        assert_eq!(reg.last_seen(&alice()), None);
        assert_eq!(reg.snapshot().online_user_ids, vec![alice()]);
    }

    #[test]
    fn last_seen_defaults_to_disconnect_time() {
        let mut reg = PresenceRegistry::new();
        let left = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();

        reg.register(&alice(), ConnectionId(7));
        reg.unregister_at(&alice(), ConnectionId(7), left);
        assert_eq!(reg.last_seen(&alice()), Some(left));
    }

    #[test]
    fn previous_session_activity_is_forgotten() {
        let mut reg = PresenceRegistry::new();
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        reg.register(&alice(), ConnectionId(1));
        reg.touch_activity_at(&alice(), old);
        reg.unregister_at(&alice(), ConnectionId(1), old);

        reg.register(&alice(), ConnectionId(2));
        reg.unregister_at(&alice(), ConnectionId(2), later);
        assert_eq!(reg.last_seen(&alice()), Some(later));
    }
}
