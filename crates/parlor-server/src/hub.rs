//! Server side of the event channel: live connections, the user each one is
//! bound to, conversation rooms, and the presence registry.
//!
//! Everything lives behind one coarse lock. No store or network call is made
//! while it is held; outbound events go through unbounded channels drained by
//! each connection's writer task.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use parlor_shared::protocol::{PeerRef, PresenceSnapshot, ServerEvent, UserOffline};
use parlor_shared::types::{ConnectionId, ConversationId, UserId};

use crate::presence::PresenceRegistry;

/// Outbound half of a connection.
pub type EventTx = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    user: Option<UserId>,
    tx: EventTx,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<ConversationId, HashSet<ConnectionId>>,
    presence: PresenceRegistry,
}

impl HubState {
    fn deliver(&self, conn: ConnectionId, event: &ServerEvent) -> bool {
        match self.connections.get(&conn) {
            Some(c) => c.tx.send(event.clone()).is_ok(),
            None => false,
        }
    }

    fn broadcast_except(&self, except: Option<ConnectionId>, event: &ServerEvent) {
        for (id, conn) in &self.connections {
            if Some(*id) != except {
                let _ = conn.tx.send(event.clone());
            }
        }
    }
}

pub struct Hub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind a new connection. An authenticated connection is seeded with a
    /// presence snapshot; when it is its user's first, every other connection
    /// hears `user-online`.
    pub async fn connect(&self, user: Option<UserId>, tx: EventTx) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().await;

        state.connections.insert(
            id,
            Connection {
                user: user.clone(),
                tx,
                rooms: HashSet::new(),
            },
        );

        let Some(user) = user else {
            debug!(conn = %id, "unauthenticated connection opened");
            return id;
        };

        let online_edge = state.presence.register(&user, id);
        let snapshot = ServerEvent::PresenceSnapshot(state.presence.snapshot());
        state.deliver(id, &snapshot);

        if online_edge {
            info!(user = %user, conn = %id, "user online");
            state.broadcast_except(Some(id), &ServerEvent::UserOnline(PeerRef { peer_id: user }));
        } else {
            debug!(user = %user, conn = %id, "additional connection");
        }
        id
    }

    /// Drop a connection and its room memberships. Broadcasts `user-offline`
    /// when it was the user's last.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut state = self.state.lock().await;
        let Some(connection) = state.connections.remove(&conn) else {
            return;
        };

        for room in &connection.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }

        let Some(user) = connection.user else {
            return;
        };
        if state.presence.unregister(&user, conn) {
            let last_seen = state.presence.last_seen(&user).unwrap_or_else(chrono::Utc::now);
            info!(user = %user, conn = %conn, %last_seen, "user offline");
            state.broadcast_except(
                None,
                &ServerEvent::UserOffline(UserOffline {
                    user_id: user,
                    last_seen,
                }),
            );
        } else {
            debug!(user = %user, conn = %conn, "connection closed, user still online");
        }
    }

    pub async fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.state
            .lock()
            .await
            .connections
            .get(&conn)
            .and_then(|c| c.user.clone())
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.state.lock().await.presence.is_online(user)
    }

    pub async fn touch_activity(&self, user: &UserId) {
        self.state.lock().await.presence.touch_activity(user);
    }

    pub async fn presence_snapshot(&self) -> PresenceSnapshot {
        self.state.lock().await.presence.snapshot()
    }

    pub async fn send_to_connection(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        self.state.lock().await.deliver(conn, &event)
    }

    /// Deliver to every live connection of `user`. Returns how many were
    /// reached; zero is not an error.
    pub async fn send_to_user(&self, user: &UserId, event: ServerEvent) -> usize {
        let state = self.state.lock().await;
        state
            .presence
            .connections_of(user)
            .into_iter()
            .filter(|conn| state.deliver(*conn, &event))
            .count()
    }

    /// Deliver to every live connection of `user` other than `origin`.
    pub async fn send_to_user_except(
        &self,
        user: &UserId,
        origin: ConnectionId,
        event: ServerEvent,
    ) -> usize {
        let state = self.state.lock().await;
        state
            .presence
            .connections_of(user)
            .into_iter()
            .filter(|conn| *conn != origin)
            .filter(|conn| state.deliver(*conn, &event))
            .count()
    }

    pub async fn join_room(&self, conn: ConnectionId, room: ConversationId) -> bool {
        let mut state = self.state.lock().await;
        let Some(connection) = state.connections.get_mut(&conn) else {
            return false;
        };
        connection.rooms.insert(room);
        state.rooms.entry(room).or_default().insert(conn);
        debug!(conn = %conn, room = %room.to_room(), "joined room");
        true
    }

    pub async fn in_room(&self, conn: ConnectionId, room: ConversationId) -> bool {
        self.state
            .lock()
            .await
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains(&conn))
    }

    /// Deliver to every member of `room` except `origin`.
    pub async fn send_to_room_except(
        &self,
        room: ConversationId,
        origin: ConnectionId,
        event: ServerEvent,
    ) -> usize {
        let state = self.state.lock().await;
        let Some(members) = state.rooms.get(&room) else {
            return 0;
        };
        members
            .iter()
            .filter(|conn| **conn != origin)
            .filter(|conn| state.deliver(**conn, &event))
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn channel() -> (EventTx, UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count_online(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::UserOnline(_)))
            .count()
    }

    fn count_offline(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::UserOffline(_)))
            .count()
    }

    #[tokio::test]
    async fn presence_notifications_are_edge_triggered() {
        let hub = Hub::new();
        let (obs_tx, mut observer) = channel();
        hub.connect(Some(UserId::new("watcher")), obs_tx).await;
        drain(&mut observer);

        let alice = UserId::new("alice");
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = hub.connect(Some(alice.clone()), tx1).await;
        let c2 = hub.connect(Some(alice.clone()), tx2).await;
        assert_eq!(count_online(&drain(&mut observer)), 1);

        hub.disconnect(c1).await;
        assert_eq!(count_offline(&drain(&mut observer)), 0);
        assert!(hub.is_online(&alice).await);

        hub.disconnect(c2).await;
        assert_eq!(count_offline(&drain(&mut observer)), 1);
        assert!(!hub.is_online(&alice).await);
    }

    #[tokio::test]
    async fn new_connection_is_seeded_with_snapshot() {
        let hub = Hub::new();
        let (tx, _rx) = channel();
        hub.connect(Some(UserId::new("bob")), tx).await;

        let (tx, mut rx) = channel();
        hub.connect(Some(UserId::new("alice")), tx).await;

        match rx.try_recv().unwrap() {
            ServerEvent::PresenceSnapshot(snap) => {
                assert_eq!(
                    snap.online_user_ids,
                    vec![UserId::new("alice"), UserId::new("bob")]
                );
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        // The newcomer does not hear about itself twice.
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unauthenticated_connections_do_not_affect_presence() {
        let hub = Hub::new();
        let (tx, mut rx) = channel();
        let conn = hub.connect(None, tx).await;

        assert!(drain(&mut rx).is_empty());
        assert!(hub.user_of(conn).await.is_none());
        assert!(hub.presence_snapshot().await.online_user_ids.is_empty());
        hub.disconnect(conn).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn room_delivery_skips_origin_and_forgets_closed_connections() {
        let hub = Hub::new();
        let room = ConversationId::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let a = hub.connect(None, tx_a).await;
        let b = hub.connect(None, tx_b).await;

        assert!(hub.join_room(a, room).await);
        assert!(hub.join_room(b, room).await);

        let notice = ServerEvent::UserOnline(PeerRef {
            peer_id: UserId::new("x"),
        });
        assert_eq!(hub.send_to_room_except(room, a, notice.clone()).await, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        hub.disconnect(b).await;
        assert!(!hub.in_room(b, room).await);
        assert_eq!(hub.send_to_room_except(room, a, notice).await, 0);
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_device() {
        let hub = Hub::new();
        let bob = UserId::new("bob");
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.connect(Some(bob.clone()), tx1).await;
        hub.connect(Some(bob.clone()), tx2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        let event = ServerEvent::UserOnline(PeerRef {
            peer_id: UserId::new("carol"),
        });
        assert_eq!(hub.send_to_user(&bob, event).await, 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(
            hub.send_to_user(&UserId::new("nobody"), ServerEvent::UserOnline(PeerRef {
                peer_id: bob
            }))
            .await,
            0
        );
    }

    #[tokio::test]
    async fn send_to_user_except_skips_the_answering_device() {
        let hub = Hub::new();
        let bob = UserId::new("bob");
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let phone = hub.connect(Some(bob.clone()), tx1).await;
        hub.connect(Some(bob.clone()), tx2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        let event = ServerEvent::CallAnsweredElsewhere(PeerRef {
            peer_id: UserId::new("alice"),
        });
        assert_eq!(hub.send_to_user_except(&bob, phone, event).await, 1);
        assert!(drain(&mut rx1).is_empty());
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerEvent::CallAnsweredElsewhere(p)] if p.peer_id == UserId::new("alice")
        ));
    }
}
