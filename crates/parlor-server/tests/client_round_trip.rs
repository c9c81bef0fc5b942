//! Client sessions talking to each other through an in-process relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use parlor_client::{ClientConfig, ClientError, ClientSession, ClientUpdate};
use parlor_media::fakes::{FakeDevices, FakeTransportFactory};
use parlor_media::{CallState, CallUpdate, ConnectionState, EndReason, TransportEvent};
use parlor_server::Relay;
use parlor_shared::constants::MISSED_VIDEO_CALL_TEXT;
use parlor_shared::protocol::{CallControl, ClientEvent};
use parlor_shared::types::{ConversationId, DeliveryState, MediaKind, UserId};
use parlor_store::{ConversationKind, MemoryStore};

struct Peer {
    session: ClientSession,
    updates: UnboundedReceiver<ClientUpdate>,
    /// Bypasses the session, for events a well-behaved client would not send.
    raw: UnboundedSender<ClientEvent>,
    transports: Arc<FakeTransportFactory>,
}

impl Peer {
    fn drain(&mut self) -> Vec<ClientUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            out.push(update);
        }
        out
    }

    fn connect_transport(&self) {
        self.transports
            .last()
            .expect("transport opened")
            .raise(TransportEvent::ConnectionState(ConnectionState::Connected));
    }
}

struct World {
    relay: Arc<Relay>,
    store: Arc<MemoryStore>,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let relay = Arc::new(Relay::new(store.clone(), Duration::from_secs(120)));
        Self { relay, store }
    }

    async fn private(&self, a: &str, b: &str) -> ConversationId {
        self.store
            .create_conversation(ConversationKind::Private, &[UserId::new(a), UserId::new(b)])
            .await
            .id
    }

    async fn attach(&self, user: &str) -> Peer {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let conn = self.relay.connect(Some(UserId::new(user)), server_tx).await;

        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let relay = self.relay.clone();
        tokio::spawn(async move {
            while let Some(event) = client_rx.recv().await {
                relay.dispatch(conn, event).await;
            }
        });

        let (updates_tx, updates) = mpsc::unbounded_channel();
        let transports = Arc::new(FakeTransportFactory::default());
        let session = ClientSession::new(
            UserId::new(user),
            user.to_uppercase(),
            &ClientConfig::default(),
            Arc::new(client_tx.clone()),
            Arc::new(FakeDevices::default()),
            transports.clone(),
            updates_tx,
        );
        tokio::spawn(session.clone().run(server_rx));

        Peer {
            session,
            updates,
            raw: client_tx,
            transports,
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn call_states(updates: &[ClientUpdate]) -> Vec<CallState> {
    updates
        .iter()
        .filter_map(|u| match u {
            ClientUpdate::Call {
                update: CallUpdate::State(state),
                ..
            } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn message_lands_once_on_every_device() {
    let world = World::new();
    let conv = world.private("alice", "bob").await;
    let alice = world.attach("alice").await;
    let bob_phone = world.attach("bob").await;
    let bob_laptop = world.attach("bob").await;
    settle().await;

    let key = alice.session.chat().send(conv, "  hello bob ").unwrap();
    settle().await;

    let mine = alice.session.chat().messages(conv);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].idempotency_key.as_ref(), Some(&key));
    assert_eq!(mine[0].delivery, DeliveryState::Sent);
    assert_eq!(mine[0].body, "hello bob");
    assert_eq!(alice.session.chat().unread(conv), 0);

    for bob in [&bob_phone, &bob_laptop] {
        let theirs = bob.session.chat().messages(conv);
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].id, mine[0].id);
        assert_eq!(bob.session.chat().unread(conv), 1);
        assert!(bob.session.chat().is_online(&UserId::new("alice")));
    }

    // The echo timer was cancelled.
    tokio::time::sleep(Duration::from_secs(13)).await;
    assert_eq!(
        alice.session.chat().messages(conv)[0].delivery,
        DeliveryState::Sent
    );
    assert_eq!(world.store.messages(conv).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn video_call_connects_and_hangs_up() {
    let world = World::new();
    let mut alice = world.attach("alice").await;
    let mut bob = world.attach("bob").await;
    settle().await;

    let call = alice
        .session
        .calls()
        .start_call(UserId::new("bob"), MediaKind::Video, None)
        .unwrap();
    settle().await;

    assert!(bob.drain().iter().any(|u| matches!(
        u,
        ClientUpdate::IncomingCall { call_id, caller_name, media_kind: MediaKind::Video, .. }
            if *call_id == call.call_id() && caller_name == "ALICE"
    )));

    bob.session.calls().accept().unwrap();
    settle().await;
    assert_eq!(call.state(), CallState::Connecting);
    let answering = bob.session.calls().current().unwrap();
    assert_eq!(answering.state(), CallState::Connecting);

    alice.connect_transport();
    bob.connect_transport();
    settle().await;
    assert_eq!(call.state(), CallState::Connected);
    assert_eq!(answering.state(), CallState::Connected);

    alice.session.calls().hang_up().unwrap();
    settle().await;

    assert_eq!(call.state(), CallState::Ended(EndReason::LocalHangup));
    assert_eq!(answering.state(), CallState::Ended(EndReason::RemoteHangup));
    assert!(alice.session.calls().current().is_none());
    assert!(bob.session.calls().current().is_none());
    assert!(call_states(&alice.drain()).contains(&CallState::Connected));
    assert!(world.store.missed_calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_is_recorded_once() {
    let world = World::new();
    let conv = world.private("alice", "bob").await;
    let mut alice = world.attach("alice").await;
    let mut bob = world.attach("bob").await;
    settle().await;

    let call = alice
        .session
        .calls()
        .start_call(UserId::new("bob"), MediaKind::Video, Some(conv))
        .unwrap();
    settle().await;
    assert_eq!(bob.session.calls().current().unwrap().state(), CallState::Idle);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(call.state(), CallState::Ended(EndReason::NoAnswer));

    // Bob's ringing call went away without a rejection of his own.
    assert!(bob
        .drain()
        .iter()
        .any(|u| matches!(u, ClientUpdate::IncomingCallDismissed { .. })));
    assert!(bob.session.calls().current().is_none());

    // A stray rejection for the same call does not record it again.
    bob.raw
        .send(ClientEvent::CallReject(CallControl {
            peer_id: Some(UserId::new("alice")),
            conversation_hint: Some(conv),
            media_kind: Some(MediaKind::Video),
            call_id: Some(call.call_id()),
        }))
        .unwrap();
    settle().await;

    assert_eq!(world.store.missed_calls().await.len(), 1);
    let persisted = world.store.messages(conv).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].body, MISSED_VIDEO_CALL_TEXT);

    let seen_by_bob = bob.session.chat().messages(conv);
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(bob.session.chat().unread(conv), 1);
    assert_eq!(alice.session.chat().messages(conv).len(), 1);
    assert!(call_states(&alice.drain()).contains(&CallState::Ended(EndReason::NoAnswer)));
}

#[tokio::test(start_paused = true)]
async fn answering_on_one_device_silences_the_others() {
    let world = World::new();
    let conv = world.private("alice", "bob").await;
    let mut alice = world.attach("alice").await;
    let mut bob_phone = world.attach("bob").await;
    let mut bob_laptop = world.attach("bob").await;
    settle().await;

    let call = alice
        .session
        .calls()
        .start_call(UserId::new("bob"), MediaKind::Audio, Some(conv))
        .unwrap();
    settle().await;
    for bob in [&mut bob_phone, &mut bob_laptop] {
        assert!(bob
            .drain()
            .iter()
            .any(|u| matches!(u, ClientUpdate::IncomingCall { call_id, .. } if *call_id == call.call_id())));
    }

    bob_phone.session.calls().accept().unwrap();
    settle().await;

    assert!(bob_laptop.drain().iter().any(|u| matches!(
        u,
        ClientUpdate::IncomingCallDismissed { call_id, caller_id }
            if *call_id == call.call_id() && *caller_id == UserId::new("alice")
    )));
    assert!(bob_laptop.session.calls().current().is_none());
    assert!(matches!(
        bob_laptop.session.calls().decline(),
        Err(ClientError::NoActiveCall)
    ));

    alice.connect_transport();
    bob_phone.connect_transport();
    settle().await;
    assert_eq!(call.state(), CallState::Connected);

    // A late rejection from the silenced device changes nothing.
    bob_laptop
        .raw
        .send(ClientEvent::CallReject(CallControl {
            peer_id: Some(UserId::new("alice")),
            conversation_hint: Some(conv),
            media_kind: Some(MediaKind::Audio),
            call_id: Some(call.call_id()),
        }))
        .unwrap();
    settle().await;

    assert_eq!(call.state(), CallState::Connected);
    assert_eq!(
        bob_phone.session.calls().current().unwrap().state(),
        CallState::Connected
    );
    assert!(world.store.missed_calls().await.is_empty());
    assert!(world.store.messages(conv).await.is_empty());
    assert!(!call_states(&alice.drain())
        .iter()
        .any(|s| matches!(s, CallState::Ended(_))));
}

#[tokio::test(start_paused = true)]
async fn busy_device_leaves_the_call_to_an_idle_one() {
    let world = World::new();
    let mut alice = world.attach("alice").await;
    let mut bob_phone = world.attach("bob").await;
    let mut bob_laptop = world.attach("bob").await;
    let _carol = world.attach("carol").await;
    settle().await;

    let outgoing = bob_phone
        .session
        .calls()
        .start_call(UserId::new("carol"), MediaKind::Audio, None)
        .unwrap();
    settle().await;
    bob_phone.drain();
    bob_laptop.drain();

    let call = alice
        .session
        .calls()
        .start_call(UserId::new("bob"), MediaKind::Video, None)
        .unwrap();
    settle().await;

    assert!(!bob_phone
        .drain()
        .iter()
        .any(|u| matches!(u, ClientUpdate::IncomingCall { .. })));
    assert!(bob_laptop
        .drain()
        .iter()
        .any(|u| matches!(u, ClientUpdate::IncomingCall { call_id, .. } if *call_id == call.call_id())));
    assert_eq!(call.state(), CallState::Calling);
    assert_eq!(
        bob_phone.session.calls().current().unwrap().call_id(),
        outgoing.call_id()
    );
    assert!(world.store.missed_calls().await.is_empty());

    bob_laptop.session.calls().accept().unwrap();
    settle().await;

    assert_eq!(call.state(), CallState::Connecting);
    assert_eq!(
        bob_laptop.session.calls().current().unwrap().state(),
        CallState::Connecting
    );
    assert_eq!(outgoing.state(), CallState::Calling);
    assert!(!call_states(&alice.drain())
        .iter()
        .any(|s| matches!(s, CallState::Ended(_))));
}
