//! Client side of message delivery.
//!
//! Sends are optimistic: the message shows up immediately as `sending`, and
//! the server echo carrying the same idempotency key turns it into `sent` in
//! place. Without an echo inside the timeout the message is marked `failed`;
//! it is never resent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use parlor_shared::protocol::{
    ClientEvent, ConversationRef, MessagePayload, ReadReceipt, Rejection, SendMessage, ServerEvent,
    TypingNotice,
};
use parlor_shared::sink::EventSink;
use parlor_shared::types::{ConversationId, IdempotencyKey, MessageId, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{emit_update, ClientUpdate, UpdateTx};
use crate::state::{ConversationPreview, ConversationView, MessageView, PresenceView};

#[derive(Default)]
struct ChatState {
    conversations: HashMap<ConversationId, ConversationView>,
    /// Echo timers for messages still in flight.
    echo_timers: HashMap<IdempotencyKey, AbortHandle>,
    typing_timers: HashMap<(ConversationId, UserId), (u64, AbortHandle)>,
    typing_generation: u64,
    presence: PresenceView,
}

struct ChatInner {
    me: UserId,
    echo_timeout: Duration,
    typing_expiry: Duration,
    sink: Arc<dyn EventSink>,
    updates: UpdateTx,
    state: Mutex<ChatState>,
}

/// Messages, typing and presence for one signed-in user.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ChatInner>,
}

impl ChatClient {
    pub fn new(
        me: UserId,
        config: &ClientConfig,
        sink: Arc<dyn EventSink>,
        updates: UpdateTx,
    ) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                me,
                echo_timeout: config.message_echo_timeout,
                typing_expiry: config.typing_expiry,
                sink,
                updates,
                state: Mutex::new(ChatState::default()),
            }),
        }
    }

    pub fn me(&self) -> &UserId {
        &self.inner.me
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Send `body` to a conversation. Returns the idempotency key of the
    /// optimistic message.
    pub fn send(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<IdempotencyKey, ClientError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ClientError::EmptyBody);
        }

        let key = IdempotencyKey::generate();
        let view = MessageView::pending(
            key.clone(),
            conversation_id,
            self.inner.me.clone(),
            body.to_string(),
        );
        self.inner
            .lock()
            .conversations
            .entry(conversation_id)
            .or_default()
            .timeline
            .push_pending(view.clone());
        emit_update(&self.inner.updates, ClientUpdate::MessageAdded(view));

        let event = ClientEvent::SendMessage(SendMessage {
            conversation_id: Some(conversation_id),
            body: body.to_string(),
            idempotency_key: key.clone(),
        });
        if let Err(e) = self.inner.sink.emit(event) {
            warn!(key = %key, error = %e, "Event channel closed, message failed");
            self.inner.fail_message(conversation_id, &key);
            return Err(e.into());
        }

        let inner = self.inner.clone();
        let timer_key = key.clone();
        let timeout = self.inner.echo_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.fail_message(conversation_id, &timer_key);
        });
        self.inner
            .lock()
            .echo_timers
            .insert(key.clone(), timer.abort_handle());

        debug!(conversation = %conversation_id, key = %key, "Message sent");
        Ok(key)
    }

    /// Report messages as read. The unread counter drops by the number of
    /// other people's messages that were still unread.
    pub fn mark_read(
        &self,
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    ) -> Result<(), ClientError> {
        let (views, unread) = self.inner.apply_read(conversation_id, &message_ids);
        for view in views {
            emit_update(&self.inner.updates, ClientUpdate::MessageUpdated(view));
        }
        if let Some(unread) = unread {
            emit_update(
                &self.inner.updates,
                ClientUpdate::UnreadChanged {
                    conversation_id,
                    unread,
                },
            );
        }
        self.inner.sink.emit(ClientEvent::MarkRead(ReadReceipt {
            conversation_id,
            message_ids,
        }))?;
        Ok(())
    }

    pub fn notify_typing(&self, conversation_id: ConversationId) -> Result<(), ClientError> {
        self.inner
            .sink
            .emit(ClientEvent::Typing(ConversationRef { conversation_id }))?;
        Ok(())
    }

    /// Subscribe to a conversation's typing and read notices.
    pub fn join_conversation(&self, conversation_id: ConversationId) -> Result<(), ClientError> {
        self.inner
            .sink
            .emit(ClientEvent::JoinConversationRoom(ConversationRef {
                conversation_id,
            }))?;
        Ok(())
    }

    pub fn query_presence(&self) -> Result<(), ClientError> {
        self.inner.sink.emit(ClientEvent::PresenceQuery)?;
        Ok(())
    }

    pub fn keep_alive(&self) -> Result<(), ClientError> {
        self.inner.sink.emit(ClientEvent::KeepAlive)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    /// Apply a server event. Returns `false` for events this component does
    /// not handle.
    pub fn handle_event(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::MessageSent(payload) => self.on_echo(payload),
            ServerEvent::MessageReceive(payload) => self.on_receive(payload),
            ServerEvent::ReadNotice(receipt) => self.on_read_notice(receipt),
            ServerEvent::Typing(notice) => self.on_typing(notice),
            ServerEvent::PresenceSnapshot(snapshot) => {
                let mut changes = Vec::new();
                {
                    let mut state = self.inner.lock();
                    state.presence.apply_snapshot(snapshot);
                    for user in &snapshot.online_user_ids {
                        changes.push((user.clone(), true, None));
                    }
                    for (user, seen) in &snapshot.last_seen_by_user_id {
                        changes.push((user.clone(), false, Some(*seen)));
                    }
                }
                for (user_id, online, last_seen) in changes {
                    emit_update(
                        &self.inner.updates,
                        ClientUpdate::PresenceChanged {
                            user_id,
                            online,
                            last_seen,
                        },
                    );
                }
            }
            ServerEvent::UserOnline(peer) => {
                if self.inner.lock().presence.set_online(&peer.peer_id) {
                    emit_update(
                        &self.inner.updates,
                        ClientUpdate::PresenceChanged {
                            user_id: peer.peer_id.clone(),
                            online: true,
                            last_seen: None,
                        },
                    );
                }
            }
            ServerEvent::UserOffline(offline) => {
                self.inner
                    .lock()
                    .presence
                    .set_offline(&offline.user_id, offline.last_seen);
                emit_update(
                    &self.inner.updates,
                    ClientUpdate::PresenceChanged {
                        user_id: offline.user_id.clone(),
                        online: false,
                        last_seen: Some(offline.last_seen),
                    },
                );
            }
            ServerEvent::Error(rejection) => self.on_rejection(rejection),
            _ => return false,
        }
        true
    }

    fn on_echo(&self, payload: &MessagePayload) {
        let Some(key) = &payload.idempotency_key else {
            self.on_receive(payload);
            return;
        };

        let (update, timer) = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let timer = state.echo_timers.remove(key);
            let conversation = state
                .conversations
                .entry(payload.conversation_id)
                .or_default();
            let update = if let Some(view) = conversation.timeline.confirm(payload) {
                Some(ClientUpdate::MessageUpdated(view.clone()))
            } else if conversation.timeline.append(payload) {
                // Sent from another of our devices.
                Some(ClientUpdate::MessageAdded(MessageView::from_payload(payload)))
            } else {
                None
            };
            (update, timer)
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(update) = update {
            debug!(key = %key, id = %payload.id, "Message confirmed");
            emit_update(&self.inner.updates, update);
        }
    }

    fn on_receive(&self, payload: &MessagePayload) {
        let (unread, stopped_typing) = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let conversation = state
                .conversations
                .entry(payload.conversation_id)
                .or_default();
            if !conversation.timeline.append(payload) {
                debug!(id = %payload.id, "Duplicate message ignored");
                return;
            }
            let unread = if payload.sender_id != self.inner.me {
                conversation.unread += 1;
                Some(conversation.unread)
            } else {
                None
            };
            let stopped_typing = conversation.typing.remove(&payload.sender_id);
            if let Some((_, timer)) = state
                .typing_timers
                .remove(&(payload.conversation_id, payload.sender_id.clone()))
            {
                timer.abort();
            }
            (unread, stopped_typing)
        };

        emit_update(
            &self.inner.updates,
            ClientUpdate::MessageAdded(MessageView::from_payload(payload)),
        );
        if let Some(unread) = unread {
            emit_update(
                &self.inner.updates,
                ClientUpdate::UnreadChanged {
                    conversation_id: payload.conversation_id,
                    unread,
                },
            );
        }
        if stopped_typing {
            emit_update(
                &self.inner.updates,
                ClientUpdate::TypingChanged {
                    conversation_id: payload.conversation_id,
                    user_id: payload.sender_id.clone(),
                    typing: false,
                },
            );
        }
    }

    /// Another connection in the room read these. When it was one of our
    /// own devices, our unread counter follows.
    fn on_read_notice(&self, receipt: &ReadReceipt) {
        let conversation_id = receipt.conversation_id;
        let (views, unread) = self.inner.apply_read(conversation_id, &receipt.message_ids);
        for view in views {
            emit_update(&self.inner.updates, ClientUpdate::MessageUpdated(view));
        }
        if let Some(unread) = unread {
            emit_update(
                &self.inner.updates,
                ClientUpdate::UnreadChanged {
                    conversation_id,
                    unread,
                },
            );
        }
    }

    fn on_typing(&self, notice: &TypingNotice) {
        if notice.user_id == self.inner.me {
            return;
        }
        let started = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let started = state
                .conversations
                .entry(notice.conversation_id)
                .or_default()
                .typing
                .insert(notice.user_id.clone());

            let slot = (notice.conversation_id, notice.user_id.clone());
            if let Some((_, previous)) = state.typing_timers.remove(&slot) {
                previous.abort();
            }
            state.typing_generation += 1;
            let generation = state.typing_generation;
            let inner = self.inner.clone();
            let expiry = self.inner.typing_expiry;
            let timer_slot = slot.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(expiry).await;
                inner.expire_typing(timer_slot, generation);
            });
            state
                .typing_timers
                .insert(slot, (generation, timer.abort_handle()));
            started
        };

        if started {
            emit_update(
                &self.inner.updates,
                ClientUpdate::TypingChanged {
                    conversation_id: notice.conversation_id,
                    user_id: notice.user_id.clone(),
                    typing: true,
                },
            );
        }
    }

    fn on_rejection(&self, rejection: &Rejection) {
        // A rejected send keeps waiting for its echo timeout.
        warn!(
            reason = ?rejection.reason,
            key = ?rejection.idempotency_key,
            "Server rejected event: {}",
            rejection.message
        );
        emit_update(
            &self.inner.updates,
            ClientUpdate::Rejected {
                reason: rejection.reason,
                idempotency_key: rejection.idempotency_key.clone(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<MessageView> {
        self.inner
            .lock()
            .conversations
            .get(&conversation_id)
            .map(|c| c.timeline.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn unread(&self, conversation_id: ConversationId) -> u32 {
        self.inner
            .lock()
            .conversations
            .get(&conversation_id)
            .map_or(0, |c| c.unread)
    }

    pub fn preview(&self, conversation_id: ConversationId) -> Option<ConversationPreview> {
        self.inner
            .lock()
            .conversations
            .get(&conversation_id)
            .and_then(|c| c.preview())
    }

    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .inner
            .lock()
            .conversations
            .get(&conversation_id)
            .map(|c| c.typing.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.inner.lock().presence.is_online(user)
    }

    pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.inner.lock().presence.last_seen(user)
    }
}

impl ChatInner {
    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `ids` read. Returns the changed messages and, when it moved, the
    /// new unread count.
    fn apply_read(
        &self,
        conversation_id: ConversationId,
        ids: &[MessageId],
    ) -> (Vec<MessageView>, Option<u32>) {
        let mut state = self.lock();
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return (Vec::new(), None);
        };
        let changed = conversation.timeline.mark_read(ids);
        let from_others = changed.iter().filter(|m| m.sender_id != self.me).count();
        let from_others = u32::try_from(from_others).unwrap_or(u32::MAX);
        if from_others == 0 || conversation.unread == 0 {
            return (changed, None);
        }
        conversation.unread = conversation.unread.saturating_sub(from_others);
        (changed, Some(conversation.unread))
    }

    fn fail_message(&self, conversation_id: ConversationId, key: &IdempotencyKey) {
        let failed = {
            let mut state = self.lock();
            state.echo_timers.remove(key);
            state
                .conversations
                .get_mut(&conversation_id)
                .and_then(|c| c.timeline.mark_failed(key).cloned())
        };
        if let Some(view) = failed {
            info!(key = %key, "No echo received, message failed");
            emit_update(&self.updates, ClientUpdate::MessageUpdated(view));
        }
    }

    fn expire_typing(&self, slot: (ConversationId, UserId), generation: u64) {
        let cleared = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.typing_timers.get(&slot) {
                Some((current, _)) if *current == generation => {
                    state.typing_timers.remove(&slot);
                }
                _ => return,
            }
            state
                .conversations
                .get_mut(&slot.0)
                .is_some_and(|c| c.typing.remove(&slot.1))
        };
        if cleared {
            emit_update(
                &self.updates,
                ClientUpdate::TypingChanged {
                    conversation_id: slot.0,
                    user_id: slot.1,
                    typing: false,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_shared::types::DeliveryState;
    use tokio::sync::mpsc;

    struct Rig {
        chat: ChatClient,
        sent: mpsc::UnboundedReceiver<ClientEvent>,
        updates: mpsc::UnboundedReceiver<ClientUpdate>,
    }

    fn rig(me: &str) -> Rig {
        let (sink, sent) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let chat = ChatClient::new(
            UserId::new(me),
            &ClientConfig::default(),
            Arc::new(sink),
            updates_tx,
        );
        Rig {
            chat,
            sent,
            updates,
        }
    }

    impl Rig {
        fn drain_updates(&mut self) -> Vec<ClientUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                out.push(update);
            }
            out
        }

        fn last_sent(&mut self) -> Option<ClientEvent> {
            let mut last = None;
            while let Ok(event) = self.sent.try_recv() {
                last = Some(event);
            }
            last
        }
    }

    fn echo_for(event: &ClientEvent, sender: &str) -> MessagePayload {
        match event {
            ClientEvent::SendMessage(send) => MessagePayload {
                id: MessageId::new(),
                conversation_id: send.conversation_id.unwrap(),
                sender_id: UserId::new(sender),
                body: send.body.clone(),
                created_at: Utc::now(),
                is_read: false,
                idempotency_key: Some(send.idempotency_key.clone()),
            },
            other => panic!("not a send: {other:?}"),
        }
    }

    fn incoming(conversation: ConversationId, sender: &str, body: &str) -> MessagePayload {
        MessagePayload {
            id: MessageId::new(),
            conversation_id: conversation,
            sender_id: UserId::new(sender),
            body: body.to_string(),
            created_at: Utc::now(),
            is_read: false,
            idempotency_key: None,
        }
    }

    fn typing_changes(updates: &[ClientUpdate]) -> Vec<bool> {
        updates
            .iter()
            .filter_map(|u| match u {
                ClientUpdate::TypingChanged { typing, .. } => Some(*typing),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn echo_leaves_exactly_one_message() {
        for echo_first in [true, false] {
            let mut rig = rig("alice");
            let conv = ConversationId::new();
            let key = rig.chat.send(conv, "  hi  ").unwrap();
            let event = rig.last_sent().unwrap();
            let echo = echo_for(&event, "alice");
            let other = incoming(conv, "bob", "yo");

            let order: Vec<ServerEvent> = if echo_first {
                vec![
                    ServerEvent::MessageSent(echo.clone()),
                    ServerEvent::MessageReceive(other.clone()),
                ]
            } else {
                vec![
                    ServerEvent::MessageReceive(other.clone()),
                    ServerEvent::MessageSent(echo.clone()),
                ]
            };
            for event in &order {
                assert!(rig.chat.handle_event(event));
            }

            let messages = rig.chat.messages(conv);
            let mine: Vec<_> = messages
                .iter()
                .filter(|m| m.idempotency_key.as_ref() == Some(&key))
                .collect();
            assert_eq!(mine.len(), 1);
            assert_eq!(mine[0].delivery, DeliveryState::Sent);
            assert_eq!(mine[0].id, Some(echo.id));
            assert_eq!(mine[0].body, "hi");
            assert_eq!(messages.len(), 2);
            assert_eq!(rig.chat.unread(conv), 1);

            // The echo timer was cancelled.
            tokio::time::sleep(Duration::from_secs(30)).await;
            let still_sent = rig
                .chat
                .messages(conv)
                .iter()
                .any(|m| m.idempotency_key.as_ref() == Some(&key) && m.delivery == DeliveryState::Sent);
            assert!(still_sent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_echo_fails_after_timeout() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        rig.chat.send(conv, "hello").unwrap();
        let event = rig.last_sent().unwrap();
        rig.drain_updates();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rig.chat.messages(conv)[0].delivery, DeliveryState::Sending);
        assert_eq!(
            rig.chat.preview(conv).unwrap().delivery,
            DeliveryState::Sending
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.chat.messages(conv)[0].delivery, DeliveryState::Failed);
        let updates = rig.drain_updates();
        assert!(matches!(
            updates.as_slice(),
            [ClientUpdate::MessageUpdated(view)] if view.delivery == DeliveryState::Failed
        ));

        // Nothing was resent.
        assert!(rig.last_sent().is_none());

        // The server did persist it after all.
        rig.chat
            .handle_event(&ServerEvent::MessageSent(echo_for(&event, "alice")));
        let messages = rig.chat.messages(conv);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery, DeliveryState::Sent);
    }

    #[tokio::test]
    async fn blank_messages_are_refused() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        assert!(matches!(
            rig.chat.send(conv, " \n\t "),
            Err(ClientError::EmptyBody)
        ));
        assert!(rig.last_sent().is_none());
        assert!(rig.chat.messages(conv).is_empty());
    }

    #[tokio::test]
    async fn closed_channel_fails_the_message_at_once() {
        let mut rig = rig("alice");
        rig.sent.close();
        let conv = ConversationId::new();
        assert!(matches!(
            rig.chat.send(conv, "hi"),
            Err(ClientError::Protocol(_))
        ));
        assert_eq!(rig.chat.messages(conv)[0].delivery, DeliveryState::Failed);
    }

    #[tokio::test]
    async fn received_messages_are_deduplicated_and_counted() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        let message = incoming(conv, "bob", "hey");
        rig.chat
            .handle_event(&ServerEvent::MessageReceive(message.clone()));
        rig.chat.handle_event(&ServerEvent::MessageReceive(message));
        assert_eq!(rig.chat.messages(conv).len(), 1);
        assert_eq!(rig.chat.unread(conv), 1);

        // Our own message from another device does not count as unread.
        let mine = MessagePayload {
            idempotency_key: Some(IdempotencyKey::generate()),
            ..incoming(conv, "alice", "from my phone")
        };
        rig.chat.handle_event(&ServerEvent::MessageSent(mine));
        assert_eq!(rig.chat.messages(conv).len(), 2);
        assert_eq!(rig.chat.unread(conv), 1);

        rig.drain_updates();
        let ids: Vec<MessageId> = rig
            .chat
            .messages(conv)
            .iter()
            .filter_map(|m| m.id)
            .collect();
        rig.chat.mark_read(conv, ids.clone()).unwrap();
        assert_eq!(rig.chat.unread(conv), 0);
        assert!(matches!(
            rig.last_sent(),
            Some(ClientEvent::MarkRead(receipt)) if receipt.message_ids == ids
        ));
    }

    #[tokio::test]
    async fn marking_some_messages_read_keeps_the_rest_unread() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        let messages: Vec<MessagePayload> = ["one", "two", "three"]
            .into_iter()
            .map(|body| incoming(conv, "bob", body))
            .collect();
        for message in &messages {
            rig.chat
                .handle_event(&ServerEvent::MessageReceive(message.clone()));
        }
        assert_eq!(rig.chat.unread(conv), 3);
        rig.drain_updates();

        rig.chat.mark_read(conv, vec![messages[0].id]).unwrap();
        assert_eq!(rig.chat.unread(conv), 2);
        assert!(rig
            .drain_updates()
            .iter()
            .any(|u| matches!(u, ClientUpdate::UnreadChanged { unread: 2, .. })));

        // Already read, or not ours to count.
        rig.chat
            .mark_read(conv, vec![messages[0].id, MessageId::new()])
            .unwrap();
        assert_eq!(rig.chat.unread(conv), 2);
        assert!(!rig
            .drain_updates()
            .iter()
            .any(|u| matches!(u, ClientUpdate::UnreadChanged { .. })));

        // Read on another of our devices.
        rig.chat.handle_event(&ServerEvent::ReadNotice(ReadReceipt {
            conversation_id: conv,
            message_ids: vec![messages[1].id],
        }));
        assert_eq!(rig.chat.unread(conv), 1);
    }

    #[tokio::test]
    async fn read_notices_update_messages() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        let message = incoming(conv, "bob", "hey");
        rig.chat
            .handle_event(&ServerEvent::MessageReceive(message.clone()));
        rig.drain_updates();

        rig.chat.handle_event(&ServerEvent::ReadNotice(ReadReceipt {
            conversation_id: conv,
            message_ids: vec![message.id],
        }));
        assert!(rig.chat.messages(conv)[0].is_read);
        let updates = rig.drain_updates();
        assert_eq!(
            updates
                .iter()
                .filter(|u| matches!(u, ClientUpdate::MessageUpdated(_)))
                .count(),
            1
        );
        assert_eq!(rig.chat.unread(conv), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_expires_unless_extended() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        let notice = ServerEvent::Typing(TypingNotice {
            conversation_id: conv,
            user_id: UserId::new("bob"),
        });

        rig.chat.handle_event(&notice);
        assert_eq!(rig.chat.typing_users(conv), vec![UserId::new("bob")]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        rig.chat.handle_event(&notice);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.chat.typing_users(conv), vec![UserId::new("bob")]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rig.chat.typing_users(conv).is_empty());
        assert_eq!(typing_changes(&rig.drain_updates()), vec![true, false]);

        // Our own typing echo is ignored.
        rig.chat.handle_event(&ServerEvent::Typing(TypingNotice {
            conversation_id: conv,
            user_id: UserId::new("alice"),
        }));
        assert!(rig.chat.typing_users(conv).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn message_from_typing_user_clears_indicator() {
        let mut rig = rig("alice");
        let conv = ConversationId::new();
        rig.chat.handle_event(&ServerEvent::Typing(TypingNotice {
            conversation_id: conv,
            user_id: UserId::new("bob"),
        }));
        rig.chat
            .handle_event(&ServerEvent::MessageReceive(incoming(conv, "bob", "done")));
        assert!(rig.chat.typing_users(conv).is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(typing_changes(&rig.drain_updates()), vec![true, false]);
    }

    #[tokio::test]
    async fn presence_events_update_the_view() {
        let rig = rig("alice");
        let bob = UserId::new("bob");
        let seen = Utc::now();

        rig.chat
            .handle_event(&ServerEvent::UserOnline(parlor_shared::protocol::PeerRef {
                peer_id: bob.clone(),
            }));
        assert!(rig.chat.is_online(&bob));

        rig.chat.handle_event(&ServerEvent::UserOffline(
            parlor_shared::protocol::UserOffline {
                user_id: bob.clone(),
                last_seen: seen,
            },
        ));
        assert!(!rig.chat.is_online(&bob));
        assert_eq!(rig.chat.last_seen(&bob), Some(seen));
    }

    #[tokio::test]
    async fn rejections_are_surfaced_and_call_events_ignored() {
        let mut rig = rig("alice");
        let key = IdempotencyKey::generate();
        rig.chat.handle_event(&ServerEvent::Error(
            Rejection::new(parlor_shared::protocol::RejectReason::NotParticipant)
                .with_key(key.clone()),
        ));
        assert!(matches!(
            rig.drain_updates().as_slice(),
            [ClientUpdate::Rejected { idempotency_key: Some(k), .. }] if *k == key
        ));

        assert!(!rig.chat.handle_event(&ServerEvent::CallEnded(
            parlor_shared::protocol::PeerRef {
                peer_id: UserId::new("bob"),
            }
        )));
    }
}
