//! Server half of message delivery: validate, persist, fan out, echo.

use std::sync::Arc;

use tracing::{debug, error, warn};

use parlor_shared::protocol::{
    ConversationRef, ReadReceipt, RejectReason, Rejection, SendMessage, ServerEvent, TypingNotice,
};
use parlor_shared::types::{ConnectionId, UserId};
use parlor_store::{ChatStore, NewMessage, PersistedMessage};

use crate::hub::Hub;

pub struct MessagePipeline {
    hub: Arc<Hub>,
    store: Arc<dyn ChatStore>,
}

impl MessagePipeline {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn ChatStore>) -> Self {
        Self { hub, store }
    }

    /// Handle one `send-message`. On success the persisted record has been
    /// delivered as `message-receive` to every other participant and as
    /// `message-sent` to all of the sender's connections.
    pub async fn send(
        &self,
        sender: &UserId,
        request: SendMessage,
    ) -> Result<PersistedMessage, Rejection> {
        let key = request.idempotency_key.clone();
        let reject = |reason: RejectReason| Rejection::new(reason).with_key(key.clone());

        let conversation_id = request
            .conversation_id
            .ok_or_else(|| reject(RejectReason::MissingConversation))?;
        if request.body.trim().is_empty() {
            return Err(reject(RejectReason::EmptyBody));
        }

        let participants = self.store.participants(conversation_id).await.map_err(|e| {
            error!(conversation = %conversation_id, error = %e, "participant lookup failed");
            reject(RejectReason::PersistFailed)
        })?;
        if !participants.contains(sender) {
            return Err(reject(RejectReason::NotParticipant));
        }

        let persisted = self
            .store
            .create_message(NewMessage {
                conversation_id,
                sender_id: sender.clone(),
                body: request.body,
                idempotency_key: Some(key.clone()),
            })
            .await
            .map_err(|e| {
                error!(conversation = %conversation_id, key = %key, error = %e, "failed to persist message");
                reject(RejectReason::PersistFailed)
            })?;

        let payload = persisted.to_payload();
        let receive = ServerEvent::MessageReceive(payload.without_key());
        for participant in participants.iter().filter(|p| *p != sender) {
            self.hub.send_to_user(participant, receive.clone()).await;
        }
        self.hub
            .send_to_user(sender, ServerEvent::MessageSent(payload))
            .await;

        debug!(
            conversation = %conversation_id,
            message = %persisted.id,
            sender = %sender.short(),
            "message delivered"
        );

        if let Err(e) = self.store.touch_conversation(conversation_id).await {
            warn!(conversation = %conversation_id, error = %e, "failed to touch conversation");
        }
        Ok(persisted)
    }

    /// Mark a batch read and tell the rest of the conversation room.
    pub async fn mark_read(
        &self,
        origin: ConnectionId,
        reader: &UserId,
        receipt: ReadReceipt,
    ) -> Result<usize, Rejection> {
        self.require_participant(receipt.conversation_id, reader)
            .await?;

        let updated = self
            .store
            .mark_read(receipt.conversation_id, &receipt.message_ids)
            .await
            .map_err(|e| {
                error!(conversation = %receipt.conversation_id, error = %e, "failed to mark read");
                Rejection::new(RejectReason::PersistFailed)
            })?;

        self.hub
            .send_to_room_except(
                receipt.conversation_id,
                origin,
                ServerEvent::ReadNotice(receipt),
            )
            .await;
        Ok(updated)
    }

    /// Relay a typing notice to the conversation room. The origin must have
    /// joined the room.
    pub async fn typing(
        &self,
        origin: ConnectionId,
        typist: &UserId,
        target: ConversationRef,
    ) -> Result<(), Rejection> {
        if !self.hub.in_room(origin, target.conversation_id).await {
            return Err(Rejection::new(RejectReason::NotParticipant));
        }
        self.hub
            .send_to_room_except(
                target.conversation_id,
                origin,
                ServerEvent::Typing(TypingNotice {
                    conversation_id: target.conversation_id,
                    user_id: typist.clone(),
                }),
            )
            .await;
        Ok(())
    }

    pub async fn join_room(
        &self,
        origin: ConnectionId,
        user: &UserId,
        target: ConversationRef,
    ) -> Result<(), Rejection> {
        self.require_participant(target.conversation_id, user)
            .await?;
        self.hub.join_room(origin, target.conversation_id).await;
        Ok(())
    }

    async fn require_participant(
        &self,
        conversation: parlor_shared::types::ConversationId,
        user: &UserId,
    ) -> Result<(), Rejection> {
        match self.store.is_participant(conversation, user).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Rejection::new(RejectReason::NotParticipant)),
            Err(e) => {
                error!(conversation = %conversation, error = %e, "participant lookup failed");
                Err(Rejection::new(RejectReason::PersistFailed))
            }
        }
    }
}
