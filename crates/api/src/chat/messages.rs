//! Message service
//!
//! Sending persists before any push, so a receiver who is offline recovers the
//! message from history (store-and-forward). Message timestamps come from a
//! process-wide strictly increasing clock taken on arrival; together with the
//! id tie-break in history queries this gives every conversation a
//! deterministic total order.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use jotter_shared::{
    ChatError, ChatResult, ConversationId, Message, MessageStatus, NotificationKind, UserIdentity,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::conversation::ConversationResolver;
use super::notifications::NotificationRelay;
use crate::store::MessageStore;
use crate::websocket::events::HistoryTarget;
use crate::websocket::{ConnectionRegistry, ServerEvent};

/// Message as submitted by a client
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub receiver_id: Uuid,
    pub content: String,
    pub note_id: Option<Uuid>,
    pub image_id: Option<String>,
}

/// Result of a delivery or read receipt
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptOutcome {
    /// Status moved forward; watchers have been told
    Updated(Message),
    /// Already at or past the requested status
    Unchanged(Message),
    /// Requester is not the receiver; nothing happened
    Ignored,
}

/// Strictly increasing wall clock with microsecond resolution
#[derive(Debug, Default)]
struct MessageClock {
    last_micros: AtomicI64,
}

impl MessageClock {
    fn next(&self) -> OffsetDateTime {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64;
        let mut last = self.last_micros.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last_micros
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return OffsetDateTime::from_unix_timestamp_nanos(i128::from(candidate) * 1_000)
                        .unwrap_or_else(|_| OffsetDateTime::now_utc());
                }
                Err(actual) => last = actual,
            }
        }
    }
}

pub struct MessageService {
    messages: Arc<dyn MessageStore>,
    resolver: Arc<ConversationResolver>,
    notifications: Arc<NotificationRelay>,
    registry: Arc<ConnectionRegistry>,
    max_length: usize,
    clock: MessageClock,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        resolver: Arc<ConversationResolver>,
        notifications: Arc<NotificationRelay>,
        registry: Arc<ConnectionRegistry>,
        max_length: usize,
    ) -> Self {
        Self {
            messages,
            resolver,
            notifications,
            registry,
            max_length,
            clock: MessageClock::default(),
        }
    }

    /// Persist a message and fan it out.
    ///
    /// The receiver's connections and the sender's other connections get
    /// `message_received`; `origin_session` is excluded because it receives
    /// the acknowledgment instead.
    pub async fn send(
        &self,
        sender: &UserIdentity,
        origin_session: Option<Uuid>,
        draft: NewMessage,
    ) -> ChatResult<Message> {
        let created_at = self.clock.next();

        if draft.content.trim().is_empty() && draft.note_id.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        if draft.content.chars().count() > self.max_length {
            return Err(ChatError::Validation(format!(
                "message exceeds {} characters",
                self.max_length
            )));
        }
        if draft.receiver_id == sender.id {
            return Err(ChatError::SelfReference);
        }

        let receiver = self.resolver.require_user(draft.receiver_id).await?;
        let conversation_id = self.resolver.resolve_between(sender, &receiver).await?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.clone(),
            sender_id: sender.id,
            receiver_id: receiver.id,
            content: draft.content,
            note_id: draft.note_id,
            image_id: draft.image_id,
            status: MessageStatus::Sent,
            created_at,
            read_at: None,
        };

        self.messages.insert_message(&message).await?;

        tracing::info!(
            message_id = %message.id,
            sender_id = %sender.id,
            receiver_id = %receiver.id,
            conversation_id = %conversation_id,
            "Message stored"
        );

        let preview = if message.note_id.is_some() && message.content.trim().is_empty() {
            format!("{} shared a note with you", sender.display_name)
        } else {
            format!("New message from {}", sender.display_name)
        };
        if let Err(e) = self
            .notifications
            .notify(
                receiver.id,
                NotificationKind::NewMessage,
                preview,
                Some(conversation_id.to_string()),
                Some(sender.id),
            )
            .await
        {
            tracing::warn!(error = %e, message_id = %message.id, "Failed to create message notification");
        }

        let received = ServerEvent::MessageReceived {
            conversation_id,
            message: message.clone(),
        };
        self.registry.send_to_user(receiver.id, received.clone());
        match origin_session {
            Some(session_id) => self.registry.send_to_user_except(sender.id, session_id, received),
            None => self.registry.send_to_user(sender.id, received),
        };

        Ok(message)
    }

    /// Messages of a conversation in ascending `(created_at, id)` order
    pub async fn fetch_history(
        &self,
        requester: &UserIdentity,
        target: HistoryTarget,
    ) -> ChatResult<(ConversationId, Vec<Message>)> {
        let conversation_id = match target {
            HistoryTarget::Conversation(id) => self.resolver.authorize_participant(&id, requester)?,
            HistoryTarget::Peer(peer_id) => {
                if peer_id == requester.id {
                    return Err(ChatError::SelfReference);
                }
                let peer = self.resolver.require_user(peer_id).await?;
                self.resolver.resolve_between(requester, &peer).await?
            }
        };

        let messages = self.messages.list_conversation(&conversation_id).await?;
        tracing::debug!(
            user_id = %requester.id,
            conversation_id = %conversation_id,
            count = messages.len(),
            "History fetched"
        );
        Ok((conversation_id, messages))
    }

    /// Read receipt from the receiver
    pub async fn mark_read(&self, requester_id: Uuid, message_id: Uuid) -> ChatResult<ReceiptOutcome> {
        self.advance(requester_id, message_id, MessageStatus::Read).await
    }

    /// Delivery receipt from the receiver's client
    pub async fn mark_delivered(&self, requester_id: Uuid, message_id: Uuid) -> ChatResult<ReceiptOutcome> {
        self.advance(requester_id, message_id, MessageStatus::Delivered).await
    }

    async fn advance(
        &self,
        requester_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> ChatResult<ReceiptOutcome> {
        let message = self
            .messages
            .get_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;

        if message.receiver_id != requester_id {
            tracing::debug!(
                message_id = %message_id,
                user_id = %requester_id,
                status = %status,
                "Ignoring receipt from non-receiver"
            );
            return Ok(ReceiptOutcome::Ignored);
        }

        let Some(updated) = self
            .messages
            .advance_status(message_id, status, OffsetDateTime::now_utc())
            .await?
        else {
            let current = self.messages.get_message(message_id).await?.unwrap_or(message);
            return Ok(ReceiptOutcome::Unchanged(current));
        };

        let event = ServerEvent::status_update(&updated);
        self.registry.send_to_user(updated.sender_id, event.clone());
        if status == MessageStatus::Read {
            // Keep the reader's other devices in sync
            self.registry.send_to_user(updated.receiver_id, event);
        }

        tracing::debug!(message_id = %message_id, status = %status, "Message status advanced");
        Ok(ReceiptOutcome::Updated(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MessageClock::default();
        let mut previous = clock.next();
        for _ in 0..10_000 {
            let next = clock.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_clock_has_microsecond_resolution() {
        let clock = MessageClock::default();
        let stamp = clock.next();
        assert_eq!(stamp.nanosecond() % 1_000, 0);
    }

    #[tokio::test]
    async fn test_clock_across_threads() {
        let clock = Arc::new(MessageClock::default());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = Arc::clone(&clock);
            handles.push(tokio::spawn(async move {
                (0..500).map(|_| clock.next()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
