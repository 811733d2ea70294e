//! In-memory collaborator backend
//!
//! Process-local implementation of every store trait, used by tests and local
//! experiments. `set_unavailable(true)` makes every call fail with
//! `StoreUnavailable` to exercise outage handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use jotter_shared::{
    normalize_email, ChatError, ChatResult, ConversationId, FriendRequest, FriendshipStatus,
    Message, MessageStatus, Notification, UserIdentity,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{FriendshipStore, MessageStore, NotificationStore, UserDirectory};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, UserIdentity>,
    embedded_friends: HashMap<Uuid, Vec<Uuid>>,
    messages: Vec<Message>,
    friend_requests: Vec<FriendRequest>,
    notifications: Vec<Notification>,
}

/// In-memory store implementing all collaborator traits
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// Add an active, offline user
    pub async fn add_user(&self, email: &str, display_name: &str) -> UserIdentity {
        let user = UserIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            is_active: true,
            is_online: false,
            last_seen_at: None,
        };
        self.state.write().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn deactivate_user(&self, user_id: Uuid) {
        if let Some(user) = self.state.write().await.users.get_mut(&user_id) {
            user.is_active = false;
        }
    }

    /// Record an accepted relationship with no conversation id assigned yet
    pub async fn add_friendship(&self, requester_id: Uuid, recipient_id: Uuid) -> FriendRequest {
        let now = OffsetDateTime::now_utc();
        let request = FriendRequest {
            id: Uuid::new_v4(),
            requester_id,
            recipient_id,
            status: FriendshipStatus::Accepted,
            conversation_id: None,
            created_at: now,
            responded_at: Some(now),
        };
        self.state.write().await.friend_requests.push(request.clone());
        request
    }

    /// Insert a request record as-is, skipping the live-pair check.
    /// Models rows written before the pair index existed.
    pub async fn seed_request(&self, request: FriendRequest) {
        self.state.write().await.friend_requests.push(request);
    }

    /// Replace a user's legacy embedded friend list
    pub async fn set_embedded_friends(&self, user_id: Uuid, friend_ids: Vec<Uuid>) {
        self.state.write().await.embedded_friends.insert(user_id, friend_ids);
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.state
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> ChatResult<Option<UserIdentity>> {
        self.check_available()?;
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> ChatResult<Option<UserIdentity>> {
        self.check_available()?;
        let email = normalize_email(email);
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| normalize_email(&u.email) == email)
            .cloned())
    }

    async fn set_presence(&self, user_id: Uuid, online: bool, last_seen: OffsetDateTime) -> ChatResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| ChatError::NotFound(format!("user {user_id}")))?;
        user.is_online = online;
        user.last_seen_at = Some(last_seen);
        Ok(())
    }

    async fn embedded_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .embedded_friends
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> ChatResult<()> {
        self.check_available()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> ChatResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(ChatError::Conflict(format!("message {} already exists", message.id)));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn list_conversation(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        self.check_available()?;
        let mut messages: Vec<Message> = self
            .state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn advance_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: OffsetDateTime,
    ) -> ChatResult<Option<Message>> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(None);
        };
        if !message.status.can_advance_to(status) {
            return Ok(None);
        }
        message.status = status;
        if status == MessageStatus::Read {
            message.read_at = Some(at);
        }
        Ok(Some(message.clone()))
    }
}

#[async_trait]
impl FriendshipStore for MemoryStore {
    async fn create_request(&self, request: &FriendRequest) -> ChatResult<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let live_pair = state.friend_requests.iter().any(|r| {
            r.involves(request.requester_id)
                && r.involves(request.recipient_id)
                && r.status != FriendshipStatus::Declined
        });
        if live_pair {
            return Ok(false);
        }
        state.friend_requests.push(request.clone());
        Ok(true)
    }

    async fn get_request(&self, request_id: Uuid) -> ChatResult<Option<FriendRequest>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .friend_requests
            .iter()
            .find(|r| r.id == request_id)
            .cloned())
    }

    async fn find_between(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Option<FriendRequest>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .friend_requests
            .iter()
            .filter(|r| r.involves(user_a) && r.involves(user_b))
            .filter(|r| r.status != FriendshipStatus::Declined)
            .max_by_key(|r| (r.status == FriendshipStatus::Accepted, r.created_at))
            .cloned())
    }

    async fn respond(
        &self,
        request_id: Uuid,
        status: FriendshipStatus,
        conversation_id: Option<&ConversationId>,
        at: OffsetDateTime,
    ) -> ChatResult<Option<FriendRequest>> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(request) = state
            .friend_requests
            .iter_mut()
            .find(|r| r.id == request_id && r.status == FriendshipStatus::Pending)
        else {
            return Ok(None);
        };
        request.status = status;
        request.responded_at = Some(at);
        if let Some(conversation_id) = conversation_id {
            request.conversation_id = Some(conversation_id.clone());
        }
        Ok(Some(request.clone()))
    }

    async fn set_conversation_id(&self, request_id: Uuid, conversation_id: &ConversationId) -> ChatResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let request = state
            .friend_requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| ChatError::NotFound(format!("friend request {request_id}")))?;
        request.conversation_id = Some(conversation_id.clone());
        Ok(())
    }

    async fn accepted_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .friend_requests
            .iter()
            .filter(|r| r.status == FriendshipStatus::Accepted && r.involves(user_id))
            .map(|r| r.other_party(user_id))
            .collect())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, notification: &Notification) -> ChatResult<()> {
        self.check_available()?;
        self.state.write().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn unread_count(&self, user_id: Uuid) -> ChatResult<i64> {
        self.check_available()?;
        let count = self
            .state
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count();
        Ok(count as i64)
    }
}
