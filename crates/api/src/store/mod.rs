//! External collaborators consumed by the realtime core
//!
//! Each collaborator is a trait so the services can be driven by Postgres in
//! production and by the in-memory implementation in tests.
//!
//! - **UserDirectory**: identities, presence flag, legacy friend list
//! - **MessageStore**: durable, ordered message log per conversation
//! - **FriendshipStore**: friend requests and accepted relationships
//! - **NotificationStore**: notification records and unread counts

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use jotter_shared::{
    ChatResult, ConversationId, FriendRequest, FriendshipStatus, Message, MessageStatus,
    Notification, UserIdentity,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> ChatResult<Option<UserIdentity>>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> ChatResult<Option<UserIdentity>>;

    async fn set_presence(&self, user_id: Uuid, online: bool, last_seen: OffsetDateTime) -> ChatResult<()>;

    /// Friend ids embedded on the user record (legacy fallback source)
    async fn embedded_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>>;

    async fn health_check(&self) -> ChatResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> ChatResult<()>;

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>>;

    /// Messages of a conversation ordered by `(created_at, id)` ascending
    async fn list_conversation(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>>;

    /// Atomically advance a message's status.
    ///
    /// Returns the updated message only if the stored status was strictly
    /// behind `status`; `None` means nothing changed.
    async fn advance_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: OffsetDateTime,
    ) -> ChatResult<Option<Message>>;
}

#[async_trait]
pub trait FriendshipStore: Send + Sync {
    /// Insert a new request. Returns `false` without inserting when the pair
    /// already has a pending or accepted record, in either direction.
    async fn create_request(&self, request: &FriendRequest) -> ChatResult<bool>;

    async fn get_request(&self, request_id: Uuid) -> ChatResult<Option<FriendRequest>>;

    /// Most recent pending or accepted request between two users, either direction
    async fn find_between(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Option<FriendRequest>>;

    /// Move a pending request to `status`.
    ///
    /// Returns `Some` only when this call performed the transition, which makes
    /// concurrent or repeated responses idempotent.
    async fn respond(
        &self,
        request_id: Uuid,
        status: FriendshipStatus,
        conversation_id: Option<&ConversationId>,
        at: OffsetDateTime,
    ) -> ChatResult<Option<FriendRequest>>;

    async fn set_conversation_id(&self, request_id: Uuid, conversation_id: &ConversationId) -> ChatResult<()>;

    /// Users with an accepted relationship to `user_id`
    async fn accepted_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, notification: &Notification) -> ChatResult<()>;

    async fn unread_count(&self, user_id: Uuid) -> ChatResult<i64>;
}

/// Bundle of collaborators handed to the chat services
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub friendships: Arc<dyn FriendshipStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    /// Use one backend for every collaborator
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: UserDirectory + MessageStore + FriendshipStore + NotificationStore + 'static,
    {
        Self {
            users: backend.clone(),
            messages: backend.clone(),
            friendships: backend.clone(),
            notifications: backend,
        }
    }
}
