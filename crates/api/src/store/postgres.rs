//! Postgres-backed collaborators

use async_trait::async_trait;
use jotter_shared::{
    ChatError, ChatResult, ConversationId, FriendRequest, FriendshipStatus, Message,
    MessageStatus, Notification, UserIdentity,
};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{FriendshipStore, MessageStore, NotificationStore, UserDirectory};

const USER_COLUMNS: &str = "id, email, display_name, is_active, is_online, last_seen_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, note_id, \
                               image_id, status, created_at, read_at";

const REQUEST_COLUMNS: &str =
    "id, requester_id, recipient_id, status, conversation_id, created_at, responded_at";

/// All collaborators over a single connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// User Directory
// =============================================================================

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_user(&self, user_id: Uuid) -> ChatResult<Option<UserIdentity>> {
        let user = sqlx::query_as::<_, UserIdentity>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> ChatResult<Option<UserIdentity>> {
        let user = sqlx::query_as::<_, UserIdentity>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER(TRIM($1))"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn set_presence(&self, user_id: Uuid, online: bool, last_seen: OffsetDateTime) -> ChatResult<()> {
        let result = sqlx::query("UPDATE users SET is_online = $2, last_seen_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(online)
            .bind(last_seen)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn embedded_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let ids: Option<Vec<Uuid>> = sqlx::query_scalar("SELECT friend_ids FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ids.unwrap_or_default())
    }

    async fn health_check(&self) -> ChatResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Message Store
// =============================================================================

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, message: &Message) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content,
                                  note_id, image_id, status, created_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id.as_str())
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.note_id)
        .bind(message.image_id.as_deref())
        .bind(message.status)
        .bind(message.created_at)
        .bind(message.read_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> ChatResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_conversation(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn advance_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: OffsetDateTime,
    ) -> ChatResult<Option<Message>> {
        // The rank guard makes the update a no-op for equal or later statuses,
        // so concurrent read receipts produce a single transition.
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            UPDATE messages
            SET status = $2,
                read_at = CASE WHEN $2 = 'read' THEN $3 ELSE read_at END
            WHERE id = $1
              AND (CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END) < $4
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message_id)
        .bind(status)
        .bind(at)
        .bind(i32::from(status.rank()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }
}

// =============================================================================
// Friendship Store
// =============================================================================

#[async_trait]
impl FriendshipStore for PgStore {
    async fn create_request(&self, request: &FriendRequest) -> ChatResult<bool> {
        // friend_requests_live_pair_idx turns a duplicate live pair into a no-op
        let result = sqlx::query(
            r#"
            INSERT INTO friend_requests (id, requester_id, recipient_id, status,
                                         conversation_id, created_at, responded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(request.requester_id)
        .bind(request.recipient_id)
        .bind(request.status)
        .bind(request.conversation_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(request.created_at)
        .bind(request.responded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_request(&self, request_id: Uuid) -> ChatResult<Option<FriendRequest>> {
        let request = sqlx::query_as::<_, FriendRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn find_between(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Option<FriendRequest>> {
        let request = sqlx::query_as::<_, FriendRequest>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM friend_requests
            WHERE ((requester_id = $1 AND recipient_id = $2)
                OR (requester_id = $2 AND recipient_id = $1))
              AND status <> 'declined'
            ORDER BY (status = 'accepted') DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn respond(
        &self,
        request_id: Uuid,
        status: FriendshipStatus,
        conversation_id: Option<&ConversationId>,
        at: OffsetDateTime,
    ) -> ChatResult<Option<FriendRequest>> {
        let request = sqlx::query_as::<_, FriendRequest>(&format!(
            r#"
            UPDATE friend_requests
            SET status = $2,
                responded_at = $3,
                conversation_id = COALESCE($4, conversation_id)
            WHERE id = $1 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request_id)
        .bind(status)
        .bind(at)
        .bind(conversation_id.map(|c| c.as_str().to_string()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn set_conversation_id(&self, request_id: Uuid, conversation_id: &ConversationId) -> ChatResult<()> {
        sqlx::query("UPDATE friend_requests SET conversation_id = $2 WHERE id = $1")
            .bind(request_id)
            .bind(conversation_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn accepted_friend_ids(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT CASE WHEN requester_id = $1 THEN recipient_id ELSE requester_id END
            FROM friend_requests
            WHERE status = 'accepted' AND (requester_id = $1 OR recipient_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

// =============================================================================
// Notification Store
// =============================================================================

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(&self, notification: &Notification) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, message, reference, actor_id, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.kind)
        .bind(&notification.message)
        .bind(notification.reference.as_deref())
        .bind(notification.actor_id)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unread_count(&self, user_id: Uuid) -> ChatResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
