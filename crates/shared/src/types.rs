//! Common types used across Jotter's realtime core

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Conversation Keys
// =============================================================================

/// Separator between the two participant emails of a conversation id
pub const CONVERSATION_SEPARATOR: char = ':';

/// Normalize an email for identity comparisons (trimmed, lower-cased)
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Deterministic key of the 1:1 thread between two users.
///
/// Built from both participants' normalized emails, sorted and joined with
/// [`CONVERSATION_SEPARATOR`], so either side computes the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Compute the conversation id for two emails (argument order is irrelevant)
    pub fn between(email_a: &str, email_b: &str) -> Self {
        let a = normalize_email(email_a);
        let b = normalize_email(email_b);
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}{CONVERSATION_SEPARATOR}{second}"))
    }

    /// Wrap a raw key received from a client or a legacy record
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participant emails embedded in the id, if it is well-formed.
    ///
    /// The separator is the first `:` after the first `@`, so a quoted local
    /// part may contain `:`. Domain literals containing `:` are not supported.
    pub fn participants(&self) -> Option<(&str, &str)> {
        let at = self.0.find('@')?;
        let split = at + self.0[at..].find(CONVERSATION_SEPARATOR)?;
        let a = &self.0[..split];
        let b = &self.0[split + CONVERSATION_SEPARATOR.len_utf8()..];
        if a.is_empty() || b.is_empty() || !a.contains('@') || !b.contains('@') {
            return None;
        }
        Some((a, b))
    }

    /// Whether `email` is one of the two participants
    pub fn includes(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.participants()
            .map(|(a, b)| a == email || b == email)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Delivery status of a message. Only ever advances `sent → delivered → read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Sent
    }
}

impl MessageStatus {
    /// Position in the delivery lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    /// True if moving to `next` is a forward transition
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// State of a friend request / relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
}

impl Default for FriendshipStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

/// Kind of notification produced by the realtime core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
    FriendAccepted,
    FriendDeclined,
    NewMessage,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FriendRequest => write!(f, "friend_request"),
            Self::FriendAccepted => write!(f, "friend_accepted"),
            Self::FriendDeclined => write!(f, "friend_declined"),
            Self::NewMessage => write!(f, "new_message"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// User as seen by the realtime core (owned by the user directory)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
}

/// Persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

/// Friend request; once accepted it doubles as the friendship record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub status: FriendshipStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub responded_at: Option<OffsetDateTime>,
}

impl FriendRequest {
    /// Whether `user_id` is one of the two sides of this request
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.recipient_id == user_id
    }

    /// The other side of the request, from `user_id`'s point of view
    pub fn other_party(&self, user_id: Uuid) -> Uuid {
        if self.requester_id == user_id {
            self.recipient_id
        } else {
            self.requester_id
        }
    }
}

/// Notification record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
