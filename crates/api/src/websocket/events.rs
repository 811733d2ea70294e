//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization. Every frame is a JSON object whose
//! `type` field selects the variant; payload fields are camelCase.

use jotter_shared::{
    ChatError, ConversationId, FriendRequest, Message, MessageStatus,
    Notification as NotificationRecord, UserIdentity,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Send a chat message to a friend
    SendMessage {
        receiver_id: Uuid,
        #[serde(default)]
        content: String,
        note_id: Option<Uuid>,
        image_id: Option<String>,
        /// Client-side id echoed back on acknowledgment
        temp_id: Option<String>,
    },

    /// Fetch a conversation's history, addressed by id or by peer
    FetchHistory {
        conversation_id: Option<String>,
        peer_id: Option<Uuid>,
    },

    /// Read receipt
    MarkRead { message_id: Uuid },

    /// Delivery receipt
    MarkDelivered { message_id: Uuid },

    /// Ask another user to become friends
    FriendRequest { target_id: Uuid },

    /// Accept or decline an incoming friend request
    FriendRespond { request_id: Uuid, accept: bool },

    /// Typing indicator for a 1:1 conversation
    Typing { peer_id: Uuid, is_typing: bool },

    /// Opaque call-signaling payload relayed to a friend
    Signal {
        peer_id: Uuid,
        payload: serde_json::Value,
    },

    /// Heartbeat ping to keep connection alive
    Ping,
}

/// Validated address of a history request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryTarget {
    Conversation(ConversationId),
    Peer(Uuid),
}

impl ClientEvent {
    /// Client reconciliation id carried by the event, if any
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            ClientEvent::SendMessage { temp_id, .. } => temp_id.as_deref(),
            _ => None,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::FetchHistory { .. } => "fetch_history",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::MarkDelivered { .. } => "mark_delivered",
            ClientEvent::FriendRequest { .. } => "friend_request",
            ClientEvent::FriendRespond { .. } => "friend_respond",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::Signal { .. } => "signal",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Exactly one of `conversation_id` / `peer_id` must be present
pub fn history_target(
    conversation_id: Option<String>,
    peer_id: Option<Uuid>,
) -> Result<HistoryTarget, ChatError> {
    match (conversation_id, peer_id) {
        (Some(raw), None) if !raw.trim().is_empty() => {
            Ok(HistoryTarget::Conversation(ConversationId::from_raw(raw.trim())))
        }
        (None, Some(peer_id)) => Ok(HistoryTarget::Peer(peer_id)),
        (Some(_), Some(_)) => Err(ChatError::Validation(
            "fetch_history takes either conversationId or peerId, not both".to_string(),
        )),
        _ => Err(ChatError::Validation(
            "fetch_history requires conversationId or peerId".to_string(),
        )),
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected {
        session_id: Uuid,
        user_id: Uuid,
        unread_notifications: i64,
    },

    /// A message arrived in one of the user's conversations
    MessageReceived {
        conversation_id: ConversationId,
        message: Message,
    },

    /// The originating connection's message was persisted
    MessageSentAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        message: Message,
    },

    /// Delivery/read status of a message changed
    #[serde(rename = "message_status")]
    StatusUpdate {
        message_id: Uuid,
        status: MessageStatus,
        #[serde(with = "time::serde::rfc3339::option")]
        read_at: Option<OffsetDateTime>,
    },

    /// Reply to fetch_history
    History {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },

    /// A friend came online
    PeerOnline { user_id: Uuid },

    /// A friend's last connection closed
    PeerOffline {
        user_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        last_seen: OffsetDateTime,
    },

    /// Friends online at connect time
    PresenceSnapshot { online_friends: Vec<Uuid> },

    /// Notification pushed live
    Notification { notification: NotificationRecord },

    /// Someone sent this user a friend request
    FriendRequestIncoming {
        request: FriendRequest,
        from: PeerSummary,
    },

    /// The originating connection's friend request was recorded
    FriendRequestSent { request: FriendRequest },

    /// A friend request was accepted or declined
    FriendResponse { request: FriendRequest, accepted: bool },

    /// Typing indicator from a friend
    PeerTyping { user_id: Uuid, is_typing: bool },

    /// Relayed call-signaling payload
    Signal {
        from_user_id: Uuid,
        payload: serde_json::Value,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl ServerEvent {
    /// Error event for a failed operation
    pub fn from_error(err: &ChatError, temp_id: Option<String>) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.client_message(),
            temp_id,
        }
    }

    pub fn status_update(message: &Message) -> Self {
        ServerEvent::StatusUpdate {
            message_id: message.id,
            status: message.status,
            read_at: message.read_at,
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Public view of a user attached to friend events
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
}

impl From<&UserIdentity> for PeerSummary {
    fn from(user: &UserIdentity) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}
