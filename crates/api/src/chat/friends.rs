//! Friend requests
//!
//! A request is created `pending` and transitions at most once. The store's
//! conditional update decides which of several concurrent responses wins; the
//! losers observe the settled record and emit nothing.

use std::sync::Arc;

use jotter_shared::{
    ChatError, ChatResult, ConversationId, FriendRequest, FriendshipStatus, NotificationKind,
    UserIdentity,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::conversation::ConversationResolver;
use super::notifications::NotificationRelay;
use crate::store::FriendshipStore;
use crate::websocket::events::PeerSummary;
use crate::websocket::{ConnectionRegistry, ServerEvent};

pub struct FriendService {
    friendships: Arc<dyn FriendshipStore>,
    resolver: Arc<ConversationResolver>,
    notifications: Arc<NotificationRelay>,
    registry: Arc<ConnectionRegistry>,
}

impl FriendService {
    pub fn new(
        friendships: Arc<dyn FriendshipStore>,
        resolver: Arc<ConversationResolver>,
        notifications: Arc<NotificationRelay>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            friendships,
            resolver,
            notifications,
            registry,
        }
    }

    /// Ask `target_id` to become friends with `requester`.
    ///
    /// A pending request between the two, in either direction, is returned
    /// unchanged instead of creating a duplicate.
    pub async fn request(&self, requester: &UserIdentity, target_id: Uuid) -> ChatResult<FriendRequest> {
        if target_id == requester.id {
            return Err(ChatError::SelfReference);
        }

        let target = self.resolver.require_user(target_id).await?;
        if !target.is_active {
            return Err(ChatError::NotFound(format!("user {target_id}")));
        }

        if let Some(existing) = self.friendships.find_between(requester.id, target.id).await? {
            return existing_pair_outcome(existing);
        }
        if self.resolver.are_friends(requester.id, target.id).await? {
            return Err(ChatError::Conflict("already friends".to_string()));
        }

        let request = FriendRequest {
            id: Uuid::new_v4(),
            requester_id: requester.id,
            recipient_id: target.id,
            status: FriendshipStatus::Pending,
            conversation_id: None,
            created_at: OffsetDateTime::now_utc(),
            responded_at: None,
        };
        if !self.friendships.create_request(&request).await? {
            // Lost the race to a concurrent request for the same pair
            return match self.friendships.find_between(requester.id, target.id).await? {
                Some(existing) => existing_pair_outcome(existing),
                None => Err(ChatError::Conflict("friend request changed concurrently".to_string())),
            };
        }

        tracing::info!(
            request_id = %request.id,
            requester_id = %requester.id,
            recipient_id = %target.id,
            "Friend request created"
        );

        if let Err(e) = self
            .notifications
            .notify(
                target.id,
                NotificationKind::FriendRequest,
                format!("{} sent you a friend request", requester.display_name),
                Some(request.id.to_string()),
                Some(requester.id),
            )
            .await
        {
            tracing::warn!(error = %e, request_id = %request.id, "Failed to create friend request notification");
        }

        self.registry.send_to_user(
            target.id,
            ServerEvent::FriendRequestIncoming {
                request: request.clone(),
                from: PeerSummary::from(requester),
            },
        );

        Ok(request)
    }

    /// Accept or decline a pending request addressed to `responder`.
    ///
    /// Repeating the response that already settled the request returns the
    /// settled record; the opposite response is a conflict.
    pub async fn respond(
        &self,
        responder: &UserIdentity,
        request_id: Uuid,
        accept: bool,
    ) -> ChatResult<FriendRequest> {
        let request = self
            .friendships
            .get_request(request_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("friend request {request_id}")))?;

        if request.recipient_id != responder.id {
            return Err(ChatError::Unauthorized(
                "only the recipient can respond to a friend request".to_string(),
            ));
        }

        let wanted = if accept {
            FriendshipStatus::Accepted
        } else {
            FriendshipStatus::Declined
        };
        if request.status != FriendshipStatus::Pending {
            return settled(request, wanted);
        }

        let requester = self.resolver.require_user(request.requester_id).await?;
        let conversation_id = accept.then(|| ConversationId::between(&requester.email, &responder.email));

        let Some(updated) = self
            .friendships
            .respond(request_id, wanted, conversation_id.as_ref(), OffsetDateTime::now_utc())
            .await?
        else {
            // Another response won the race
            let current = self
                .friendships
                .get_request(request_id)
                .await?
                .ok_or_else(|| ChatError::NotFound(format!("friend request {request_id}")))?;
            return settled(current, wanted);
        };

        tracing::info!(
            request_id = %request_id,
            requester_id = %requester.id,
            recipient_id = %responder.id,
            accepted = accept,
            "Friend request answered"
        );

        let (kind, text) = if accept {
            (
                NotificationKind::FriendAccepted,
                format!("{} accepted your friend request", responder.display_name),
            )
        } else {
            (
                NotificationKind::FriendDeclined,
                format!("{} declined your friend request", responder.display_name),
            )
        };
        if let Err(e) = self
            .notifications
            .notify(requester.id, kind, text, Some(request_id.to_string()), Some(responder.id))
            .await
        {
            tracing::warn!(error = %e, request_id = %request_id, "Failed to create friend response notification");
        }

        let event = ServerEvent::FriendResponse {
            request: updated.clone(),
            accepted: accept,
        };
        self.registry.send_to_user(requester.id, event.clone());
        self.registry.send_to_user(responder.id, event);

        if accept {
            // New friends learn about each other's presence right away
            if self.registry.is_online(responder.id) {
                self.registry
                    .send_to_user(requester.id, ServerEvent::PeerOnline { user_id: responder.id });
            }
            if self.registry.is_online(requester.id) {
                self.registry
                    .send_to_user(responder.id, ServerEvent::PeerOnline { user_id: requester.id });
            }
        }

        Ok(updated)
    }
}

/// Outcome of a new request when the pair already has a live record
fn existing_pair_outcome(existing: FriendRequest) -> ChatResult<FriendRequest> {
    match existing.status {
        FriendshipStatus::Pending => {
            tracing::debug!(request_id = %existing.id, "Friend request already pending");
            Ok(existing)
        }
        FriendshipStatus::Accepted => Err(ChatError::Conflict("already friends".to_string())),
        FriendshipStatus::Declined => Err(ChatError::Conflict("friend request changed concurrently".to_string())),
    }
}

fn settled(request: FriendRequest, wanted: FriendshipStatus) -> ChatResult<FriendRequest> {
    if request.status == wanted {
        Ok(request)
    } else {
        Err(ChatError::Conflict(format!("friend request already {}", request.status)))
    }
}
