//! Conversation resolution and friendship checks
//!
//! The canonical relationship source is the friendship store. The friend ids
//! embedded on user records are an older representation and only consulted
//! as a fallback.

use std::collections::BTreeSet;
use std::sync::Arc;

use jotter_shared::{ChatError, ChatResult, ConversationId, FriendshipStatus, UserIdentity};
use uuid::Uuid;

use crate::store::{FriendshipStore, Stores, UserDirectory};

pub struct ConversationResolver {
    users: Arc<dyn UserDirectory>,
    friendships: Arc<dyn FriendshipStore>,
}

impl ConversationResolver {
    pub fn new(stores: &Stores) -> Self {
        Self {
            users: Arc::clone(&stores.users),
            friendships: Arc::clone(&stores.friendships),
        }
    }

    /// Resolve the conversation between two users by id
    pub async fn resolve(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<ConversationId> {
        if user_a == user_b {
            return Err(ChatError::SelfReference);
        }
        let a = self.require_user(user_a).await?;
        let b = self.require_user(user_b).await?;
        self.resolve_between(&a, &b).await
    }

    /// Resolve the conversation between two known identities.
    ///
    /// Fails with `SelfReference` for the same user and `NotFriends` unless an
    /// accepted relationship exists. An accepted record whose stored key is
    /// missing or not the canonical one is rewritten in place.
    pub async fn resolve_between(&self, a: &UserIdentity, b: &UserIdentity) -> ChatResult<ConversationId> {
        if a.id == b.id {
            return Err(ChatError::SelfReference);
        }

        let canonical = ConversationId::between(&a.email, &b.email);

        match self.friendships.find_between(a.id, b.id).await? {
            Some(record) if record.status == FriendshipStatus::Accepted => {
                if record.conversation_id.as_ref() != Some(&canonical) {
                    tracing::info!(
                        request_id = %record.id,
                        stored = ?record.conversation_id.as_ref().map(|c| c.as_str()),
                        canonical = %canonical,
                        "Rewriting friendship conversation id"
                    );
                    if let Err(e) = self.friendships.set_conversation_id(record.id, &canonical).await {
                        // The canonical id is derived, so the caller can proceed
                        tracing::warn!(error = %e, request_id = %record.id, "Failed to persist conversation id");
                    }
                }
                Ok(canonical)
            }
            _ if self.mutual_legacy_friends(a.id, b.id).await? => Ok(canonical),
            _ => Err(ChatError::NotFriends),
        }
    }

    /// Whether the two users may message each other
    pub async fn are_friends(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<bool> {
        if user_a == user_b {
            return Ok(false);
        }
        let accepted = matches!(
            self.friendships.find_between(user_a, user_b).await?,
            Some(record) if record.status == FriendshipStatus::Accepted
        );
        if accepted {
            return Ok(true);
        }
        self.mutual_legacy_friends(user_a, user_b).await
    }

    /// Like [`are_friends`](Self::are_friends) but as a policy check
    pub async fn check_friendship(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<()> {
        if user_a == user_b {
            return Err(ChatError::SelfReference);
        }
        if self.are_friends(user_a, user_b).await? {
            Ok(())
        } else {
            Err(ChatError::NotFriends)
        }
    }

    /// Everyone `user_id` is friends with, from both relationship sources
    pub async fn friends_of(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let mut friends: BTreeSet<Uuid> = self
            .friendships
            .accepted_friend_ids(user_id)
            .await?
            .into_iter()
            .collect();
        for candidate in self.users.embedded_friend_ids(user_id).await? {
            if candidate == user_id || friends.contains(&candidate) {
                continue;
            }
            // Legacy lists only count when both sides list each other
            if self.users.embedded_friend_ids(candidate).await?.contains(&user_id) {
                friends.insert(candidate);
            }
        }
        friends.remove(&user_id);
        Ok(friends.into_iter().collect())
    }

    /// Check that `user` is one of the two participants embedded in the id.
    ///
    /// Returns the id in canonical form so differently-cased client input
    /// addresses the same stored thread.
    pub fn authorize_participant(
        &self,
        conversation_id: &ConversationId,
        user: &UserIdentity,
    ) -> ChatResult<ConversationId> {
        let (a, b) = conversation_id.participants().ok_or_else(|| {
            ChatError::Unauthorized("conversation id does not name its participants".to_string())
        })?;
        let canonical = ConversationId::between(a, b);
        if canonical.includes(&user.email) {
            Ok(canonical)
        } else {
            tracing::warn!(user_id = %user.id, conversation_id = %conversation_id, "History request by non-participant");
            Err(ChatError::Unauthorized("not a participant of this conversation".to_string()))
        }
    }

    pub async fn require_user(&self, user_id: Uuid) -> ChatResult<UserIdentity> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user {user_id}")))
    }

    async fn mutual_legacy_friends(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<bool> {
        let a_lists_b = self.users.embedded_friend_ids(user_a).await?.contains(&user_b);
        if !a_lists_b {
            return Ok(false);
        }
        Ok(self.users.embedded_friend_ids(user_b).await?.contains(&user_a))
    }
}
