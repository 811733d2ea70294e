//! Realtime chat services
//!
//! - **ConversationResolver**: friendship checks and canonical conversation ids
//! - **MessageService**: send, history, delivery and read receipts
//! - **PresenceBroadcaster**: edge-triggered online/offline announcements
//! - **NotificationRelay**: persisted notifications with live push
//! - **FriendService**: friend requests and responses
//!
//! [`ChatServices`] wires them to one [`ConnectionRegistry`] and one set of
//! [`Stores`]; the websocket gateway only talks to this bundle.

pub mod conversation;
pub mod friends;
pub mod messages;
pub mod notifications;
pub mod presence;

use std::sync::Arc;

use jotter_shared::ChatResult;
use uuid::Uuid;

use crate::store::Stores;
use crate::websocket::{ConnectionRegistry, ServerEvent};

pub use conversation::ConversationResolver;
pub use friends::FriendService;
pub use messages::{MessageService, NewMessage, ReceiptOutcome};
pub use notifications::NotificationRelay;
pub use presence::{PresenceBroadcaster, PresenceChange};

pub struct ChatServices {
    pub stores: Stores,
    pub registry: Arc<ConnectionRegistry>,
    pub resolver: Arc<ConversationResolver>,
    pub notifications: Arc<NotificationRelay>,
    pub presence: PresenceBroadcaster,
    pub messages: MessageService,
    pub friends: FriendService,
}

impl ChatServices {
    pub fn new(stores: Stores, message_max_length: usize) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let resolver = Arc::new(ConversationResolver::new(&stores));
        let notifications = Arc::new(NotificationRelay::new(
            Arc::clone(&stores.notifications),
            Arc::clone(&registry),
        ));
        let presence = PresenceBroadcaster::new(
            Arc::clone(&stores.users),
            Arc::clone(&registry),
            Arc::clone(&resolver),
        );
        let messages = MessageService::new(
            Arc::clone(&stores.messages),
            Arc::clone(&resolver),
            Arc::clone(&notifications),
            Arc::clone(&registry),
            message_max_length,
        );
        let friends = FriendService::new(
            Arc::clone(&stores.friendships),
            Arc::clone(&resolver),
            Arc::clone(&notifications),
            Arc::clone(&registry),
        );

        Self {
            stores,
            registry,
            resolver,
            notifications,
            presence,
            messages,
            friends,
        }
    }

    /// Forward a typing indicator to a friend. Nothing is persisted.
    pub async fn relay_typing(&self, from_user_id: Uuid, peer_id: Uuid, is_typing: bool) -> ChatResult<()> {
        self.resolver.check_friendship(from_user_id, peer_id).await?;
        self.registry.send_to_user(
            peer_id,
            ServerEvent::PeerTyping {
                user_id: from_user_id,
                is_typing,
            },
        );
        Ok(())
    }

    /// Forward an opaque call-signaling payload to a friend
    pub async fn relay_signal(
        &self,
        from_user_id: Uuid,
        peer_id: Uuid,
        payload: serde_json::Value,
    ) -> ChatResult<()> {
        self.resolver.check_friendship(from_user_id, peer_id).await?;
        let delivered = self.registry.send_to_user(peer_id, ServerEvent::Signal { from_user_id, payload });
        tracing::debug!(from_user_id = %from_user_id, peer_id = %peer_id, delivered, "Signal relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MessageStore};
    use crate::websocket::events::HistoryTarget;
    use crate::websocket::Connection;
    use jotter_shared::{ChatError, ConversationId, FriendshipStatus, MessageStatus, NotificationKind, UserIdentity};
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        chat: ChatServices,
        alice: UserIdentity,
        bob: UserIdentity,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = store.add_user("a@x.com", "Alice").await;
        let bob = store.add_user("b@x.com", "Bob").await;
        let chat = ChatServices::new(Stores::from_backend(Arc::clone(&store)), 4000);
        Fixture { store, chat, alice, bob }
    }

    fn connect(chat: &ChatServices, user_id: Uuid) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(user_id, tx));
        chat.registry.register(Arc::clone(&conn));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn text(receiver_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            receiver_id,
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_between_non_friends_persists_nothing() {
        let f = fixture().await;
        let result = f.chat.messages.send(&f.alice, None, text(f.bob.id, "hi")).await;

        assert!(matches!(result, Err(ChatError::NotFriends)));
        assert_eq!(f.store.message_count().await, 0);
        assert!(f.store.notifications_for(f.bob.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_send_validation_happens_before_persistence() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;

        let empty = f.chat.messages.send(&f.alice, None, text(f.bob.id, "   ")).await;
        assert!(matches!(empty, Err(ChatError::EmptyMessage)));

        let too_long = f.chat.messages.send(&f.alice, None, text(f.bob.id, &"x".repeat(4001))).await;
        assert!(matches!(too_long, Err(ChatError::Validation(_))));

        let to_self = f.chat.messages.send(&f.alice, None, text(f.alice.id, "me")).await;
        assert!(matches!(to_self, Err(ChatError::SelfReference)));

        assert_eq!(f.store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_note_only_message_is_accepted() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;

        let draft = NewMessage {
            receiver_id: f.bob.id,
            note_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let message = f.chat.messages.send(&f.alice, None, draft).await.unwrap();
        assert!(message.content.is_empty());
        assert!(message.note_id.is_some());
    }

    #[tokio::test]
    async fn test_send_fans_out_and_notifies() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;
        let (origin, mut origin_rx) = connect(&f.chat, f.alice.id);
        let (_other, mut other_rx) = connect(&f.chat, f.alice.id);
        let (_bob_conn, mut bob_rx) = connect(&f.chat, f.bob.id);

        let message = f
            .chat
            .messages
            .send(&f.alice, Some(origin.session_id), text(f.bob.id, "hello"))
            .await
            .unwrap();

        assert_eq!(message.conversation_id.as_str(), "a@x.com:b@x.com");
        assert_eq!(message.status, MessageStatus::Sent);

        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageReceived { message: m, .. } if m.id == message.id)));
        assert!(bob_events.iter().any(|e| matches!(e, ServerEvent::Notification { .. })));

        assert!(drain(&mut origin_rx).is_empty());
        assert_eq!(drain(&mut other_rx).len(), 1);

        let notifications = f.store.notifications_for(f.bob.id).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::NewMessage);
    }

    #[tokio::test]
    async fn test_notification_outage_does_not_fail_send() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;

        struct FailingNotifications;
        #[async_trait::async_trait]
        impl crate::store::NotificationStore for FailingNotifications {
            async fn create_notification(&self, _: &jotter_shared::Notification) -> ChatResult<()> {
                Err(ChatError::StoreUnavailable("down".to_string()))
            }
            async fn unread_count(&self, _: Uuid) -> ChatResult<i64> {
                Ok(0)
            }
        }

        let mut stores = Stores::from_backend(Arc::clone(&f.store));
        stores.notifications = Arc::new(FailingNotifications);
        let chat = ChatServices::new(stores, 4000);

        let message = chat.messages.send(&f.alice, None, text(f.bob.id, "still here")).await.unwrap();
        assert!(f.store.get_message(message.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_history_by_peer_and_by_id_agree() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;
        f.chat.messages.send(&f.alice, None, text(f.bob.id, "one")).await.unwrap();
        f.chat.messages.send(&f.bob, None, text(f.alice.id, "two")).await.unwrap();

        let (by_peer_id, by_peer) = f
            .chat
            .messages
            .fetch_history(&f.bob, HistoryTarget::Peer(f.alice.id))
            .await
            .unwrap();
        let (by_conv_id, by_conv) = f
            .chat
            .messages
            .fetch_history(
                &f.alice,
                HistoryTarget::Conversation(ConversationId::from_raw("B@x.com:a@x.com")),
            )
            .await
            .unwrap();

        assert_eq!(by_peer_id, by_conv_id);
        assert_eq!(by_peer, by_conv);
        assert_eq!(
            by_peer.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
    }

    #[tokio::test]
    async fn test_history_rejects_outsiders() {
        let f = fixture().await;
        let eve = f.store.add_user("eve@x.com", "Eve").await;
        let result = f
            .chat
            .messages
            .fetch_history(
                &eve,
                HistoryTarget::Conversation(ConversationId::between("a@x.com", "b@x.com")),
            )
            .await;
        assert!(matches!(result, Err(ChatError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;
        let message = f.chat.messages.send(&f.alice, None, text(f.bob.id, "read me")).await.unwrap();
        let (_alice_conn, mut alice_rx) = connect(&f.chat, f.alice.id);

        let first = f.chat.messages.mark_read(f.bob.id, message.id).await.unwrap();
        let second = f.chat.messages.mark_read(f.bob.id, message.id).await.unwrap();

        match (first, second) {
            (ReceiptOutcome::Updated(a), ReceiptOutcome::Unchanged(b)) => {
                assert_eq!(a.status, MessageStatus::Read);
                assert_eq!(b.status, MessageStatus::Read);
                assert!(a.read_at.is_some());
                assert_eq!(a.read_at, b.read_at);
            }
            other => panic!("Unexpected outcomes {:?}", other),
        }

        let status_events = drain(&mut alice_rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::StatusUpdate { .. }))
            .count();
        assert_eq!(status_events, 1);
    }

    #[tokio::test]
    async fn test_receipts_from_non_receiver_are_ignored() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;
        let message = f.chat.messages.send(&f.alice, None, text(f.bob.id, "mine")).await.unwrap();

        assert_eq!(
            f.chat.messages.mark_read(f.alice.id, message.id).await.unwrap(),
            ReceiptOutcome::Ignored
        );
        let stored = f.store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);

        assert!(matches!(
            f.chat.messages.mark_read(f.bob.id, Uuid::new_v4()).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delivered_never_regresses_read() {
        let f = fixture().await;
        f.store.add_friendship(f.alice.id, f.bob.id).await;
        let message = f.chat.messages.send(&f.alice, None, text(f.bob.id, "hey")).await.unwrap();

        assert!(matches!(
            f.chat.messages.mark_delivered(f.bob.id, message.id).await.unwrap(),
            ReceiptOutcome::Updated(m) if m.status == MessageStatus::Delivered
        ));
        f.chat.messages.mark_read(f.bob.id, message.id).await.unwrap();
        assert!(matches!(
            f.chat.messages.mark_delivered(f.bob.id, message.id).await.unwrap(),
            ReceiptOutcome::Unchanged(m) if m.status == MessageStatus::Read
        ));
    }

    #[tokio::test]
    async fn test_friend_request_accept_flow() {
        let f = fixture().await;
        let (_alice_conn, mut alice_rx) = connect(&f.chat, f.alice.id);
        let (_bob_conn, mut bob_rx) = connect(&f.chat, f.bob.id);

        let request = f.chat.friends.request(&f.alice, f.bob.id).await.unwrap();
        assert_eq!(request.status, FriendshipStatus::Pending);
        assert!(drain(&mut bob_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::FriendRequestIncoming { from, .. } if from.user_id == f.alice.id)));

        // Asking again, from either side, returns the pending request
        let again = f.chat.friends.request(&f.bob, f.alice.id).await.unwrap();
        assert_eq!(again.id, request.id);

        let accepted = f.chat.friends.respond(&f.bob, request.id, true).await.unwrap();
        assert_eq!(accepted.status, FriendshipStatus::Accepted);
        assert_eq!(accepted.conversation_id, Some(ConversationId::between("a@x.com", "b@x.com")));

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::FriendResponse { accepted: true, .. })));
        assert!(alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerOnline { user_id } if *user_id == f.bob.id)));

        // Repeat accept is a no-op
        let repeat = f.chat.friends.respond(&f.bob, request.id, true).await.unwrap();
        assert_eq!(repeat.id, request.id);
        assert!(drain(&mut alice_rx).is_empty());

        assert!(matches!(
            f.chat.friends.request(&f.alice, f.bob.id).await,
            Err(ChatError::Conflict(_))
        ));
        let kinds: Vec<_> = f.store.notifications_for(f.alice.id).await.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::FriendAccepted]);
    }

    #[tokio::test]
    async fn test_friend_respond_policy() {
        let f = fixture().await;
        let request = f.chat.friends.request(&f.alice, f.bob.id).await.unwrap();

        assert!(matches!(
            f.chat.friends.respond(&f.alice, request.id, true).await,
            Err(ChatError::Unauthorized(_))
        ));
        assert!(matches!(
            f.chat.friends.respond(&f.bob, Uuid::new_v4(), true).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            f.chat.friends.request(&f.alice, f.alice.id).await,
            Err(ChatError::SelfReference)
        ));

        let declined = f.chat.friends.respond(&f.bob, request.id, false).await.unwrap();
        assert_eq!(declined.status, FriendshipStatus::Declined);
        assert!(matches!(
            f.chat.friends.respond(&f.bob, request.id, true).await,
            Err(ChatError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_settle_once() {
        let f = fixture().await;
        let request_id = f.chat.friends.request(&f.alice, f.bob.id).await.unwrap().id;
        let chat = Arc::new(f.chat);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let chat = Arc::clone(&chat);
            let bob = f.bob.clone();
            handles.push(tokio::spawn(async move { chat.friends.respond(&bob, request_id, true).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().status, FriendshipStatus::Accepted);
        }

        let accepted_notifications = f
            .store
            .notifications_for(f.alice.id)
            .await
            .into_iter()
            .filter(|n| n.kind == NotificationKind::FriendAccepted)
            .count();
        assert_eq!(accepted_notifications, 1);
    }

    #[tokio::test]
    async fn test_passthrough_relays_require_friendship() {
        let f = fixture().await;
        let (_bob_conn, mut bob_rx) = connect(&f.chat, f.bob.id);

        assert!(matches!(
            f.chat.relay_typing(f.alice.id, f.bob.id, true).await,
            Err(ChatError::NotFriends)
        ));

        f.store.add_friendship(f.alice.id, f.bob.id).await;
        f.chat.relay_typing(f.alice.id, f.bob.id, true).await.unwrap();
        f.chat
            .relay_signal(f.alice.id, f.bob.id, serde_json::json!({"sdp": "offer"}))
            .await
            .unwrap();

        let events = drain(&mut bob_rx);
        assert!(matches!(events[0], ServerEvent::PeerTyping { is_typing: true, .. }));
        assert!(matches!(&events[1], ServerEvent::Signal { payload, .. } if payload["sdp"] == "offer"));
    }
}
