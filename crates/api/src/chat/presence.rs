//! Presence broadcasting
//!
//! Online/offline announcements are edge-triggered. Each user has an
//! "announced" flag guarded by its own async mutex; [`PresenceBroadcaster::sync`]
//! compares it to the registry's live state and only announces when the two
//! differ. Fast connect/disconnect interleavings therefore converge on the
//! registry's state and never announce the same transition twice.

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::conversation::ConversationResolver;
use crate::store::UserDirectory;
use crate::websocket::{ConnectionRegistry, ServerEvent};

/// A presence transition that was announced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Online,
    Offline { last_seen: OffsetDateTime },
}

pub struct PresenceBroadcaster {
    users: Arc<dyn UserDirectory>,
    registry: Arc<ConnectionRegistry>,
    resolver: Arc<ConversationResolver>,
    announced: DashMap<Uuid, Arc<Mutex<bool>>>,
}

impl PresenceBroadcaster {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        registry: Arc<ConnectionRegistry>,
        resolver: Arc<ConversationResolver>,
    ) -> Self {
        Self {
            users,
            registry,
            resolver,
            announced: DashMap::new(),
        }
    }

    /// Reconcile the announced presence of `user_id` with the registry.
    ///
    /// Call after every register/unregister that crossed the 0/1 boundary.
    /// Returns the transition announced by this call, if any.
    pub async fn sync(&self, user_id: Uuid) -> Option<PresenceChange> {
        let slot = self
            .announced
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(false)))
            .clone();

        let change = {
            let mut announced = slot.lock().await;
            let live = self.registry.is_online(user_id);
            if live == *announced {
                None
            } else {
                *announced = live;
                Some(self.announce(user_id, live).await)
            }
        };

        drop(slot);
        // Drop idle offline slots; a fresh slot starts out offline anyway
        self.announced.remove_if(&user_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().map(|online| !*online).unwrap_or(false)
        });

        change
    }

    async fn announce(&self, user_id: Uuid, online: bool) -> PresenceChange {
        let now = OffsetDateTime::now_utc();

        if let Err(e) = self.users.set_presence(user_id, online, now).await {
            tracing::error!(error = %e, user_id = %user_id, online, "Failed to persist presence");
        }

        let (event, change) = if online {
            (ServerEvent::PeerOnline { user_id }, PresenceChange::Online)
        } else {
            (
                ServerEvent::PeerOffline { user_id, last_seen: now },
                PresenceChange::Offline { last_seen: now },
            )
        };

        let friends = match self.resolver.friends_of(user_id).await {
            Ok(friends) => friends,
            Err(e) => {
                tracing::error!(error = %e, user_id = %user_id, "Failed to load friends for presence fan-out");
                Vec::new()
            }
        };

        let mut reached = 0;
        for friend_id in friends {
            if self.registry.send_to_user(friend_id, event.clone()) > 0 {
                reached += 1;
            }
        }

        tracing::info!(user_id = %user_id, online, friends_notified = reached, "Presence changed");
        change
    }

    /// Friends of `user_id` that currently have a live connection
    pub async fn online_friends(&self, user_id: Uuid) -> jotter_shared::ChatResult<Vec<Uuid>> {
        let friends = self.resolver.friends_of(user_id).await?;
        Ok(friends
            .into_iter()
            .filter(|id| self.registry.is_online(*id))
            .collect())
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.announced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Stores};
    use crate::websocket::Connection;
    use jotter_shared::UserIdentity;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        presence: PresenceBroadcaster,
        alice: UserIdentity,
        bob: UserIdentity,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = store.add_user("a@x.com", "Alice").await;
        let bob = store.add_user("b@x.com", "Bob").await;
        store.add_friendship(alice.id, bob.id).await;

        let stores = Stores::from_backend(Arc::clone(&store));
        let registry = Arc::new(ConnectionRegistry::new());
        let resolver = Arc::new(ConversationResolver::new(&stores));
        let presence = PresenceBroadcaster::new(stores.users.clone(), Arc::clone(&registry), resolver);
        Fixture {
            store,
            registry,
            presence,
            alice,
            bob,
        }
    }

    fn connect(registry: &ConnectionRegistry, user_id: Uuid) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(user_id, tx));
        registry.register(Arc::clone(&conn));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_online_and_offline_are_announced_to_friends() {
        let f = fixture().await;
        let (_bob_conn, mut bob_rx) = connect(&f.registry, f.bob.id);

        let (alice_conn, _alice_rx) = connect(&f.registry, f.alice.id);
        assert_eq!(f.presence.sync(f.alice.id).await, Some(PresenceChange::Online));
        assert!(f.store.get_user(f.alice.id).await.unwrap().unwrap().is_online);

        f.registry.unregister(f.alice.id, alice_conn.session_id);
        assert!(matches!(
            f.presence.sync(f.alice.id).await,
            Some(PresenceChange::Offline { .. })
        ));
        let stored = f.store.get_user(f.alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
        assert!(stored.last_seen_at.is_some());

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::PeerOnline { user_id } if user_id == f.alice.id));
        assert!(matches!(events[1], ServerEvent::PeerOffline { user_id, .. } if user_id == f.alice.id));
    }

    #[tokio::test]
    async fn test_sync_without_change_is_silent() {
        let f = fixture().await;
        let (_bob_conn, mut bob_rx) = connect(&f.registry, f.bob.id);
        let (_a1, _rx1) = connect(&f.registry, f.alice.id);
        f.presence.sync(f.alice.id).await;

        let (_a2, _rx2) = connect(&f.registry, f.alice.id);
        assert_eq!(f.presence.sync(f.alice.id).await, None);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_flap_converges_to_registry_state() {
        let f = fixture().await;
        let (_bob_conn, mut bob_rx) = connect(&f.registry, f.bob.id);

        // Connect and disconnect before presence catches up
        let (conn, _rx) = connect(&f.registry, f.alice.id);
        f.registry.unregister(f.alice.id, conn.session_id);

        assert_eq!(f.presence.sync(f.alice.id).await, None);
        assert_eq!(f.presence.sync(f.alice.id).await, None);
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(f.presence.tracked_users(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_announce_once() {
        let f = fixture().await;
        let (_bob_conn, mut bob_rx) = connect(&f.registry, f.bob.id);
        let (_conn, _rx) = connect(&f.registry, f.alice.id);

        let presence = Arc::new(f.presence);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let presence = Arc::clone(&presence);
            let user_id = f.alice.id;
            handles.push(tokio::spawn(async move { presence.sync(user_id).await }));
        }
        let mut announced = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                announced += 1;
            }
        }

        assert_eq!(announced, 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_online_friends_snapshot() {
        let f = fixture().await;
        let carol = f.store.add_user("c@x.com", "Carol").await;
        f.store.add_friendship(f.alice.id, carol.id).await;
        let (_bob_conn, _bob_rx) = connect(&f.registry, f.bob.id);

        assert_eq!(f.presence.online_friends(f.alice.id).await.unwrap(), vec![f.bob.id]);
    }

    #[tokio::test]
    async fn test_directory_outage_still_announces() {
        let f = fixture().await;
        let (_conn, _rx) = connect(&f.registry, f.alice.id);
        f.store.set_unavailable(true);

        assert_eq!(f.presence.sync(f.alice.id).await, Some(PresenceChange::Online));
    }
}
