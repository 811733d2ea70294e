//! Live connection registry
//!
//! Maps each user to the set of connections currently open for them (one per
//! device or tab). Updates for one user happen inside that user's map entry,
//! which `DashMap` locks per shard, so connects and disconnects for different
//! users never contend on a global lock.
//!
//! State is process-local: after a restart the registry starts empty and every
//! user is offline until they reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Registry of live connections, indexed by user
pub struct ConnectionRegistry {
    /// user_id -> session_id -> connection
    users: DashMap<Uuid, HashMap<Uuid, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Add a connection to its user's set.
    ///
    /// Returns `true` only when this is the user's first live connection.
    /// Registering the same session twice is a no-op.
    pub fn register(&self, conn: Arc<Connection>) -> bool {
        let mut sessions = self.users.entry(conn.user_id).or_default();
        if sessions.contains_key(&conn.session_id) {
            return false;
        }
        let first = sessions.is_empty();
        sessions.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            user_connections = sessions.len(),
            "Connection registered"
        );

        first
    }

    /// Remove a connection.
    ///
    /// Returns `true` exactly once per online period: when the removed
    /// connection was the user's last one.
    pub fn unregister(&self, user_id: Uuid, session_id: Uuid) -> bool {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&session_id).is_none() {
                    return false;
                }
                let remaining = entry.get().len();
                tracing::info!(
                    session_id = %session_id,
                    user_id = %user_id,
                    remaining_connections = remaining,
                    "Connection unregistered"
                );
                if remaining == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Deliver an event to every live connection of a user.
    ///
    /// Returns the number of connections reached. A user with no connections
    /// is the normal offline case and only logged at debug.
    pub fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.deliver(user_id, None, event)
    }

    /// Like [`send_to_user`](Self::send_to_user) but skips one session
    /// (used to sync a user's other devices)
    pub fn send_to_user_except(&self, user_id: Uuid, except_session: Uuid, event: ServerEvent) -> usize {
        self.deliver(user_id, Some(except_session), event)
    }

    fn deliver(&self, user_id: Uuid, except_session: Option<Uuid>, event: ServerEvent) -> usize {
        let targets: Vec<Arc<Connection>> = match self.users.get(&user_id) {
            Some(sessions) => sessions
                .values()
                .filter(|c| Some(c.session_id) != except_session)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if targets.is_empty() {
            tracing::debug!(user_id = %user_id, "No live connections for user, skipping push");
            return 0;
        }

        let mut delivered = 0;
        for conn in &targets {
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }
        delivered
    }

    /// Whether the user has at least one live connection
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users.get(&user_id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Number of live connections for one user
    pub fn user_connection_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Get statistics about the registry
    pub fn stats(&self) -> RegistryStats {
        let online_users = self.users.len();
        let active_connections = self.users.iter().map(|entry| entry.value().len()).sum();
        RegistryStats {
            online_users,
            active_connections,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about live connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Users with at least one connection
    pub online_users: usize,
    /// Total open connections
    pub active_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection(user_id: Uuid) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Connection::new(user_id, tx)), rx)
    }

    #[test]
    fn test_register_reports_first_connection_only() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (phone, _rx1) = connection(user_id);
        let (laptop, _rx2) = connection(user_id);

        assert!(registry.register(Arc::clone(&phone)));
        assert!(!registry.register(Arc::clone(&laptop)));
        assert_eq!(registry.user_connection_count(user_id), 2);
    }

    #[test]
    fn test_register_is_idempotent_per_session() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection(Uuid::new_v4());

        assert!(registry.register(Arc::clone(&conn)));
        assert!(!registry.register(Arc::clone(&conn)));
        assert_eq!(registry.user_connection_count(conn.user_id), 1);
    }

    #[test]
    fn test_unregister_signals_offline_exactly_once() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (phone, _rx1) = connection(user_id);
        let (laptop, _rx2) = connection(user_id);
        registry.register(Arc::clone(&phone));
        registry.register(Arc::clone(&laptop));

        assert!(!registry.unregister(user_id, phone.session_id));
        assert!(registry.is_online(user_id));
        assert!(registry.unregister(user_id, laptop.session_id));
        assert!(!registry.is_online(user_id));

        // Repeated or unknown removals never signal again
        assert!(!registry.unregister(user_id, laptop.session_id));
        assert!(!registry.unregister(user_id, Uuid::new_v4()));
    }

    #[test]
    fn test_send_to_user_reaches_every_device() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (phone, mut rx1) = connection(user_id);
        let (laptop, mut rx2) = connection(user_id);
        registry.register(phone);
        registry.register(laptop);

        assert_eq!(registry.send_to_user(user_id, ServerEvent::Pong), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_user_except_skips_origin() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (phone, mut rx1) = connection(user_id);
        let (laptop, mut rx2) = connection(user_id);
        registry.register(Arc::clone(&phone));
        registry.register(laptop);

        assert_eq!(
            registry.send_to_user_except(user_id, phone.session_id, ServerEvent::Pong),
            1
        );
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_offline_user_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user(Uuid::new_v4(), ServerEvent::Pong), 0);
    }

    #[test]
    fn test_stats() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (a, _rx1) = connection(user_id);
        let (b, _rx2) = connection(user_id);
        let (c, _rx3) = connection(Uuid::new_v4());
        registry.register(a);
        registry.register(b);
        registry.register(c);

        assert_eq!(
            registry.stats(),
            RegistryStats {
                online_users: 2,
                active_connections: 3
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_connect_disconnect_keeps_count_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let user_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::unbounded_channel();
                let conn = Arc::new(Connection::new(user_id, tx));
                let first = registry.register(Arc::clone(&conn));
                tokio::task::yield_now().await;
                let last = registry.unregister(user_id, conn.session_id);
                (first, last)
            }));
        }

        let mut firsts = 0;
        let mut lasts = 0;
        for handle in handles {
            let (first, last) = handle.await.unwrap();
            firsts += first as usize;
            lasts += last as usize;
        }

        // Every 0->1 edge is matched by exactly one 1->0 edge
        assert_eq!(firsts, lasts);
        assert!(firsts >= 1);
        assert!(!registry.is_online(user_id));
    }
}
