//! Notification relay
//!
//! Persists a notification record and pushes it to the target's live
//! connections. A target with no connections just keeps the record for the
//! notifications surface to serve later.

use std::sync::Arc;

use jotter_shared::{ChatResult, Notification, NotificationKind};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::NotificationStore;
use crate::websocket::{ConnectionRegistry, ServerEvent};

pub struct NotificationRelay {
    store: Arc<dyn NotificationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationRelay {
    pub fn new(store: Arc<dyn NotificationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn notify(
        &self,
        target_user_id: Uuid,
        kind: NotificationKind,
        message: impl Into<String>,
        reference: Option<String>,
        actor_id: Option<Uuid>,
    ) -> ChatResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: target_user_id,
            kind,
            message: message.into(),
            reference,
            actor_id,
            is_read: false,
            created_at: OffsetDateTime::now_utc(),
        };

        self.store.create_notification(&notification).await?;

        let delivered = self.registry.send_to_user(
            target_user_id,
            ServerEvent::Notification {
                notification: notification.clone(),
            },
        );

        tracing::debug!(
            notification_id = %notification.id,
            user_id = %target_user_id,
            kind = %kind,
            delivered,
            "Notification created"
        );

        Ok(notification)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> ChatResult<i64> {
        self.store.unread_count(user_id).await
    }
}
