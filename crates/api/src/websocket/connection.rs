//! WebSocket connection management
//!
//! Represents an authenticated live connection. The identity is attached once
//! at handshake time and every inbound event is attributed to it.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: Uuid,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    connected_at: Instant,
}

impl Connection {
    /// Create a new connection
    pub fn new(user_id: Uuid, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Send an event, logging instead of failing when the socket is already gone
    pub fn reply(&self, event: ServerEvent) {
        if self.send(event).is_err() {
            tracing::debug!(
                session_id = %self.session_id,
                user_id = %self.user_id,
                "Dropped reply for closed connection"
            );
        }
    }

    /// How long this session has been open
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// True once the writer side of the socket has shut down
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
