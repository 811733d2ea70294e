//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, then runs three pieces per connection:
//! the socket reader (this task), a writer task draining the connection's
//! outbound channel, and a dispatch task that processes inbound events one at
//! a time in arrival order. On disconnect the connection is unregistered
//! right away while the dispatch task finishes whatever it already accepted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use jotter_shared::{ChatError, ChatResult, UserIdentity};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::AuthVerifier;
use crate::chat::{ChatServices, NewMessage, ReceiptOutcome};
use crate::error::ApiError;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::{history_target, ClientEvent, ServerEvent},
};

/// Inbound events a session may have queued before its reader waits
pub const DISPATCH_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - authenticates, then upgrades the HTTP connection
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, ApiError> {
    let credential =
        bearer_credential(&headers, params.token.as_deref()).ok_or(ApiError::MissingCredential)?;

    let user = authenticate(state.verifier.as_ref(), &credential, state.config.ws_auth_timeout()).await?;

    tracing::info!(user_id = %user.id, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

/// Credential from `Authorization: Bearer ...`, falling back to `?token=`
pub fn bearer_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        });

    from_header
        .or_else(|| query_token.map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
}

/// Verify a credential within the handshake deadline
pub async fn authenticate(
    verifier: &dyn AuthVerifier,
    credential: &str,
    timeout: Duration,
) -> Result<UserIdentity, ApiError> {
    match tokio::time::timeout(timeout, verifier.verify(credential)).await {
        Ok(Ok(user)) => Ok(user),
        Ok(Err(ChatError::Auth(reason))) => {
            tracing::warn!(reason = %reason, "WebSocket auth failed");
            Err(ApiError::InvalidToken)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "WebSocket auth: verifier error");
            Err(e.into())
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "WebSocket auth timed out");
            Err(ApiError::AuthTimeout)
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user: UserIdentity, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let chat = Arc::clone(&state.chat);

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    let conn = open_session(&chat, &user, tx).await;
    let session_id = conn.session_id;

    let (dispatch_tx, dispatch_task) =
        spawn_dispatcher(Arc::clone(&chat), Arc::clone(&conn), user.clone());

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, session_id = %session_id, "WebSocket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    // Waits while the queue is full, so a slow session stops reading
                    if dispatch_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, session_id = %session_id, "Failed to parse client event");
                    conn.reply(ServerEvent::from_error(
                        &ChatError::Validation(format!("invalid event: {e}")),
                        None,
                    ));
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {
                tracing::debug!(session_id = %session_id, "Ignoring binary frame");
            }
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, user_id = %user.id, "WebSocket connection closing");
    close_session(&chat, &conn).await;

    // Queued events still run to completion; the dispatch task exits once drained
    drop(dispatch_tx);
    drop(dispatch_task);
    send_task.abort();
}

/// Start the task that runs a connection's inbound events in arrival order.
///
/// The returned sender holds at most [`DISPATCH_QUEUE_DEPTH`] pending events.
pub fn spawn_dispatcher(
    chat: Arc<ChatServices>,
    conn: Arc<Connection>,
    user: UserIdentity,
) -> (mpsc::Sender<ClientEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ClientEvent>(DISPATCH_QUEUE_DEPTH);
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatch(&chat, &conn, &user, event).await;
        }
    });
    (tx, task)
}

/// Register an authenticated connection and greet it.
///
/// Sends `connected`, announces presence on the user's first connection and
/// sends the new connection a snapshot of which friends are online.
pub async fn open_session(
    chat: &ChatServices,
    user: &UserIdentity,
    sender: mpsc::UnboundedSender<ServerEvent>,
) -> Arc<Connection> {
    let conn = Arc::new(Connection::new(user.id, sender));
    let first = chat.registry.register(Arc::clone(&conn));

    let unread_notifications = chat.notifications.unread_count(user.id).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, user_id = %user.id, "Failed to load unread notification count");
        0
    });
    conn.reply(ServerEvent::Connected {
        session_id: conn.session_id,
        user_id: user.id,
        unread_notifications,
    });

    if first {
        chat.presence.sync(user.id).await;
    }

    match chat.presence.online_friends(user.id).await {
        Ok(online_friends) => conn.reply(ServerEvent::PresenceSnapshot { online_friends }),
        Err(e) => tracing::warn!(error = %e, user_id = %user.id, "Failed to build presence snapshot"),
    }

    conn
}

/// Unregister a connection and announce offline if it was the user's last
pub async fn close_session(chat: &ChatServices, conn: &Connection) {
    tracing::info!(
        session_id = %conn.session_id,
        user_id = %conn.user_id,
        duration_ms = conn.connected_for().as_millis() as u64,
        "Session closed"
    );
    if chat.registry.unregister(conn.user_id, conn.session_id) {
        chat.presence.sync(conn.user_id).await;
    }
}

/// Run one inbound event, reporting any failure to the originating connection
pub async fn dispatch(chat: &ChatServices, conn: &Connection, user: &UserIdentity, event: ClientEvent) {
    let kind = event.kind();
    let temp_id = event.temp_id().map(str::to_owned);

    if let Err(err) = route_event(chat, conn, user, event).await {
        match &err {
            ChatError::StoreUnavailable(_) | ChatError::Internal(_) => {
                tracing::error!(error = %err, event = kind, user_id = %user.id, "Event failed");
            }
            _ => {
                tracing::debug!(error = %err, event = kind, user_id = %user.id, "Event rejected");
            }
        }
        conn.reply(ServerEvent::from_error(&err, temp_id));
    }
}

async fn route_event(
    chat: &ChatServices,
    conn: &Connection,
    user: &UserIdentity,
    event: ClientEvent,
) -> ChatResult<()> {
    use ClientEvent::*;

    match event {
        SendMessage {
            receiver_id,
            content,
            note_id,
            image_id,
            temp_id,
        } => {
            let draft = NewMessage {
                receiver_id,
                content,
                note_id,
                image_id,
            };
            let message = chat.messages.send(user, Some(conn.session_id), draft).await?;
            conn.reply(ServerEvent::MessageSentAck { temp_id, message });
        }

        FetchHistory {
            conversation_id,
            peer_id,
        } => {
            let target = history_target(conversation_id, peer_id)?;
            let (conversation_id, messages) = chat.messages.fetch_history(user, target).await?;
            conn.reply(ServerEvent::History {
                conversation_id,
                messages,
            });
        }

        MarkRead { message_id } => {
            let outcome = chat.messages.mark_read(user.id, message_id).await?;
            reply_receipt(conn, outcome);
        }

        MarkDelivered { message_id } => {
            let outcome = chat.messages.mark_delivered(user.id, message_id).await?;
            reply_receipt(conn, outcome);
        }

        FriendRequest { target_id } => {
            let request = chat.friends.request(user, target_id).await?;
            conn.reply(ServerEvent::FriendRequestSent { request });
        }

        FriendRespond { request_id, accept } => {
            chat.friends.respond(user, request_id, accept).await?;
        }

        Typing { peer_id, is_typing } => {
            chat.relay_typing(user.id, peer_id, is_typing).await?;
        }

        Signal { peer_id, payload } => {
            chat.relay_signal(user.id, peer_id, payload).await?;
        }

        Ping => conn.reply(ServerEvent::Pong),
    }

    Ok(())
}

/// Transitions are already pushed to the participants; a receipt that changed
/// nothing still tells the requester where the message stands.
fn reply_receipt(conn: &Connection, outcome: ReceiptOutcome) {
    if let ReceiptOutcome::Unchanged(message) = outcome {
        conn.reply(ServerEvent::status_update(&message));
    }
}
