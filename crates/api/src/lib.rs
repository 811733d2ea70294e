//! Jotter realtime API library
//!
//! Presence, 1:1 messaging and friend events over WebSocket for the Jotter
//! journaling app.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::{Config, LogFormat};
pub use error::{ApiError, ApiResult};
pub use state::AppState;
