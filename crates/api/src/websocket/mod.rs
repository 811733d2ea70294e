//! WebSocket gateway for realtime messaging
//!
//! # Architecture
//!
//! - **Connection**: an authenticated live connection and its outbound channel
//! - **Registry**: user -> live connections, with 0/1 edge reporting for presence
//! - **Handler**: Axum upgrade route, per-connection reader/writer/dispatch tasks
//! - **Events**: type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod registry;

pub use connection::Connection;
pub use events::{ClientEvent, ServerEvent};
pub use handler::ws_handler;
pub use registry::{ConnectionRegistry, RegistryStats};
