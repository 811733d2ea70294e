//! Application state shared across handlers

use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::chat::ChatServices;
use crate::config::Config;
use crate::store::Stores;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chat: Arc<ChatServices>,
    pub verifier: Arc<dyn AuthVerifier>,
}

impl AppState {
    pub fn new(config: Config, stores: Stores, verifier: Arc<dyn AuthVerifier>) -> Self {
        let chat = ChatServices::new(stores, config.message_max_length);
        Self {
            config: Arc::new(config),
            chat: Arc::new(chat),
            verifier,
        }
    }
}
