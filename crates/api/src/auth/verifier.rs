//! Credential verification for incoming realtime connections

use std::sync::Arc;

use async_trait::async_trait;
use jotter_shared::{ChatError, ChatResult, UserIdentity};

use super::jwt::{JwtError, JwtManager};
use crate::store::UserDirectory;

/// Validates a bearer credential and yields the identity it belongs to
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> ChatResult<UserIdentity>;
}

/// Verifies locally signed JWTs and resolves the subject through the user directory
pub struct JwtVerifier {
    jwt: JwtManager,
    users: Arc<dyn UserDirectory>,
}

impl JwtVerifier {
    pub fn new(jwt: JwtManager, users: Arc<dyn UserDirectory>) -> Self {
        Self { jwt, users }
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> ChatResult<UserIdentity> {
        let token = credential.trim();
        if token.is_empty() {
            return Err(ChatError::Auth("missing credential".to_string()));
        }

        let claims = self.jwt.validate_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected realtime credential");
            match e {
                JwtError::Expired => ChatError::Auth("token expired".to_string()),
                _ => ChatError::Auth("invalid token".to_string()),
            }
        })?;

        let user = self
            .users
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %claims.sub, "Realtime auth failed: user not found");
                ChatError::Auth("unknown user".to_string())
            })?;

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Realtime auth failed: user inactive");
            return Err(ChatError::Auth("user inactive".to_string()));
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenType;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    #[tokio::test]
    async fn test_valid_token_resolves_user() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("a@x.com", "Alice").await;
        let jwt = JwtManager::new(SECRET, 1);
        let (token, _) = jwt.generate_access_token(user.id, &user.email).unwrap();

        let verifier = JwtVerifier::new(jwt, store);
        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[tokio::test]
    async fn test_rejections() {
        let store = Arc::new(MemoryStore::new());
        let inactive = store.add_user("gone@x.com", "Gone").await;
        store.deactivate_user(inactive.id).await;
        let jwt = JwtManager::new(SECRET, 1);
        let verifier = JwtVerifier::new(jwt.clone(), store);

        // Missing
        assert!(matches!(verifier.verify("  ").await, Err(ChatError::Auth(_))));
        // Malformed
        assert!(matches!(verifier.verify("abc.def").await, Err(ChatError::Auth(_))));
        // Unknown subject
        let (token, _) = jwt.generate_access_token(Uuid::new_v4(), "x@x.com").unwrap();
        assert!(matches!(verifier.verify(&token).await, Err(ChatError::Auth(_))));
        // Inactive user
        let (token, _) = jwt.generate_access_token(inactive.id, &inactive.email).unwrap();
        assert!(matches!(verifier.verify(&token).await, Err(ChatError::Auth(_))));
        // Refresh token
        let (token, _) = jwt
            .generate_token(inactive.id, &inactive.email, TokenType::Refresh, time::Duration::hours(1))
            .unwrap();
        assert!(matches!(verifier.verify(&token).await, Err(ChatError::Auth(_))));
    }
}
