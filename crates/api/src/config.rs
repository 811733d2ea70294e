//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Realtime
    pub ws_auth_timeout_ms: u64,
    pub message_max_length: usize,

    // Logging
    pub log_format: LogFormat,
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Realtime
            ws_auth_timeout_ms: {
                let timeout: u64 = env::var("WS_AUTH_TIMEOUT_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::Invalid("WS_AUTH_TIMEOUT_MS must be an integer"))?;
                if timeout == 0 {
                    return Err(ConfigError::Invalid("WS_AUTH_TIMEOUT_MS must be positive"));
                }
                timeout
            },
            message_max_length: env::var("MESSAGE_MAX_LENGTH")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),

            // Logging
            log_format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => return Err(ConfigError::Invalid("LOG_FORMAT must be 'pretty' or 'json'")),
            },
        })
    }

    /// Upper bound on the websocket authentication handshake
    pub fn ws_auth_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_auth_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "WS_AUTH_TIMEOUT_MS",
            "MESSAGE_MAX_LENGTH",
            "LOG_FORMAT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.ws_auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.message_max_length, 4000);
        assert_eq!(config.log_format, LogFormat::Pretty);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        cleanup_config();
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );

        match Config::from_env() {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing(DATABASE_URL), got: {:?}", other),
        }

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_weak_jwt_secret_rejected() {
        cleanup_config();
        setup_minimal_config();
        env::set_var("JWT_SECRET", "short");

        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_invalid_realtime_settings() {
        cleanup_config();
        setup_minimal_config();

        env::set_var("WS_AUTH_TIMEOUT_MS", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("WS_AUTH_TIMEOUT_MS", "soon");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("WS_AUTH_TIMEOUT_MS", "2500");
        env::set_var("LOG_FORMAT", "JSON");
        let config = Config::from_env().unwrap();
        assert_eq!(config.ws_auth_timeout(), Duration::from_millis(2500));
        assert_eq!(config.log_format, LogFormat::Json);

        env::set_var("LOG_FORMAT", "xml");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        cleanup_config();
    }
}
