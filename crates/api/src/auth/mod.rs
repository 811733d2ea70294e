//! Authentication module for Jotter's realtime gateway

pub mod jwt;
pub mod verifier;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
pub use verifier::{AuthVerifier, JwtVerifier};
