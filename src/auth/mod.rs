//! Bearer token verification
//!
//! Credentials are issued by the identity service. This crate only verifies
//! the HS256 access tokens it signs with the shared secret.

mod jwt;

pub use jwt::{generate_access_token, verify_token, Claims, JwtError, TokenType};

/// Verification settings shared with the request extractors
#[derive(Debug, Clone)]
pub struct AuthConfig {
    jwt_secret: String,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}
