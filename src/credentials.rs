//! Credential source for the socket handshake.
//!
//! Token acquisition and refresh live outside this crate. The connector only
//! asks for the current token right before it dials.

use async_trait::async_trait;

use crate::error::Result;

/// Supplies the bearer token sent in the `Authorization` header.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// True when the token is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.token.trim().is_empty()
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}
