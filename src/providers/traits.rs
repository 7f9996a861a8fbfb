use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// A token pair returned by the authorization server's refresh grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: u64,
    /// Supersedes the refresh token that was exchanged.
    pub refresh_token: String,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// An authorization server that can trade a refresh token for a new pair.
///
/// Implementations make exactly one attempt per call. Retrying is left to
/// the caller, which must persist the returned refresh token before the
/// credential is used again.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "smartcar").
    fn id(&self) -> &str;

    /// Exchange `refresh_token` using the `refresh_token` grant.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ExchangeError>;
}
