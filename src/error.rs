use std::time::Duration;

// ── Credential Store ────────────────────────────────────────────────────

/// Errors raised by a [`CredentialStore`](crate::store::CredentialStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to connect to credential store: {0}")]
    Connect(sqlx::Error),

    #[error("Credential query failed: {0}")]
    Query(sqlx::Error),

    /// A single row could not be decoded. The cursor itself is still healthy.
    #[error("Unreadable credential row: {0}")]
    Row(sqlx::Error),

    /// A selected row has no refresh token to exchange.
    #[error("Credential {0} has no refresh token")]
    MissingRefreshToken(String),

    #[error("No credential record for subject {0}")]
    NotFound(String),

    #[error("Credential store {0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
}

impl StoreError {
    /// Whether this error ends the candidate enumeration.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StoreError::Row(_) | StoreError::MissingRefreshToken(_) | StoreError::NotFound(_)
        )
    }
}

// ── Token Exchange ──────────────────────────────────────────────────────

/// Errors raised by the refresh-token grant against the authorization server.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Authorization server returned {status}: {body}")]
    AuthServer { status: u16, body: String },

    #[error("Token request failed: {0}")]
    Transport(reqwest::Error),

    #[error("Failed to parse token response: {0}")]
    Decode(serde_json::Error),
}

// ── Renewal ─────────────────────────────────────────────────────────────

/// Failure of a single credential renewal. Never aborts the batch.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("token exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("persisting renewed tokens failed: {0}")]
    Persist(#[from] StoreError),
}

/// Run-level failure. Returned to the invoker as the outcome of the run.
#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("Credential store unavailable: {0}")]
    Connectivity(StoreError),

    #[error("Candidate enumeration aborted: {0}")]
    Enumeration(StoreError),

    #[error("Failed to initialise token client: {0}")]
    Client(ExchangeError),
}
