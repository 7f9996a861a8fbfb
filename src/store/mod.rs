//! Credential store for delegated-access records.
//!
//! Both backends read and write the `tokens` table through the same two
//! statement shapes: a select of records whose refresh token expires before
//! a cutoff, and an update of the four mutable columns keyed by subject.
//! MySQL is the production store; SQLite serves local runs and tests.

pub mod mysql;
pub mod sqlite;

pub use mysql::MySqlTokenStore;
pub use sqlite::SqliteTokenStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;

pub(crate) const SELECT_EXPIRING: &str = r#"
    SELECT CAST(driver_fk_id AS CHAR) AS driver_fk_id, refreshToken, refreshTokenExpiryDate
    FROM tokens
    WHERE refreshTokenExpiryDate < ?
"#;

pub(crate) const UPDATE_RENEWED: &str = r#"
    UPDATE tokens
    SET accessToken = ?,
        refreshToken = ?,
        refreshTokenExpiryDate = ?,
        refreshAccessExpiryDate = ?
    WHERE driver_fk_id = ?
"#;

pub(crate) const SELECT_ONE: &str = r#"
    SELECT CAST(driver_fk_id AS CHAR) AS driver_fk_id, accessToken, refreshToken,
           refreshTokenExpiryDate, refreshAccessExpiryDate
    FROM tokens
    WHERE driver_fk_id = ?
"#;

/// Typed access to the credential table.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stream every record whose refresh token expires strictly before
    /// `now + window`. Order is unspecified; each call re-reads the table.
    fn find_expiring(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> BoxStream<'_, Result<ExpiringCredential, StoreError>>;

    /// Overwrite the four mutable fields of one record in a single statement.
    async fn persist_renewal(&self, renewed: &RenewedCredential) -> Result<(), StoreError>;

    /// Read one record back.
    async fn fetch(&self, subject_id: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Release all connections.
    async fn close(&self);
}

/// Connect to the configured backend and verify it answers.
pub async fn open(config: &StoreConfig) -> Result<Box<dyn CredentialStore>, StoreError> {
    match &config.backend {
        StoreBackend::MySql { .. } => Ok(Box::new(MySqlTokenStore::connect(config).await?)),
        StoreBackend::Sqlite { path } => {
            let store = SqliteTokenStore::connect(path, config).await?;
            store.migrate().await?;
            Ok(Box::new(store))
        }
    }
}

/// Bound a single store call by `limit`.
pub(crate) async fn bounded<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(StoreError::Timeout(op, limit)))
}

/// Bound the wait for each item of a result stream by `limit`.
///
/// The clock starts when the consumer asks for the next item, so time the
/// consumer spends between items is not charged to the cursor.
pub(crate) fn bounded_stream<'a, T>(
    stream: BoxStream<'a, Result<T, StoreError>>,
    limit: Duration,
) -> BoxStream<'a, Result<T, StoreError>>
where
    T: Send + 'a,
{
    futures::stream::unfold(stream, move |mut rows| async move {
        match tokio::time::timeout(limit, rows.next()).await {
            Ok(Some(item)) => Some((item, rows)),
            Ok(None) => None,
            Err(_) => Some((Err(StoreError::Timeout("enumeration", limit)), rows)),
        }
    })
    .boxed()
}

// ── Types ────────────────────────────────────────────────────────────────────

/// A record selected for renewal.
#[derive(Clone)]
pub struct ExpiringCredential {
    pub subject_id: String,
    pub refresh_token: String,
    pub refresh_token_expiry: DateTime<Utc>,
}

impl ExpiringCredential {
    /// Assemble a candidate from its selected columns. A NULL or empty
    /// refresh token makes the row unusable.
    pub(crate) fn from_columns(
        subject_id: String,
        refresh_token: Option<String>,
        refresh_token_expiry: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        match refresh_token.filter(|token| !token.is_empty()) {
            Some(refresh_token) => Ok(Self {
                subject_id,
                refresh_token,
                refresh_token_expiry,
            }),
            None => Err(StoreError::MissingRefreshToken(subject_id)),
        }
    }
}

impl std::fmt::Debug for ExpiringCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCredential")
            .field("subject_id", &self.subject_id)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish_non_exhaustive()
    }
}

/// The values written back after a successful token exchange.
#[derive(Clone)]
pub struct RenewedCredential {
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_expiry: DateTime<Utc>,
    pub access_token_expiry: DateTime<Utc>,
}

impl std::fmt::Debug for RenewedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewedCredential")
            .field("subject_id", &self.subject_id)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("access_token_expiry", &self.access_token_expiry)
            .finish_non_exhaustive()
    }
}

/// A full row of the `tokens` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_expiry: DateTime<Utc>,
    pub access_token_expiry: DateTime<Utc>,
}
