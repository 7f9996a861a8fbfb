//! SQLite-backed credential store for local runs and tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;

use super::{
    bounded, bounded_stream, CredentialRecord, CredentialStore, ExpiringCredential,
    RenewedCredential, SELECT_EXPIRING, SELECT_ONE, UPDATE_RENEWED,
};
use crate::config::StoreConfig;
use crate::error::StoreError;

pub struct SqliteTokenStore {
    pool: SqlitePool,
    query_timeout: Duration,
}

impl SqliteTokenStore {
    pub async fn connect(path: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // Renewals are written while the candidate cursor is still open.
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.query_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.query_timeout)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Self {
            pool,
            query_timeout: config.query_timeout,
        })
    }

    /// Create the `tokens` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                driver_fk_id            TEXT PRIMARY KEY,
                accessToken             TEXT,
                refreshToken            TEXT,
                refreshTokenExpiryDate  DATETIME,
                refreshAccessExpiryDate DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tokens_refresh_expiry ON tokens(refreshTokenExpiryDate)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for SqliteTokenStore {
    fn find_expiring(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> BoxStream<'_, Result<ExpiringCredential, StoreError>> {
        let rows = sqlx::query(SELECT_EXPIRING)
            .bind(now + window)
            .fetch(&self.pool)
            .map(|row| match row {
                Ok(row) => decode_expiring(&row),
                Err(e) => Err(StoreError::Query(e)),
            })
            .boxed();
        bounded_stream(rows, self.query_timeout)
    }

    async fn persist_renewal(&self, renewed: &RenewedCredential) -> Result<(), StoreError> {
        let affected = bounded("update", self.query_timeout, async {
            sqlx::query(UPDATE_RENEWED)
                .bind(&renewed.access_token)
                .bind(&renewed.refresh_token)
                .bind(renewed.refresh_token_expiry)
                .bind(renewed.access_token_expiry)
                .bind(&renewed.subject_id)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected())
                .map_err(StoreError::Query)
        })
        .await?;

        if affected == 0 {
            return Err(StoreError::NotFound(renewed.subject_id.clone()));
        }

        Ok(())
    }

    async fn fetch(&self, subject_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let row = bounded("fetch", self.query_timeout, async {
            sqlx::query(SELECT_ONE)
                .bind(subject_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Query)
        })
        .await?;

        row.map(|row| decode_record(&row)).transpose()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_expiring(row: &SqliteRow) -> Result<ExpiringCredential, StoreError> {
    ExpiringCredential::from_columns(
        row.try_get(0).map_err(StoreError::Row)?,
        row.try_get(1).map_err(StoreError::Row)?,
        row.try_get(2).map_err(StoreError::Row)?,
    )
}

fn decode_record(row: &SqliteRow) -> Result<CredentialRecord, StoreError> {
    Ok(CredentialRecord {
        subject_id: row.try_get(0).map_err(StoreError::Row)?,
        access_token: row.try_get(1).map_err(StoreError::Row)?,
        refresh_token: row.try_get(2).map_err(StoreError::Row)?,
        refresh_token_expiry: row.try_get(3).map_err(StoreError::Row)?,
        access_token_expiry: row.try_get(4).map_err(StoreError::Row)?,
    })
}
