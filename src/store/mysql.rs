//! MySQL-backed credential store (the production `tokens` table).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use super::{
    bounded, bounded_stream, CredentialRecord, CredentialStore, ExpiringCredential,
    RenewedCredential, SELECT_EXPIRING, SELECT_ONE, UPDATE_RENEWED,
};
use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;

pub struct MySqlTokenStore {
    pool: MySqlPool,
    query_timeout: Duration,
}

impl MySqlTokenStore {
    /// Open a pool against the configured host and ping it.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let StoreBackend::MySql {
            host,
            port,
            username,
            password,
            database,
        } = &config.backend
        else {
            return Err(StoreError::Connect(sqlx::Error::Configuration(
                "MySqlTokenStore requires a MySQL backend".into(),
            )));
        };

        let options = MySqlConnectOptions::new()
            .host(host)
            .port(*port)
            .username(username)
            .password(password)
            .database(database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.query_timeout)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        let store = Self {
            pool,
            query_timeout: config.query_timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        bounded("ping", self.query_timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(StoreError::Connect)?;
            Ok(())
        })
        .await
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for MySqlTokenStore {
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

        confirm_updated(&renewed.subject_id, affected, || async {
            Ok(self.fetch(&renewed.subject_id).await?.is_some())
        })
        .await
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

/// MySQL may count changed rather than matched rows, so an update that writes
/// identical values reports zero. Only a record that is really gone is missing.
async fn confirm_updated<F, Fut>(subject_id: &str, affected: u64, exists: F) -> Result<(), StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool, StoreError>>,
{
    if affected > 0 || exists().await? {
        Ok(())
    } else {
        Err(StoreError::NotFound(subject_id.to_string()))
    }
}

fn decode_expiring(row: &MySqlRow) -> Result<ExpiringCredential, StoreError> {
    ExpiringCredential::from_columns(
        row.try_get(0).map_err(StoreError::Row)?,
        row.try_get(1).map_err(StoreError::Row)?,
        row.try_get(2).map_err(StoreError::Row)?,
    )
}

fn decode_record(row: &MySqlRow) -> Result<CredentialRecord, StoreError> {
    Ok(CredentialRecord {
        subject_id: row.try_get(0).map_err(StoreError::Row)?,
        access_token: row.try_get(1).map_err(StoreError::Row)?,
        refresh_token: row.try_get(2).map_err(StoreError::Row)?,
        refresh_token_expiry: row.try_get(3).map_err(StoreError::Row)?,
        access_token_expiry: row.try_get(4).map_err(StoreError::Row)?,
    })
}
