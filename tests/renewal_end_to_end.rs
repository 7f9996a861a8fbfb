use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokenkeeper::config::{Config, ProviderConfig, RenewalConfig, StoreBackend, StoreConfig};
use tokenkeeper::refresh::{self, ExpiryPolicy};
use tokenkeeper::store::{CredentialStore, SqliteTokenStore};
use tokenkeeper::RenewalError;
use wiremock::matchers::{body_string, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(db_path: &Path, token_url: String) -> Config {
    Config {
        store: StoreConfig {
            backend: StoreBackend::Sqlite {
                path: db_path.to_path_buf(),
            },
            query_timeout: Duration::from_secs(5),
            max_connections: 4,
        },
        provider: ProviderConfig {
            client_id: "client-123".into(),
            client_secret: "s3cret".into(),
            token_url,
            request_timeout: Duration::from_secs(5),
        },
        renewal: RenewalConfig {
            window: chrono::Duration::days(15),
            concurrency: 1,
            expiry_policy: ExpiryPolicy::RenewedAt,
        },
        run_interval: None,
    }
}

async fn seed(config: &Config, rows: &[(&str, &str, DateTime<Utc>)]) -> SqliteTokenStore {
    let StoreBackend::Sqlite { path } = &config.store.backend else {
        unreachable!("tests use sqlite");
    };
    let store = SqliteTokenStore::connect(path, &config.store).await.unwrap();
    store.migrate().await.unwrap();
    for (id, refresh_token, expiry) in rows {
        sqlx::query(
            "INSERT INTO tokens (driver_fk_id, accessToken, refreshToken, refreshTokenExpiryDate, refreshAccessExpiryDate) VALUES (?, 'A1', ?, ?, ?)",
        )
        .bind(*id)
        .bind(*refresh_token)
        .bind(*expiry)
        .bind(*expiry)
        .execute(store.pool())
        .await
        .unwrap();
    }
    store
}

#[tokio::test]
async fn renews_single_expiring_credential() {
    let dir = tempfile::tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"A2","token_type":"Bearer","expires_in":3600,"refresh_token":"R2"}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir.path().join("tokens.db"),
        format!("{}/oauth/token", mock_server.uri()),
    );
    let now = Utc::now().trunc_subsecs(0);
    let store = seed(&config, &[("d1", "R1", now + chrono::Duration::days(10))]).await;

    let summary = refresh::run(&config).await.unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failures(), 0);
    assert_eq!(summary.renewed, vec!["d1"]);

    let record = store.fetch("d1").await.unwrap().unwrap();
    assert_eq!(record.access_token, "A2");
    assert_eq!(record.refresh_token, "R2");
    assert_eq!(record.refresh_token_expiry, summary.started_at);
    assert_eq!(record.access_token_expiry, summary.started_at);
    store.close().await;
}

#[tokio::test]
async fn rejected_exchange_leaves_record_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=R-bad"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=R-good"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"A-new","token_type":"Bearer","expires_in":7200,"refresh_token":"R-new"}"#,
        ))
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir.path().join("tokens.db"),
        format!("{}/oauth/token", mock_server.uri()),
    );
    let now = Utc::now().trunc_subsecs(0);
    let bad_expiry = now + chrono::Duration::days(2);
    let store = seed(
        &config,
        &[
            ("bad", "R-bad", bad_expiry),
            ("good", "R-good", now + chrono::Duration::days(4)),
            ("fresh", "R-fresh", now + chrono::Duration::days(30)),
        ],
    )
    .await;

    let summary = refresh::run(&config).await.unwrap();

    assert_eq!(summary.renewed, vec!["good"]);
    assert_eq!(summary.failures(), 1);
    assert_eq!(summary.failed[0].subject_id, "bad");
    assert!(summary.failed[0].reason.contains("invalid_grant"));

    let bad = store.fetch("bad").await.unwrap().unwrap();
    assert_eq!(bad.access_token, "A1");
    assert_eq!(bad.refresh_token, "R-bad");
    assert_eq!(bad.refresh_token_expiry, bad_expiry);

    let good = store.fetch("good").await.unwrap().unwrap();
    assert_eq!(good.refresh_token, "R-new");

    let fresh = store.fetch("fresh").await.unwrap().unwrap();
    assert_eq!(fresh.refresh_token, "R-fresh");
    store.close().await;
}

#[tokio::test]
async fn null_refresh_token_is_skipped_without_an_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string("grant_type=refresh_token&refresh_token="))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_request"}"#))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=R1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"A2","token_type":"Bearer","expires_in":3600,"refresh_token":"R2"}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir.path().join("tokens.db"),
        format!("{}/oauth/token", mock_server.uri()),
    );
    let now = Utc::now().trunc_subsecs(0);
    let expiry = now + chrono::Duration::days(1);
    let store = seed(&config, &[("d1", "R1", expiry)]).await;
    sqlx::query(
        "INSERT INTO tokens (driver_fk_id, accessToken, refreshToken, refreshTokenExpiryDate, refreshAccessExpiryDate) VALUES ('no-token', 'A1', NULL, ?, ?)",
    )
    .bind(expiry)
    .bind(expiry)
    .execute(store.pool())
    .await
    .unwrap();

    let summary = refresh::run(&config).await.unwrap();

    assert_eq!(summary.renewed, vec!["d1"]);
    assert_eq!(summary.failures(), 0);
    assert_eq!(summary.skipped_rows, 1);

    let (access_token,): (String,) =
        sqlx::query_as("SELECT accessToken FROM tokens WHERE driver_fk_id = 'no-token'")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(access_token, "A1");
    store.close().await;
    mock_server.verify().await;
}

#[tokio::test]
async fn unreachable_store_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // A directory is not an openable database file.
    let config = test_config(dir.path(), "http://127.0.0.1:9/oauth/token".into());

    let err = refresh::run(&config).await.unwrap_err();

    assert!(matches!(err, RenewalError::Connectivity(_)));
}
