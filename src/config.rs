use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::providers::SMARTCAR_TOKEN_URL;
use crate::refresh::ExpiryPolicy;

/// Upper bound for the day-valued settings, so `now + days` stays representable.
const MAX_DAYS: i64 = 36_500;

/// Job configuration, loaded from environment variables once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub renewal: RenewalConfig,
    /// When set, the binary renews on this interval instead of exiting after one run.
    pub run_interval: Option<Duration>,
}

// ── Credential Store ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Upper bound for connecting and for every statement.
    pub query_timeout: Duration,
    pub max_connections: u32,
}

#[derive(Clone)]
pub enum StoreBackend {
    MySql {
        host: String,
        port: u16,
        username: String,
        password: String,
        database: String,
    },
    /// Local development database.
    Sqlite { path: PathBuf },
}

impl fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::MySql {
                host,
                port,
                username,
                database,
                ..
            } => f
                .debug_struct("MySql")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("database", database)
                .finish(),
            StoreBackend::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
        }
    }
}

// ── Authorization Server ────────────────────────────────────────────────

#[derive(Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ── Renewal ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RenewalConfig {
    /// Credentials whose refresh token expires before `now + window` are renewed.
    pub window: chrono::Duration,
    /// Maximum renewals in flight. 1 processes candidates strictly one by one.
    pub concurrency: usize,
    pub expiry_policy: ExpiryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |key: &str| var(key).with_context(|| format!("{key} is required"));

        let query_timeout = Duration::from_secs(parse_or(&var, "DB_TIMEOUT_SECS", 30u64)?);
        let backend = match var("TOKENS_SQLITE_PATH") {
            Some(path) => StoreBackend::Sqlite { path: path.into() },
            None => StoreBackend::MySql {
                host: required("RDS_HOST")?,
                port: parse_or(&var, "RDS_PORT", 3306u16)?,
                username: required("RDS_USERNAME")?,
                password: required("RDS_PASSWORD")?,
                database: required("RDS_DB_NAME")?,
            },
        };

        let window = days("RENEWAL_WINDOW_DAYS", parse_or(&var, "RENEWAL_WINDOW_DAYS", 15)?)?;

        let concurrency: usize = parse_or(&var, "RENEWAL_CONCURRENCY", 1)?;
        if concurrency == 0 {
            bail!("RENEWAL_CONCURRENCY must be at least 1");
        }

        let expiry_policy = match var("EXPIRY_POLICY").as_deref() {
            None | Some("renewed_at") => ExpiryPolicy::RenewedAt,
            Some("projected") => ExpiryPolicy::Projected {
                refresh_token_lifetime: days(
                    "REFRESH_TOKEN_LIFETIME_DAYS",
                    parse_or(&var, "REFRESH_TOKEN_LIFETIME_DAYS", 60)?,
                )?,
            },
            Some(other) => bail!("Invalid EXPIRY_POLICY {other:?} (expected renewed_at or projected)"),
        };

        let run_interval = match var("RENEWAL_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("Invalid RENEWAL_INTERVAL_SECS: {raw}"))?;
                Some(Duration::from_secs(secs.max(1)))
            }
            None => None,
        };

        Ok(Config {
            store: StoreConfig {
                backend,
                query_timeout,
                max_connections: 4,
            },
            provider: ProviderConfig {
                client_id: required("SMARTCAR_CLIENT_ID")?,
                client_secret: required("SMARTCAR_CLIENT_SECRET")?,
                token_url: var("SMARTCAR_TOKEN_URL").unwrap_or_else(|| SMARTCAR_TOKEN_URL.into()),
                request_timeout: Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", 30u64)?),
            },
            renewal: RenewalConfig {
                window,
                concurrency,
                expiry_policy,
            },
            run_interval,
        })
    }
}

fn days(key: &str, value: i64) -> Result<chrono::Duration> {
    if value <= 0 {
        bail!("{key} must be positive, got {value}");
    }
    if value > MAX_DAYS {
        bail!("{key} must be at most {MAX_DAYS}, got {value}");
    }
    chrono::Duration::try_days(value).with_context(|| format!("{key} out of range: {value}"))
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {key}: {raw}")),
        None => Ok(default),
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}
