//! Proactive renewal of refresh tokens that are about to expire.
//!
//! One run selects every credential whose refresh token expires inside the
//! lookahead window, trades each refresh token for a new pair at the
//! authorization server and writes the pair back. Failures are isolated per
//! credential; only losing the store fails the run.

mod job;
mod summary;

pub use job::{ExpiryPolicy, RenewalJob};
pub use summary::{FailedRenewal, RecordOutcome, RunSummary};

use std::time::Duration;

use chrono::{SubsecRound, Utc};
use tracing::{error, info};

use crate::config::Config;
use crate::error::RenewalError;
use crate::providers::SmartcarProvider;
use crate::store;

/// Run one renewal pass against the configured store and authorization server.
pub async fn run(config: &Config) -> Result<RunSummary, RenewalError> {
    let provider = SmartcarProvider::new(&config.provider).map_err(RenewalError::Client)?;
    let job = RenewalJob::new(provider, &config.renewal);

    let store = store::open(&config.store).await.map_err(|e| {
        error!(error = %e, "Credential store connection failed");
        RenewalError::Connectivity(e)
    })?;

    // Whole seconds, so the value written equals the value read back on DATETIME columns.
    let now = Utc::now().trunc_subsecs(0);
    let result = job.run_batch(&*store, now).await;
    store.close().await;
    result
}

/// Run [`run`] every `interval` until Ctrl-C.
pub async fn refresh_daemon(config: Config, interval: Duration) {
    info!("Token renewal daemon started (interval: {interval:?})");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run(&config).await {
                    error!("Renewal run error: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, stopping renewal daemon");
                break;
            }
        }
    }
}
