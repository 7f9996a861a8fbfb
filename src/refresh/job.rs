use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::summary::{RecordOutcome, RunSummary};
use crate::config::RenewalConfig;
use crate::error::{RecordError, RenewalError, StoreError};
use crate::providers::{OAuthProvider, TokenSet};
use crate::store::{CredentialStore, ExpiringCredential, RenewedCredential};

const MAX_ACCESS_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// What gets written into the two expiry columns after a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Both columns record the renewal moment. Consumers add `expires_in`
    /// themselves. Every renewed record stays inside the lookahead window
    /// and is renewed again on the next run.
    RenewedAt,
    /// Access expiry is `now + expires_in`; refresh expiry is `now + refresh_token_lifetime`.
    Projected {
        refresh_token_lifetime: chrono::Duration,
    },
}

impl ExpiryPolicy {
    /// Returns `(refresh_token_expiry, access_token_expiry)`.
    pub fn expiries(&self, now: DateTime<Utc>, tokens: &TokenSet) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            ExpiryPolicy::RenewedAt => (now, now),
            ExpiryPolicy::Projected {
                refresh_token_lifetime,
            } => {
                let access_ttl =
                    chrono::Duration::seconds(tokens.expires_in.min(MAX_ACCESS_TTL_SECS) as i64);
                (now + *refresh_token_lifetime, now + access_ttl)
            }
        }
    }
}

enum Step {
    Finished(RecordOutcome),
    Skipped(StoreError),
    Aborted(StoreError),
}

/// Renews every credential whose refresh token is about to expire.
pub struct RenewalJob<P> {
    provider: P,
    window: chrono::Duration,
    concurrency: usize,
    expiry_policy: ExpiryPolicy,
}

impl<P: OAuthProvider> RenewalJob<P> {
    pub fn new(provider: P, config: &RenewalConfig) -> Self {
        Self {
            provider,
            window: config.window,
            concurrency: config.concurrency.max(1),
            expiry_policy: config.expiry_policy,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Renew all candidates selected at `now`.
    ///
    /// A failed exchange or write is recorded against its subject and the
    /// batch moves on. Only a broken candidate cursor fails the run; renewals
    /// already in flight are allowed to finish first.
    pub async fn run_batch<S>(&self, store: &S, now: DateTime<Utc>) -> Result<RunSummary, RenewalError>
    where
        S: CredentialStore + ?Sized,
    {
        let cutoff = now + self.window;
        info!(
            %cutoff,
            provider = self.provider.id(),
            concurrency = self.concurrency,
            "Scanning for expiring credentials"
        );

        let candidates = store
            .find_expiring(self.window, now)
            .scan(false, |aborted, item| {
                if *aborted {
                    return future::ready(None);
                }
                if let Err(e) = &item {
                    *aborted = e.is_fatal();
                }
                future::ready(Some(item))
            });

        let steps = candidates
            .map(|item| async move {
                match item {
                    Ok(candidate) => Step::Finished(self.renew(store, candidate, now).await),
                    Err(e) if e.is_fatal() => Step::Aborted(e),
                    Err(e) => Step::Skipped(e),
                }
            })
            .buffer_unordered(self.concurrency);
        futures::pin_mut!(steps);

        let mut summary = RunSummary::new(now);
        let mut aborted = None;
        while let Some(step) = steps.next().await {
            match step {
                Step::Finished(outcome) => summary.record(outcome),
                Step::Skipped(e) => {
                    warn!(error = %e, "Skipping unusable credential row");
                    summary.skipped_rows += 1;
                }
                Step::Aborted(e) => aborted = Some(e),
            }
        }

        if let Some(e) = aborted {
            error!(
                renewed = summary.succeeded(),
                failed = summary.failures(),
                error = %e,
                "Candidate enumeration failed, remaining credentials not processed"
            );
            return Err(RenewalError::Enumeration(e));
        }

        info!(
            renewed = summary.succeeded(),
            failed = summary.failures(),
            skipped = summary.skipped_rows,
            "Renewal run complete"
        );
        Ok(summary)
    }

    async fn renew<S>(&self, store: &S, candidate: ExpiringCredential, now: DateTime<Utc>) -> RecordOutcome
    where
        S: CredentialStore + ?Sized,
    {
        let result = self.exchange_and_persist(store, &candidate, now).await;
        match &result {
            Ok(()) => info!(subject_id = %candidate.subject_id, "Refreshed tokens"),
            Err(e) => error!(subject_id = %candidate.subject_id, error = %e, "Failed to refresh tokens"),
        }

        RecordOutcome {
            subject_id: candidate.subject_id,
            result,
        }
    }

    async fn exchange_and_persist<S>(
        &self,
        store: &S,
        candidate: &ExpiringCredential,
        now: DateTime<Utc>,
    ) -> Result<(), RecordError>
    where
        S: CredentialStore + ?Sized,
    {
        let tokens = self.provider.refresh_token(&candidate.refresh_token).await?;
        debug!(
            subject_id = %candidate.subject_id,
            token_type = %tokens.token_type,
            expires_in = tokens.expires_in,
            "Exchanged refresh token"
        );

        // The old refresh token is dead from here on; losing this write loses the credential.
        let (refresh_token_expiry, access_token_expiry) = self.expiry_policy.expiries(now, &tokens);
        store
            .persist_renewal(&RenewedCredential {
                subject_id: candidate.subject_id.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                refresh_token_expiry,
                access_token_expiry,
            })
            .await?;

        Ok(())
    }
}
