use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RecordError;

/// Terminal state of one selected credential.
#[derive(Debug)]
pub struct RecordOutcome {
    pub subject_id: String,
    pub result: Result<(), RecordError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRenewal {
    pub subject_id: String,
    pub reason: String,
}

/// Tally of one renewal run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The `now` used for selection and written by the default expiry policy.
    pub started_at: DateTime<Utc>,
    pub renewed: Vec<String>,
    pub failed: Vec<FailedRenewal>,
    /// Rows the store returned but could not decode.
    pub skipped_rows: usize,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            renewed: Vec::new(),
            failed: Vec::new(),
            skipped_rows: 0,
        }
    }

    /// Fold a sequence of per-record outcomes into a summary.
    pub fn fold<I>(started_at: DateTime<Utc>, outcomes: I) -> Self
    where
        I: IntoIterator<Item = RecordOutcome>,
    {
        outcomes
            .into_iter()
            .fold(Self::new(started_at), |mut summary, outcome| {
                summary.record(outcome);
                summary
            })
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome.result {
            Ok(()) => self.renewed.push(outcome.subject_id),
            Err(e) => self.failed.push(FailedRenewal {
                subject_id: outcome.subject_id,
                reason: e.to_string(),
            }),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.renewed.len()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }
}
