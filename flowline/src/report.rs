//! Run-scoped identity and counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a single pipeline run.
///
/// One record failing never aborts a run, so callers need the totals to
/// know what actually happened: how many records came in, how many units
/// reached the consumer, and how many were skipped because a stage body
/// failed on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identity of this run.
    pub run_id: Uuid,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub finished_at: DateTime<Utc>,
    /// Records pulled from the input source.
    pub records_in: u64,
    /// Units (records or batches) delivered to the consumer.
    pub delivered: u64,
    /// Records skipped because a stage body failed on them.
    pub failed: u64,
    /// `true` when the consumer ended the run before the input was
    /// exhausted.
    pub stopped_early: bool,
}

impl RunReport {
    pub(crate) fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            records_in: 0,
            delivered: 0,
            failed: 0,
            stopped_early: false,
        }
    }

    pub(crate) fn complete(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
