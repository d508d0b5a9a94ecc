//! Error taxonomy for pipeline assembly and execution.
//!
//! Record-level errors are recoverable: the driver loop reports them and
//! moves on to the next record. Everything else is fatal to the run.

use thiserror::Error;

/// Errors raised during pipeline assembly and execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage body (transform or peek) failed while processing one
    /// record. The record is skipped and the run continues.
    #[error("stage '{stage}' failed on a record: {source}")]
    Record {
        /// Name of the stage whose body failed.
        stage: String,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// A stage's start hook failed. The run aborts before any record
    /// is processed.
    #[error("stage '{stage}' failed to start: {source}")]
    Start {
        /// Name of the stage that failed to start.
        stage: String,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// The chain was malformed at assembly time (duplicate stage name,
    /// zero gather capacity).
    #[error("invalid pipeline definition: {0}")]
    Setup(String),

    /// A stage was activated after it had already emitted end-of-stream.
    /// Re-activating an exhausted stage is a programmer error and fails
    /// loudly rather than returning stale data.
    #[error("stage '{stage}' activated after end of stream")]
    Exhausted {
        /// Name of the stage that was re-activated.
        stage: String,
    },
}

impl PipelineError {
    /// `true` for errors the driver loop recovers from by skipping the
    /// record in progress.
    #[must_use]
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    pub(crate) fn record(stage: &str, source: anyhow::Error) -> Self {
        Self::Record {
            stage: stage.to_string(),
            source,
        }
    }
}
