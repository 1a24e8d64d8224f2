//! Bounded inference worker pool.
//!
//! # Architecture
//!
//! ```text
//! execute(style, photo)                      ← async, from a session task
//!     │
//!     ├─ timeout(queue_timeout, semaphore.acquire)   ── QueueTimeout
//!     │
//!     └─ spawn_blocking ─────────────────────────────────────────────┐
//!          preprocess → ModelCache::get → stylize → postprocess      │
//!          (permit released when the blocking closure returns)       │
//!     ◀──────────────────────────── Result<StylizedImage, JobError> ─┘
//! ```
//!
//! A panic anywhere inside a job surfaces as [`JobError::Internal`]; the pool
//! and every other job keep running.

pub mod executor;

use std::time::Duration;

use thiserror::Error;

use crate::imaging::PipelineError;
use crate::style::ModelError;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use executor::InferenceExecutor;

/// Why a stylization job produced no image.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The photo could not be decoded, or the result could not be encoded.
    #[error(transparent)]
    Image(#[from] PipelineError),

    /// The style model could not be loaded or failed to run.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// No worker became free within the configured wait.
    #[error("no worker available after {0:?}")]
    QueueTimeout(Duration),

    /// The executor was closed before the job got a worker.
    #[error("inference executor is shutting down")]
    ShuttingDown,

    /// The job panicked or its worker was lost.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// `true` when the failure points at the photo rather than the service.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Image(PipelineError::Decode(_)))
    }
}
