//! Error taxonomy for the engine.
//!
//! Mirrors spec.md §7: validation errors surface to the producer, storage
//! errors are logged and absorbed by the worker loop, transient execution
//! errors never leave the scheduler at all (they drive the retry/DLQ branch).

use thiserror::Error;

/// Errors a [`crate::store::JobStore`] implementation can return.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job '{0}' already exists")]
    Duplicate(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Top-level engine error. Aggregates store errors plus validation failures
/// that occur before a job ever reaches a worker.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
