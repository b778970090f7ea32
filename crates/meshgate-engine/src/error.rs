//! Engine error type
//!
//! Composes the shared taxonomy from `meshgate-core` with storage
//! failures. Which variants reach an interactive caller is a policy
//! decision made at each call site: validation and exhaustion always
//! do, external command failures on routine sync paths are converted
//! into deferred [`crate::SyncOutcome`]s instead.

use meshgate_core::error::{AllocError, CommandError, ValidationError};
use meshgate_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected input, nothing committed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Address pool exhausted, peer not created
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// External command failed on a path that cannot defer
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Declared-state storage failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem failure outside the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Referenced record does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
}

impl EngineError {
    /// Convenience constructor for missing records
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        EngineError::NotFound { kind, id }
    }
}

/// Result type alias for engine operations
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
