//! Ledger store errors.

use thiserror::Error;

/// Errors raised by a [`super::LedgerStore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Pair locks could not be acquired before the timeout.
    #[error("Timed out waiting for locks on {pairs} stock pair(s)")]
    LockTimeout {
        /// Number of pairs requested.
        pairs: usize,
    },

    /// A row the caller expected is missing.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Row identifier.
        id: String,
    },

    /// Shared state was poisoned by a panicking writer.
    #[error("Ledger store state is poisoned")]
    Poisoned,

    /// The backing database failed.
    #[error("Ledger store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns a stable error code for logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Poisoned => "STORE_POISONED",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }
}
