//! Stock valuation error types.
//!
//! Errors come in two scopes. A [`StockError`] aborts the whole repost batch
//! and leaves the ledger untouched. A [`VoucherError`] is confined to one
//! voucher: the batch still commits and the voucher is reported as failed.

use costflow_shared::AppError;
use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{PostingTime, StockPair, VoucherLineRef, VoucherRef};
use crate::store::StoreError;
use costflow_shared::types::LocationCode;

/// Errors that abort a repost batch.
#[derive(Debug, Clone, Error)]
pub enum StockError {
    // ========== Valuation Errors ==========
    /// An outgoing movement would drive stock below zero.
    #[error("Insufficient stock for {pair} at {posting}: quantity would become {quantity_after} ({line})")]
    NegativeStock {
        /// The pair running short.
        pair: StockPair,
        /// Posting time of the offending movement.
        posting: PostingTime,
        /// Voucher line of the offending movement.
        line: VoucherLineRef,
        /// Quantity the movement would leave behind.
        quantity_after: Decimal,
    },

    /// An incoming movement has no rate and zero valuation is not allowed.
    #[error("Valuation rate is required for {pair} on {line}")]
    MissingIncomingRate {
        /// The receiving pair.
        pair: StockPair,
        /// Voucher line of the movement.
        line: VoucherLineRef,
    },

    // ========== Dependency Errors ==========
    /// A dependency points at a movement posted after its owner.
    #[error("{owner} at {owner_posting} depends on {target} posted later at {target_posting}")]
    InvalidDependencyOrder {
        /// Line owning the dependency.
        owner: VoucherLineRef,
        /// Posting time of the owner.
        owner_posting: PostingTime,
        /// Dependency target line.
        target: VoucherLineRef,
        /// Posting time of the later target movement.
        target_posting: PostingTime,
    },

    // ========== Document Errors ==========
    /// A voucher line produced an unusable movement.
    #[error("Invalid movement on {line}: {reason}")]
    InvalidMovement {
        /// Offending line.
        line: VoucherLineRef,
        /// What is wrong.
        reason: String,
    },

    /// The voucher is already submitted.
    #[error("Voucher {0} is already submitted")]
    AlreadySubmitted(VoucherRef),

    /// The voucher does not exist or is not submitted.
    #[error("Voucher {0} is not submitted")]
    NotSubmitted(VoucherRef),

    /// A repost was requested without pairs or an originating voucher.
    #[error("Repost trigger names no stock pairs")]
    EmptyTrigger,

    /// The triggering voucher itself cannot be posted.
    #[error("Voucher {} rejected: {}", .0.voucher, .0.error)]
    VoucherRejected(Box<VoucherFailure>),

    // ========== Store Errors ==========
    /// The ledger store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StockError {
    /// Returns a stable error code for logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NegativeStock { .. } => "NEGATIVE_STOCK",
            Self::MissingIncomingRate { .. } => "MISSING_INCOMING_RATE",
            Self::InvalidDependencyOrder { .. } => "INVALID_DEPENDENCY_ORDER",
            Self::InvalidMovement { .. } => "INVALID_MOVEMENT",
            Self::AlreadySubmitted(_) => "ALREADY_SUBMITTED",
            Self::NotSubmitted(_) => "NOT_SUBMITTED",
            Self::EmptyTrigger => "EMPTY_TRIGGER",
            Self::VoucherRejected(failure) => failure.error.error_code(),
            Self::Store(err) => err.error_code(),
        }
    }

    /// Returns true if retrying the same action may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::LockTimeout { .. }))
    }
}

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        match &err {
            StockError::NegativeStock { .. }
            | StockError::MissingIncomingRate { .. }
            | StockError::InvalidDependencyOrder { .. }
            | StockError::VoucherRejected(_) => Self::BusinessRule(err.to_string()),
            StockError::InvalidMovement { .. } | StockError::EmptyTrigger => {
                Self::Validation(err.to_string())
            }
            StockError::AlreadySubmitted(_) => Self::Conflict(err.to_string()),
            StockError::NotSubmitted(_) => Self::NotFound(err.to_string()),
            StockError::Store(StoreError::LockTimeout { .. }) => Self::Conflict(err.to_string()),
            StockError::Store(_) => Self::Database(err.to_string()),
        }
    }
}

/// Why a dependency could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// No movement exists for the target line.
    Missing,
    /// Movements exist but the quantity-sign filter excluded all of them.
    FilteredOut,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("no movement found"),
            Self::FilteredOut => f.write_str("no movement matches the quantity sign filter"),
        }
    }
}

/// Errors confined to one voucher.
#[derive(Debug, Clone, Error)]
pub enum VoucherError {
    /// A dependency target cannot be found.
    #[error("{owner} depends on {target}: {reason}")]
    UnresolvedDependency {
        /// Line owning the dependency.
        owner: VoucherLineRef,
        /// Missing target line.
        target: VoucherLineRef,
        /// Why resolution failed.
        reason: UnresolvedReason,
    },

    /// A location has no stock account for GL derivation.
    #[error("Location {location} has no stock account")]
    MisconfiguredLocation {
        /// Location without an account.
        location: LocationCode,
    },

    /// The voucher document is not in the store.
    #[error("Voucher document not found")]
    DocumentMissing,

    /// The ledger store failed while handling this voucher.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VoucherError {
    /// Returns a stable error code for logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnresolvedDependency { .. } => "UNRESOLVED_DEPENDENCY",
            Self::MisconfiguredLocation { .. } => "MISCONFIGURED_LOCATION",
            Self::DocumentMissing => "DOCUMENT_MISSING",
            Self::Store(err) => err.error_code(),
        }
    }
}

/// A voucher together with the error that failed it.
#[derive(Debug, Clone)]
pub struct VoucherFailure {
    /// The failed voucher.
    pub voucher: VoucherRef,
    /// What went wrong.
    pub error: VoucherError,
}

impl VoucherFailure {
    /// Creates a failure record.
    #[must_use]
    pub const fn new(voucher: VoucherRef, error: VoucherError) -> Self {
        Self { voucher, error }
    }
}

impl std::fmt::Display for VoucherFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.voucher, self.error)
    }
}
