//! Stock ledger valuation.
//!
//! This module implements the per-pair moving-average engine:
//! - Movement, dependency, and posting-time domain types
//! - The valuation engine applying one movement to a running state
//! - Dependency resolution across voucher lines
//! - Error types scoped to a batch or to a single voucher

pub mod dependency;
pub mod error;
pub mod types;
pub mod valuation;

#[cfg(test)]
mod valuation_props;

pub use dependency::{DependencyResolver, MovementIndex, MovementLookup, ResolveError};
pub use error::{StockError, UnresolvedReason, VoucherError, VoucherFailure};
pub use types::{
    Dependency, DependencyKind, Movement, MovementDraft, MovementStatus, PostingTime,
    QuantitySign, RunningState, StockPair, VoucherKind, VoucherLineRef, VoucherRef,
};
pub use valuation::{BatchProgress, CostBasis, ValuationEngine, ValuationSettings};
