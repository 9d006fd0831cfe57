//! Posting service options and reports.

use std::time::Duration;

use costflow_shared::types::RepostId;
use costflow_shared::{CancellationPolicy, RepostConfig};

use crate::gl::ReconcileReport;
use crate::repost::RepostOutcome;

/// Repost and reconciliation behaviour of the posting service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Reconcile only vouchers whose movement values changed.
    pub only_if_value_changed: bool,
    /// Decimal places used when comparing ledger nets.
    pub comparison_precision: u32,
    /// How long to wait for pair locks.
    pub lock_timeout: Duration,
    /// Window size above which a warning is logged.
    pub large_window_warning: usize,
    /// What cancelling does to movements.
    pub cancellation_policy: CancellationPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&RepostConfig::default())
    }
}

impl From<&RepostConfig> for ServiceOptions {
    fn from(config: &RepostConfig) -> Self {
        Self {
            only_if_value_changed: config.only_if_value_changed,
            comparison_precision: config.comparison_precision,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            large_window_warning: config.large_window_warning,
            cancellation_policy: config.cancellation_policy,
        }
    }
}

/// Everything one document action did to the stock and general ledgers.
#[derive(Debug, Clone, Default)]
pub struct PostingReport {
    /// Correlates log lines of this run.
    pub repost_id: RepostId,
    /// Recomputed movements and affected vouchers.
    pub repost: RepostOutcome,
    /// Ledger actions per voucher.
    pub reconciliation: ReconcileReport,
}

impl PostingReport {
    /// Returns true if no voucher failed in the repost or the reconciliation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.repost.failures.is_empty() && self.reconciliation.failures.is_empty()
    }
}
