//! Postgres stock ledger repository.
//!
//! Each document action runs in one database transaction. Pair locks are
//! transaction-scoped advisory locks taken in pair order, the repost window
//! is read under them, and changed movements are written back before the
//! general ledger of every affected voucher is reconciled inside its own
//! savepoint. An engine error rolls the whole transaction back.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use costflow_core::gl::{ReconcileAction, ReconcilePlan, ReconcileReport, Reconciler};
use costflow_core::posting::change::{Change, require_submitted};
use costflow_core::posting::checks;
use costflow_core::repost::{RepostEngine, RepostOutcome, RepostTrigger, RepostWindow, scope};
use costflow_core::stock::{
    Movement, MovementDraft, MovementStatus, PostingTime, RunningState, StockError, StockPair,
    ValuationSettings, VoucherError, VoucherFailure, VoucherLineRef, VoucherRef,
};
use costflow_core::store::{StoreError, StoredVoucher, VoucherStatus};
use costflow_core::voucher::{LocationAccounts, Voucher, VoucherSource};
use costflow_core::{PostingReport, ServiceOptions};
use costflow_shared::types::{MovementId, RepostId};
use costflow_shared::{AppConfig, AppError, CancellationPolicy};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Statement, TransactionTrait,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::rows;
use crate::entities::{gl_entries, movement_dependencies, stock_movements, vouchers};

/// Error types for stock ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StockLedgerError {
    /// Valuation or document error that aborts the action.
    #[error(transparent)]
    Stock(#[from] StockError),

    /// Error confined to one voucher.
    #[error(transparent)]
    Voucher(#[from] VoucherError),

    /// A stored row cannot be read back into the domain.
    #[error("Corrupt stock ledger row {id}: {reason}")]
    CorruptRow {
        /// Row identifier.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A stored document cannot be encoded or decoded.
    #[error("Voucher document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl StockLedgerError {
    /// Returns a stable error code for logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Stock(err) => err.error_code(),
            Self::Voucher(err) => err.error_code(),
            Self::CorruptRow { .. } => "CORRUPT_ROW",
            Self::Document(_) => "DOCUMENT_ENCODING",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if retrying the same action may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stock(err) if err.is_retryable())
    }

    fn into_voucher_error(self) -> VoucherError {
        match self {
            Self::Voucher(err) => err,
            Self::Stock(StockError::Store(err)) => VoucherError::Store(err),
            other => VoucherError::Store(StoreError::Backend(other.to_string())),
        }
    }
}

impl From<StockLedgerError> for AppError {
    fn from(err: StockLedgerError) -> Self {
        match err {
            StockLedgerError::Stock(err) => err.into(),
            StockLedgerError::Voucher(err) => Self::BusinessRule(err.to_string()),
            StockLedgerError::CorruptRow { .. } | StockLedgerError::Document(_) => {
                Self::Internal(err.to_string())
            }
            StockLedgerError::Database(err) => Self::Database(err.to_string()),
        }
    }
}

/// Postgres reports an expired `lock_timeout` as SQLSTATE 55P03.
fn lock_error(err: DbErr, pairs: usize) -> StockLedgerError {
    let message = err.to_string();
    if message.contains("55P03") || message.contains("lock timeout") {
        StockError::from(StoreError::LockTimeout { pairs }).into()
    } else {
        err.into()
    }
}

/// Pairs locked by the current transaction.
#[derive(Debug, Default)]
struct HeldPairs(BTreeSet<StockPair>);

impl HeldPairs {
    /// Takes advisory locks on pairs not yet held, in pair order.
    ///
    /// The locks are released when the transaction ends.
    async fn extend(
        &mut self,
        txn: &DatabaseTransaction,
        pairs: &BTreeSet<StockPair>,
    ) -> Result<(), StockLedgerError> {
        let missing: Vec<StockPair> = pairs.difference(&self.0).cloned().collect();
        for pair in &missing {
            txn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))",
                [pair.to_string().into()],
            ))
            .await
            .map_err(|err| lock_error(err, missing.len()))?;
        }
        if !missing.is_empty() {
            debug!(pairs = missing.len(), held = self.0.len(), "Pair locks acquired");
        }
        self.0.extend(missing);
        Ok(())
    }
}

// ========== Query helpers ==========

fn live() -> Condition {
    Condition::all()
        .add(stock_movements::Column::Status.ne(MovementStatus::Cancelled.as_str()))
}

fn for_pairs(pairs: &BTreeSet<StockPair>) -> Condition {
    pairs.iter().fold(Condition::any(), |condition, pair| {
        condition.add(
            Condition::all()
                .add(stock_movements::Column::Item.eq(pair.item.as_str()))
                .add(stock_movements::Column::Location.eq(pair.location.as_str())),
        )
    })
}

fn for_pair(pair: &StockPair) -> Condition {
    Condition::all()
        .add(stock_movements::Column::Item.eq(pair.item.as_str()))
        .add(stock_movements::Column::Location.eq(pair.location.as_str()))
}

/// Movements at or after `from` in `(date, time, sequence)` order.
fn at_or_after(from: &PostingTime) -> Result<Condition, StockLedgerError> {
    use stock_movements::Column;

    let sequence = rows::sequence_column(from.sequence)?;
    Ok(Condition::any()
        .add(Column::PostingDate.gt(from.date))
        .add(
            Condition::all().add(Column::PostingDate.eq(from.date)).add(
                Condition::any().add(Column::PostingTime.gt(from.time)).add(
                    Condition::all()
                        .add(Column::PostingTime.eq(from.time))
                        .add(Column::Sequence.gte(sequence)),
                ),
            ),
        ))
}

/// Movements strictly before `before` in `(date, time, sequence)` order.
fn strictly_before(before: &PostingTime) -> Result<Condition, StockLedgerError> {
    use stock_movements::Column;

    let sequence = rows::sequence_column(before.sequence)?;
    Ok(Condition::any()
        .add(Column::PostingDate.lt(before.date))
        .add(
            Condition::all().add(Column::PostingDate.eq(before.date)).add(
                Condition::any().add(Column::PostingTime.lt(before.time)).add(
                    Condition::all()
                        .add(Column::PostingTime.eq(before.time))
                        .add(Column::Sequence.lt(sequence)),
                ),
            ),
        ))
}

fn for_voucher(voucher: &VoucherRef) -> Condition {
    Condition::all()
        .add(stock_movements::Column::VoucherKind.eq(voucher.kind.as_str()))
        .add(stock_movements::Column::VoucherId.eq(voucher.id.as_str()))
}

fn for_lines(lines: &BTreeSet<VoucherLineRef>) -> Condition {
    lines.iter().fold(Condition::any(), |condition, line| {
        condition.add(
            for_voucher(&line.voucher)
                .add(stock_movements::Column::VoucherLineId.eq(line.line_id.as_str())),
        )
    })
}

fn dependencies_on(lines: &BTreeSet<VoucherLineRef>) -> Condition {
    use movement_dependencies::Column;

    lines.iter().fold(Condition::any(), |condition, line| {
        condition.add(
            Condition::all()
                .add(Column::TargetKind.eq(line.voucher.kind.as_str()))
                .add(Column::TargetVoucherId.eq(line.voucher.id.as_str()))
                .add(Column::TargetLineId.eq(line.line_id.as_str())),
        )
    })
}

fn gl_for_voucher(voucher: &VoucherRef) -> Condition {
    Condition::all()
        .add(gl_entries::Column::VoucherKind.eq(voucher.kind.as_str()))
        .add(gl_entries::Column::VoucherId.eq(voucher.id.as_str()))
}

/// Attaches dependency rows to movement rows.
async fn hydrate<C: ConnectionTrait>(
    conn: &C,
    models: Vec<stock_movements::Model>,
) -> Result<Vec<Movement>, StockLedgerError> {
    if models.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = models.iter().map(|row| row.id).collect();
    let mut dependencies: HashMap<Uuid, Vec<movement_dependencies::Model>> = HashMap::new();
    for dep in movement_dependencies::Entity::find()
        .filter(movement_dependencies::Column::MovementId.is_in(ids))
        .order_by_asc(movement_dependencies::Column::Position)
        .all(conn)
        .await?
    {
        dependencies.entry(dep.movement_id).or_default().push(dep);
    }

    models
        .into_iter()
        .map(|row| {
            let deps = dependencies.remove(&row.id).unwrap_or_default();
            rows::movement_from_row(row, deps)
        })
        .collect()
}

/// Stock ledger repository over Postgres.
#[derive(Debug, Clone)]
pub struct StockLedgerRepository {
    db: DatabaseConnection,
    settings: ValuationSettings,
    options: ServiceOptions,
    accounts: LocationAccounts,
}

impl StockLedgerRepository {
    /// Creates a new stock ledger repository.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        settings: ValuationSettings,
        options: ServiceOptions,
        accounts: LocationAccounts,
    ) -> Self {
        Self {
            db,
            settings,
            options,
            accounts,
        }
    }

    /// Creates a repository configured from application config.
    #[must_use]
    pub fn from_config(db: DatabaseConnection, config: &AppConfig, accounts: LocationAccounts) -> Self {
        Self::new(
            db,
            ValuationSettings::from(&config.valuation),
            ServiceOptions::from(&config.repost),
            accounts,
        )
    }

    /// Returns the repost options.
    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Posts a new document.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the document is already submitted,
    /// if a movement cannot be valued, or if any repost it triggers fails.
    pub async fn submit(&self, voucher: Voucher) -> Result<PostingReport, StockLedgerError> {
        self.execute(Change::submit(voucher)?).await
    }

    /// Reverses a submitted document.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the document is not submitted or if
    /// removing its movements makes a later movement invalid.
    pub async fn cancel(&self, voucher: &VoucherRef) -> Result<PostingReport, StockLedgerError> {
        let stored = require_submitted(voucher, Self::load_voucher(&self.db, voucher).await?)?;
        let live = self.live_movements(&self.db, voucher).await?;
        self.execute(Change::cancel(stored, &live)).await
    }

    /// Replaces a submitted document with a new version in one transaction.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the original is not submitted or if
    /// the replacement cannot be posted.
    pub async fn amend(
        &self,
        voucher: &VoucherRef,
        replacement: Voucher,
    ) -> Result<PostingReport, StockLedgerError> {
        let stored = require_submitted(voucher, Self::load_voucher(&self.db, voucher).await?)?;
        let live = self.live_movements(&self.db, voucher).await?;
        self.execute(Change::amend(stored, &live, replacement)?).await
    }

    /// Recomputes every movement of the trigger's pairs from its posting time.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::EmptyTrigger`] if no pairs can be determined, or
    /// any engine error, in which case nothing is written.
    pub async fn repost(&self, trigger: RepostTrigger) -> Result<PostingReport, StockLedgerError> {
        let origin_live = match &trigger.origin {
            Some(origin) if trigger.pairs.is_empty() => {
                self.live_movements(&self.db, origin).await?
            }
            _ => Vec::new(),
        };
        self.execute(Change::repost(trigger, &origin_live)?).await
    }

    /// Brings the ledger entries of each voucher in line with its movements.
    ///
    /// A voucher that fails is reported and its writes are rolled back to
    /// its savepoint; the others proceed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the surrounding transaction fails.
    pub async fn reconcile<'v, I>(&self, vouchers: I) -> Result<ReconcileReport, StockLedgerError>
    where
        I: IntoIterator<Item = &'v VoucherRef>,
    {
        let txn = self.db.begin().await?;
        let report = self.reconcile_in(&txn, vouchers).await?;
        txn.commit().await?;
        Ok(report)
    }

    /// Returns the running state after a pair's last live movement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn balance(&self, pair: &StockPair) -> Result<RunningState, StockLedgerError> {
        let last = stock_movements::Entity::find()
            .filter(live())
            .filter(for_pair(pair))
            .order_by_desc(stock_movements::Column::PostingDate)
            .order_by_desc(stock_movements::Column::PostingTime)
            .order_by_desc(stock_movements::Column::Sequence)
            .one(&self.db)
            .await?;
        Self::state_of(&self.db, last).await
    }

    /// Returns every pair with a live movement at or after `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn pairs_since(
        &self,
        from: &PostingTime,
    ) -> Result<BTreeSet<StockPair>, StockLedgerError> {
        let pairs: Vec<(String, String)> = stock_movements::Entity::find()
            .select_only()
            .column(stock_movements::Column::Item)
            .column(stock_movements::Column::Location)
            .distinct()
            .filter(live())
            .filter(at_or_after(from)?)
            .into_tuple()
            .all(&self.db)
            .await?;
        Ok(pairs
            .into_iter()
            .map(|(item, location)| StockPair::new(item, location))
            .collect())
    }

    /// Returns the live movements of a pair in posting order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn history(&self, pair: &StockPair) -> Result<Vec<Movement>, StockLedgerError> {
        let rows = stock_movements::Entity::find()
            .filter(live())
            .filter(for_pair(pair))
            .order_by_asc(stock_movements::Column::PostingDate)
            .order_by_asc(stock_movements::Column::PostingTime)
            .order_by_asc(stock_movements::Column::Sequence)
            .all(&self.db)
            .await?;
        hydrate(&self.db, rows).await
    }

    /// Returns every movement of a voucher, cancelled ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn movements_for_voucher(
        &self,
        voucher: &VoucherRef,
    ) -> Result<Vec<Movement>, StockLedgerError> {
        Self::voucher_movements(&self.db, voucher).await
    }

    /// Returns the persisted ledger entries of a voucher.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn gl_entries(
        &self,
        voucher: &VoucherRef,
    ) -> Result<Vec<costflow_core::gl::PersistedLedgerEntry>, StockLedgerError> {
        gl_entries::Entity::find()
            .filter(gl_for_voucher(voucher))
            .order_by_asc(gl_entries::Column::Account)
            .all(&self.db)
            .await?
            .into_iter()
            .map(rows::gl_entry_from_row)
            .collect()
    }

    /// Loads a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the row is unreadable.
    pub async fn voucher(
        &self,
        voucher: &VoucherRef,
    ) -> Result<Option<StoredVoucher>, StockLedgerError> {
        Self::load_voucher(&self.db, voucher).await
    }

    async fn execute(&self, change: Change) -> Result<PostingReport, StockLedgerError> {
        let repost_id = RepostId::new();
        info!(
            %repost_id,
            reason = %change.reason,
            from = %change.from,
            pairs = change.pairs.len(),
            "Repost started"
        );

        let txn = self.db.begin().await?;
        txn.execute_unprepared(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.options.lock_timeout.as_millis()
        ))
        .await?;

        let mut held = HeldPairs::default();
        let outcome = match self.apply_change(&txn, &change, &mut held).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    %repost_id,
                    code = err.error_code(),
                    error = %err,
                    "Repost aborted"
                );
                txn.rollback().await?;
                return Err(err);
            }
        };

        let targets = change.reconcile_targets(&outcome, &self.options);
        let reconciliation = self.reconcile_in(&txn, &targets).await?;
        txn.commit().await?;

        info!(
            %repost_id,
            recomputed = outcome.recomputed,
            updated = outcome.updates.len(),
            reconciled = reconciliation.actions.len(),
            failures = outcome.failures.len() + reconciliation.failures.len(),
            "Repost finished"
        );
        Ok(PostingReport {
            repost_id,
            repost: outcome,
            reconciliation,
        })
    }

    async fn apply_change(
        &self,
        txn: &DatabaseTransaction,
        change: &Change,
        held: &mut HeldPairs,
    ) -> Result<RepostOutcome, StockLedgerError> {
        // 1. Lock, then check document status again under the locks
        held.extend(txn, &change.pairs).await?;
        change.check_status(
            Self::status_of(txn, change.cancelled_ref()).await?,
            Self::status_of(txn, change.submitted_ref()).await?,
        )?;

        // 2. Cancel the replaced document's movements
        if let Some(stored) = &change.cancel {
            self.cancel_movements(txn, &stored.document.voucher_ref())
                .await?;
        }

        // 3. Append the new document's movements
        let mut appended = Vec::new();
        if let Some(submission) = &change.submit {
            appended = Self::append(txn, &submission.drafts).await?;
        }

        // 4. Recompute the window
        let window = Self::collect_window(txn, change, held).await?;
        let outcome = RepostEngine::new(&self.settings)
            .warn_above(self.options.large_window_warning)
            .run(window)?;

        // 5. The triggering document must itself be postable
        if let Some(submission) = &change.submit {
            checks::accept_document(&submission.document, &appended, &outcome, &self.accounts)?;
        }

        // 6. Write back
        for movement in &outcome.updates {
            rows::computed_fields(movement).update(txn).await?;
        }
        if let Some(stored) = &change.cancel {
            Self::save_voucher(txn, &stored.document, VoucherStatus::Cancelled).await?;
        }
        if let Some(submission) = &change.submit {
            Self::save_voucher(txn, &submission.document, VoucherStatus::Submitted).await?;
        }

        Ok(outcome)
    }

    /// Loads live movements at or after the change's start for its pairs,
    /// widening the pair set until no outside movement depends on the window
    /// or on a line the change cancels.
    async fn collect_window(
        txn: &DatabaseTransaction,
        change: &Change,
        held: &mut HeldPairs,
    ) -> Result<RepostWindow, StockLedgerError> {
        let from = change.from;
        let mut pairs = change.pairs.clone();
        let movements = loop {
            held.extend(txn, &pairs).await?;
            let rows = stock_movements::Entity::find()
                .filter(live())
                .filter(for_pairs(&pairs))
                .filter(at_or_after(&from)?)
                .order_by_asc(stock_movements::Column::PostingDate)
                .order_by_asc(stock_movements::Column::PostingTime)
                .order_by_asc(stock_movements::Column::Sequence)
                .lock_exclusive()
                .all(txn)
                .await?;
            let movements = hydrate(txn, rows).await?;
            let dependents =
                Self::dependents_of(txn, &change.scope_lines(&movements), &from).await?;
            let extra = scope::new_pairs(&pairs, &dependents);
            if extra.is_empty() {
                break movements;
            }
            debug!(added = extra.len(), "Repost scope widened by dependents");
            pairs.extend(extra);
        };

        // Targets before the window are read-only but still locked.
        let targets = scope::dependency_targets(&movements);
        let context = if targets.is_empty() {
            Vec::new()
        } else {
            let context_pairs: BTreeSet<StockPair> = stock_movements::Entity::find()
                .filter(for_lines(&targets))
                .all(txn)
                .await?
                .into_iter()
                .map(|row| StockPair::new(row.item, row.location))
                .collect();
            held.extend(txn, &context_pairs).await?;
            let rows = stock_movements::Entity::find()
                .filter(for_lines(&targets))
                .all(txn)
                .await?;
            hydrate(txn, rows).await?
        };

        let mut seeds = BTreeMap::new();
        for pair in &pairs {
            let last = stock_movements::Entity::find()
                .filter(live())
                .filter(for_pair(pair))
                .filter(strictly_before(&from)?)
                .order_by_desc(stock_movements::Column::PostingDate)
                .order_by_desc(stock_movements::Column::PostingTime)
                .order_by_desc(stock_movements::Column::Sequence)
                .one(txn)
                .await?;
            seeds.insert(pair.clone(), Self::state_of(txn, last).await?);
        }

        Ok(RepostWindow::new(from, movements, seeds, context))
    }

    async fn dependents_of(
        txn: &DatabaseTransaction,
        lines: &BTreeSet<VoucherLineRef>,
        from: &PostingTime,
    ) -> Result<Vec<Movement>, StockLedgerError> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let owners: BTreeSet<Uuid> = movement_dependencies::Entity::find()
            .filter(dependencies_on(lines))
            .all(txn)
            .await?
            .into_iter()
            .map(|dep| dep.movement_id)
            .collect();
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let rows = stock_movements::Entity::find()
            .filter(stock_movements::Column::Id.is_in(owners))
            .filter(live())
            .filter(at_or_after(from)?)
            .all(txn)
            .await?;
        hydrate(txn, rows).await
    }

    async fn state_of<C: ConnectionTrait>(
        conn: &C,
        row: Option<stock_movements::Model>,
    ) -> Result<RunningState, StockLedgerError> {
        let Some(row) = row else {
            return Ok(RunningState::default());
        };
        let movement = hydrate(conn, vec![row]).await?;
        Ok(movement.first().map(RunningState::after).unwrap_or_default())
    }

    async fn append(
        txn: &DatabaseTransaction,
        drafts: &[MovementDraft],
    ) -> Result<Vec<Movement>, StockLedgerError> {
        let mut appended = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let movement = Movement::from_draft(draft.clone(), MovementId::new(), 0);
            appended.push(Self::insert_movement(txn, movement).await?);
        }
        Ok(appended)
    }

    /// Inserts a movement and its dependencies, taking the sequence the
    /// database assigned.
    async fn insert_movement(
        txn: &DatabaseTransaction,
        mut movement: Movement,
    ) -> Result<Movement, StockLedgerError> {
        let row = rows::new_movement(&movement).insert(txn).await?;
        movement.posting.sequence =
            u64::try_from(row.sequence).map_err(|_| StockLedgerError::CorruptRow {
                id: row.id.to_string(),
                reason: format!("negative sequence {}", row.sequence),
            })?;
        let dependencies = rows::new_dependencies(&movement);
        if !dependencies.is_empty() {
            movement_dependencies::Entity::insert_many(dependencies)
                .exec(txn)
                .await?;
        }
        Ok(movement)
    }

    async fn cancel_movements(
        &self,
        txn: &DatabaseTransaction,
        voucher: &VoucherRef,
    ) -> Result<(), StockLedgerError> {
        let live = self.live_movements(txn, voucher).await?;
        for original in &live {
            let mut cancelled = original.clone();
            cancelled.status = MovementStatus::Cancelled;
            rows::computed_fields(&cancelled).update(txn).await?;

            if self.options.cancellation_policy == CancellationPolicy::CompensatingEntry {
                Self::insert_movement(txn, original.mirror(MovementId::new(), 0)).await?;
            }
        }
        debug!(
            voucher = %voucher,
            movements = live.len(),
            policy = ?self.options.cancellation_policy,
            "Movements cancelled"
        );
        Ok(())
    }

    async fn save_voucher(
        txn: &DatabaseTransaction,
        document: &Voucher,
        status: VoucherStatus,
    ) -> Result<(), StockLedgerError> {
        vouchers::Entity::insert(rows::voucher_row(document, status)?)
            .on_conflict(
                OnConflict::columns([vouchers::Column::VoucherKind, vouchers::Column::VoucherId])
                    .update_columns([
                        vouchers::Column::Status,
                        vouchers::Column::PostingDate,
                        vouchers::Column::Document,
                        vouchers::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn reconcile_in<'v, I>(
        &self,
        txn: &DatabaseTransaction,
        vouchers: I,
    ) -> Result<ReconcileReport, StockLedgerError>
    where
        I: IntoIterator<Item = &'v VoucherRef>,
    {
        let reconciler = Reconciler::new(self.options.comparison_precision);
        let mut report = ReconcileReport::default();
        for voucher in vouchers {
            let savepoint = txn.begin().await?;
            match self.reconcile_one(&savepoint, &reconciler, voucher).await {
                Ok(action) => {
                    savepoint.commit().await?;
                    debug!(voucher = %voucher, ?action, "Reconciled voucher");
                    report.record(voucher.clone(), action);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    let err = err.into_voucher_error();
                    warn!(
                        voucher = %voucher,
                        code = err.error_code(),
                        error = %err,
                        "Voucher reconciliation failed"
                    );
                    report.fail(VoucherFailure::new(voucher.clone(), err));
                }
            }
        }
        Ok(report)
    }

    async fn reconcile_one(
        &self,
        txn: &DatabaseTransaction,
        reconciler: &Reconciler,
        voucher: &VoucherRef,
    ) -> Result<ReconcileAction, StockLedgerError> {
        let stored = Self::load_voucher(txn, voucher)
            .await?
            .ok_or(VoucherError::DocumentMissing)?;
        let expected = match stored.status {
            VoucherStatus::Cancelled => Vec::new(),
            VoucherStatus::Submitted => {
                let movements = Self::voucher_movements(txn, voucher).await?;
                stored
                    .document
                    .expected_ledger_entries(&movements, &self.accounts)?
            }
        };
        let persisted = gl_entries::Entity::find()
            .filter(gl_for_voucher(voucher))
            .all(txn)
            .await?
            .into_iter()
            .map(rows::gl_entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let posting_date = stored.document.header().posting_date;

        let action = match reconciler.plan(&expected, &persisted) {
            ReconcilePlan::Unchanged => ReconcileAction::Unchanged,
            ReconcilePlan::Insert(entries) => ReconcileAction::Inserted {
                inserted: Self::replace_gl_entries(txn, voucher, posting_date, &entries).await?,
            },
            ReconcilePlan::Rewrite(entries) => ReconcileAction::Rewritten {
                deleted: persisted.len(),
                inserted: Self::replace_gl_entries(txn, voucher, posting_date, &entries).await?,
            },
            ReconcilePlan::Delete => ReconcileAction::Deleted {
                deleted: Self::delete_gl_entries(txn, voucher).await?,
            },
        };
        Ok(action)
    }

    async fn replace_gl_entries(
        txn: &DatabaseTransaction,
        voucher: &VoucherRef,
        posting_date: chrono::NaiveDate,
        entries: &[costflow_core::gl::ExpectedLedgerEntry],
    ) -> Result<usize, StockLedgerError> {
        Self::delete_gl_entries(txn, voucher).await?;
        if entries.is_empty() {
            return Ok(0);
        }
        gl_entries::Entity::insert_many(
            entries
                .iter()
                .map(|entry| rows::new_gl_entry(voucher, posting_date, entry)),
        )
        .exec(txn)
        .await?;
        Ok(entries.len())
    }

    async fn delete_gl_entries(
        txn: &DatabaseTransaction,
        voucher: &VoucherRef,
    ) -> Result<usize, StockLedgerError> {
        let result = gl_entries::Entity::delete_many()
            .filter(gl_for_voucher(voucher))
            .exec(txn)
            .await?;
        Ok(usize::try_from(result.rows_affected).unwrap_or(usize::MAX))
    }

    async fn load_voucher<C: ConnectionTrait>(
        conn: &C,
        voucher: &VoucherRef,
    ) -> Result<Option<StoredVoucher>, StockLedgerError> {
        vouchers::Entity::find_by_id((voucher.kind.as_str().to_string(), voucher.id.clone()))
            .one(conn)
            .await?
            .map(rows::voucher_from_row)
            .transpose()
    }

    async fn voucher_movements<C: ConnectionTrait>(
        conn: &C,
        voucher: &VoucherRef,
    ) -> Result<Vec<Movement>, StockLedgerError> {
        let rows = stock_movements::Entity::find()
            .filter(for_voucher(voucher))
            .order_by_asc(stock_movements::Column::Sequence)
            .all(conn)
            .await?;
        hydrate(conn, rows).await
    }

    async fn status_of(
        txn: &DatabaseTransaction,
        voucher: Option<VoucherRef>,
    ) -> Result<Option<VoucherStatus>, StockLedgerError> {
        let Some(voucher) = voucher else {
            return Ok(None);
        };
        Ok(Self::load_voucher(txn, &voucher).await?.map(|s| s.status))
    }

    async fn live_movements<C: ConnectionTrait>(
        &self,
        conn: &C,
        voucher: &VoucherRef,
    ) -> Result<Vec<Movement>, StockLedgerError> {
        Ok(Self::voucher_movements(conn, voucher)
            .await?
            .into_iter()
            .filter(|m| !m.is_cancelled())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use costflow_core::stock::VoucherKind;
    use costflow_shared::types::LocationCode;

    fn posting() -> PostingTime {
        PostingTime::new(
            NaiveDate::from_ymd_opt(2026, 9, 3).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        )
        .with_sequence(4)
    }

    #[test]
    fn test_lock_timeout_is_retryable() {
        let err = lock_error(
            DbErr::Custom("canceling statement due to lock timeout".to_string()),
            3,
        );
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "LOCK_TIMEOUT");

        let other = lock_error(DbErr::Custom("connection reset".to_string()), 3);
        assert!(!other.is_retryable());
        assert_eq!(other.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_voucher_errors_keep_their_code() {
        let err = StockLedgerError::from(VoucherError::MisconfiguredLocation {
            location: LocationCode::new("Transit"),
        });
        assert_eq!(err.into_voucher_error().error_code(), "MISCONFIGURED_LOCATION");

        let db = StockLedgerError::from(DbErr::Custom("boom".to_string()));
        assert_eq!(db.into_voucher_error().error_code(), "STORE_BACKEND_ERROR");
    }

    #[test]
    fn test_app_error_mapping() {
        let voucher = VoucherRef::new(VoucherKind::StockIssue, "ISS-1");
        let app: AppError = StockLedgerError::from(StockError::NotSubmitted(voucher)).into();
        assert_eq!(app.error_code(), "NOT_FOUND");

        let app: AppError = StockLedgerError::CorruptRow {
            id: "1".to_string(),
            reason: "bad".to_string(),
        }
        .into();
        assert_eq!(app.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_posting_bounds_reject_out_of_range_sequence() {
        assert!(at_or_after(&posting()).is_ok());
        assert!(strictly_before(&posting()).is_ok());
        assert!(matches!(
            at_or_after(&posting().with_sequence(u64::MAX)),
            Err(StockLedgerError::CorruptRow { .. })
        ));
    }
}
