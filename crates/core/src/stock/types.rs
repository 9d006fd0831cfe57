//! Stock ledger domain types.
//!
//! A [`Movement`] is one append-only stock ledger row for an item at a
//! location. Its origin fields (pair, voucher line, posting time, quantity,
//! dependencies) never change after append; its computed fields (rates,
//! running quantity and value) are rewritten in place by every repost that
//! covers it.

use chrono::{NaiveDate, NaiveTime};
use costflow_shared::types::{ItemCode, LocationCode, MovementId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of document that produced a movement.
///
/// This is a closed set: new document kinds are added here and implement
/// [`crate::voucher::VoucherSource`] rather than being special-cased in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherKind {
    /// Opening balance for an item at a location.
    OpeningStock,
    /// Goods received from a supplier.
    StockReceipt,
    /// Goods consumed or shipped out at moving-average cost.
    StockIssue,
    /// Goods moved between two locations.
    StockTransfer,
    /// Materials consumed to produce other items.
    Repack,
    /// Received goods sent back to the supplier.
    PurchaseReturn,
    /// Issued goods coming back from a customer.
    SalesReturn,
}

impl VoucherKind {
    /// Returns the stable storage name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpeningStock => "opening_stock",
            Self::StockReceipt => "stock_receipt",
            Self::StockIssue => "stock_issue",
            Self::StockTransfer => "stock_transfer",
            Self::Repack => "repack",
            Self::PurchaseReturn => "purchase_return",
            Self::SalesReturn => "sales_return",
        }
    }
}

impl std::fmt::Display for VoucherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoucherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opening_stock" => Ok(Self::OpeningStock),
            "stock_receipt" => Ok(Self::StockReceipt),
            "stock_issue" => Ok(Self::StockIssue),
            "stock_transfer" => Ok(Self::StockTransfer),
            "repack" => Ok(Self::Repack),
            "purchase_return" => Ok(Self::PurchaseReturn),
            "sales_return" => Ok(Self::SalesReturn),
            _ => Err(format!("Unknown voucher kind: {s}")),
        }
    }
}

/// Identifies a voucher: `(voucher_kind, voucher_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoucherRef {
    /// The document kind.
    pub kind: VoucherKind,
    /// The document number.
    pub id: String,
}

impl VoucherRef {
    /// Creates a voucher reference.
    #[must_use]
    pub fn new(kind: VoucherKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Returns a reference to one line of this voucher.
    #[must_use]
    pub fn line(&self, line_id: impl Into<String>) -> VoucherLineRef {
        VoucherLineRef {
            voucher: self.clone(),
            line_id: line_id.into(),
        }
    }
}

impl std::fmt::Display for VoucherRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Identifies one voucher line: `(voucher_kind, voucher_id, voucher_line_id)`.
///
/// A line may own more than one movement (a transfer line moves stock out of
/// one location and into another, a receipt line may be split by batch).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoucherLineRef {
    /// The owning voucher.
    pub voucher: VoucherRef,
    /// The line identifier within the voucher.
    pub line_id: String,
}

impl std::fmt::Display for VoucherLineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.voucher, self.line_id)
    }
}

/// An `(item, location)` pair: the unit over which a running average is kept.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockPair {
    /// The item.
    pub item: ItemCode,
    /// The location holding the item.
    pub location: LocationCode,
}

impl StockPair {
    /// Creates a stock pair.
    #[must_use]
    pub fn new(item: impl Into<ItemCode>, location: impl Into<LocationCode>) -> Self {
        Self {
            item: item.into(),
            location: location.into(),
        }
    }
}

impl std::fmt::Display for StockPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.item, self.location)
    }
}

/// Position of a movement in time.
///
/// Ordered by `(date, time, sequence)`. The sequence is the creation order the
/// store assigns on append and breaks ties between movements posted at the
/// same instant. A posting time with sequence `0` sorts before every stored
/// movement at that instant, which makes it the natural start of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PostingTime {
    /// Posting date.
    pub date: NaiveDate,
    /// Posting time of day.
    pub time: NaiveTime,
    /// Creation order tie-break.
    pub sequence: u64,
}

impl PostingTime {
    /// Creates the start of an instant (sequence `0`).
    #[must_use]
    pub const fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            date,
            time,
            sequence: 0,
        }
    }

    /// Returns the same instant with the given creation order.
    #[must_use]
    pub const fn with_sequence(self, sequence: u64) -> Self {
        Self { sequence, ..self }
    }

    /// Returns the start of this posting's instant.
    #[must_use]
    pub const fn instant(self) -> Self {
        Self::new(self.date, self.time)
    }
}

impl std::fmt::Display for PostingTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}#{}", self.date, self.time, self.sequence)
    }
}

/// What a dependency inherits from its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Inherit the target's unit rate.
    Rate,
    /// Inherit (a share of) the target's value contribution.
    Amount,
}

impl DependencyKind {
    /// Returns the stable storage name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::Amount => "amount",
        }
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate" => Ok(Self::Rate),
            "amount" => Ok(Self::Amount),
            _ => Err(format!("Unknown dependency kind: {s}")),
        }
    }
}

/// Restricts dependency candidates by the sign of their quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantitySign {
    /// Only incoming candidates.
    Positive,
    /// Only outgoing candidates.
    Negative,
}

impl QuantitySign {
    /// Returns true if the quantity has this sign.
    #[must_use]
    pub fn matches(self, quantity: Decimal) -> bool {
        match self {
            Self::Positive => quantity > Decimal::ZERO,
            Self::Negative => quantity < Decimal::ZERO,
        }
    }

    /// Returns the stable storage name of the sign.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl std::str::FromStr for QuantitySign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            _ => Err(format!("Unknown quantity sign: {s}")),
        }
    }
}

/// A cost link from a movement to the movement(s) of another voucher line.
///
/// Created with its movement and never mutated. The target must not be later
/// in time than the owning movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The referenced voucher line.
    pub target: VoucherLineRef,
    /// Rate or amount inheritance.
    pub kind: DependencyKind,
    /// Share of the target, in percent (100 when absent).
    pub percentage: Option<Decimal>,
    /// Only consider candidates with this quantity sign.
    pub quantity_sign_filter: Option<QuantitySign>,
}

impl Dependency {
    /// Creates a rate dependency on the given line.
    #[must_use]
    pub const fn rate(target: VoucherLineRef) -> Self {
        Self {
            target,
            kind: DependencyKind::Rate,
            percentage: None,
            quantity_sign_filter: None,
        }
    }

    /// Creates an amount dependency on the given line.
    #[must_use]
    pub const fn amount(target: VoucherLineRef) -> Self {
        Self {
            target,
            kind: DependencyKind::Amount,
            percentage: None,
            quantity_sign_filter: None,
        }
    }

    /// Attributes only a percentage of the target.
    #[must_use]
    pub fn with_percentage(mut self, percentage: Decimal) -> Self {
        self.percentage = Some(percentage);
        self
    }

    /// Restricts candidates by quantity sign.
    #[must_use]
    pub fn with_sign_filter(mut self, sign: QuantitySign) -> Self {
        self.quantity_sign_filter = Some(sign);
        self
    }

    /// Returns the attributed share as a fraction (1 when no percentage is set).
    #[must_use]
    pub fn share(&self) -> Decimal {
        self.percentage
            .map_or(Decimal::ONE, |percentage| percentage / Decimal::ONE_HUNDRED)
    }
}

/// Lifecycle of a movement.
///
/// The status reflects cancellation, not valuation freshness: a repost
/// recomputes a finalized movement without changing its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    /// Appended, valued against a possibly stale running state.
    Provisional,
    /// Valued in its correct position by a repost.
    Finalized,
    /// Logically reversed; retained for audit and skipped by valuation.
    Cancelled,
}

impl MovementStatus {
    /// Returns the stable storage name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Finalized => "finalized",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for MovementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisional" => Ok(Self::Provisional),
            "finalized" => Ok(Self::Finalized),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown movement status: {s}")),
        }
    }
}

/// A proposed movement emitted by a voucher source, before the store assigns
/// identity and creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    /// Item and location.
    pub pair: StockPair,
    /// Originating voucher line.
    pub line: VoucherLineRef,
    /// Posting date.
    pub date: NaiveDate,
    /// Posting time of day.
    pub time: NaiveTime,
    /// Signed quantity change.
    pub quantity_delta: Decimal,
    /// Rate fixed by the source: incoming rate for receipts, outgoing rate for returns.
    pub given_rate: Option<Decimal>,
    /// Value added on top of amount dependencies (e.g. overhead).
    pub additional_cost: Decimal,
    /// Movement contributes zero value regardless of rate.
    pub allow_zero_valuation: bool,
    /// Optional batch.
    pub batch_id: Option<String>,
    /// Cost links to other voucher lines.
    pub dependencies: Vec<Dependency>,
}

impl MovementDraft {
    /// Creates a draft with no rate, cost links, or batch.
    #[must_use]
    pub fn new(
        pair: StockPair,
        line: VoucherLineRef,
        date: NaiveDate,
        time: NaiveTime,
        quantity_delta: Decimal,
    ) -> Self {
        Self {
            pair,
            line,
            date,
            time,
            quantity_delta,
            given_rate: None,
            additional_cost: Decimal::ZERO,
            allow_zero_valuation: false,
            batch_id: None,
            dependencies: Vec::new(),
        }
    }

    /// Fixes the rate of the movement.
    #[must_use]
    pub fn with_rate(mut self, rate: Option<Decimal>) -> Self {
        self.given_rate = rate;
        self
    }

    /// Adds a cost link.
    #[must_use]
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Adds value on top of amount dependencies.
    #[must_use]
    pub fn with_additional_cost(mut self, additional_cost: Decimal) -> Self {
        self.additional_cost = additional_cost;
        self
    }

    /// Marks the movement as zero-valued.
    #[must_use]
    pub fn zero_valued(mut self, allow_zero_valuation: bool) -> Self {
        self.allow_zero_valuation = allow_zero_valuation;
        self
    }

    /// Assigns a batch.
    #[must_use]
    pub fn with_batch(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Returns the start of the draft's posting instant.
    #[must_use]
    pub const fn posting(&self) -> PostingTime {
        PostingTime::new(self.date, self.time)
    }
}

/// One stock ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Unique identifier.
    pub id: MovementId,
    /// Item and location.
    pub pair: StockPair,
    /// Originating voucher line.
    pub line: VoucherLineRef,
    /// Position in time, including creation order.
    pub posting: PostingTime,
    /// Optional batch.
    pub batch_id: Option<String>,
    /// Signed quantity change.
    pub quantity_delta: Decimal,
    /// Rate fixed by the source, if any.
    pub given_rate: Option<Decimal>,
    /// Value added on top of amount dependencies.
    pub additional_cost: Decimal,
    /// Movement contributes zero value regardless of rate.
    pub allow_zero_valuation: bool,
    /// Cost links to other voucher lines.
    pub dependencies: Vec<Dependency>,
    /// Unit cost of incoming stock (meaningful when `quantity_delta > 0`).
    pub incoming_rate: Decimal,
    /// Unit cost of outgoing stock (meaningful when `quantity_delta < 0`).
    pub outgoing_rate: Decimal,
    /// Moving-average rate after this movement.
    pub valuation_rate: Decimal,
    /// Running quantity after this movement.
    pub quantity_after: Decimal,
    /// Running value on hand after this movement.
    pub value_after: Decimal,
    /// Change in value on hand caused by this movement.
    pub value_delta: Decimal,
    /// Valued while stock was negative; the value is an estimate.
    pub estimated: bool,
    /// Lifecycle status.
    pub status: MovementStatus,
}

impl Movement {
    /// Creates a provisional movement from a draft.
    #[must_use]
    pub fn from_draft(draft: MovementDraft, id: MovementId, sequence: u64) -> Self {
        Self {
            id,
            posting: draft.posting().with_sequence(sequence),
            pair: draft.pair,
            line: draft.line,
            batch_id: draft.batch_id,
            quantity_delta: draft.quantity_delta,
            given_rate: draft.given_rate,
            additional_cost: draft.additional_cost,
            allow_zero_valuation: draft.allow_zero_valuation,
            dependencies: draft.dependencies,
            incoming_rate: Decimal::ZERO,
            outgoing_rate: Decimal::ZERO,
            valuation_rate: Decimal::ZERO,
            quantity_after: Decimal::ZERO,
            value_after: Decimal::ZERO,
            value_delta: Decimal::ZERO,
            estimated: false,
            status: MovementStatus::Provisional,
        }
    }

    /// Creates the compensating mirror of a movement.
    ///
    /// The mirror reverses quantity and value, sits at the same posting
    /// instant, and is itself cancelled so valuation never reads it.
    #[must_use]
    pub fn mirror(&self, id: MovementId, sequence: u64) -> Self {
        Self {
            id,
            posting: self.posting.with_sequence(sequence),
            quantity_delta: -self.quantity_delta,
            value_delta: -self.value_delta,
            quantity_after: self.quantity_after - self.quantity_delta,
            value_after: self.value_after - self.value_delta,
            dependencies: Vec::new(),
            status: MovementStatus::Cancelled,
            ..self.clone()
        }
    }

    /// Returns the originating voucher.
    #[must_use]
    pub const fn voucher(&self) -> &VoucherRef {
        &self.line.voucher
    }

    /// Returns true if stock enters the location.
    #[must_use]
    pub fn is_incoming(&self) -> bool {
        self.quantity_delta > Decimal::ZERO
    }

    /// Returns true if stock leaves the location.
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.quantity_delta < Decimal::ZERO
    }

    /// Returns true if the movement has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == MovementStatus::Cancelled
    }

    /// Returns true if the computed fields of two snapshots differ.
    #[must_use]
    pub fn computed_differs(&self, other: &Self) -> bool {
        self.incoming_rate != other.incoming_rate
            || self.outgoing_rate != other.outgoing_rate
            || self.valuation_rate != other.valuation_rate
            || self.quantity_after != other.quantity_after
            || self.value_after != other.value_after
            || self.value_delta != other.value_delta
            || self.estimated != other.estimated
            || self.status != other.status
    }
}

/// Running `(quantity, value)` state of one stock pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunningState {
    /// Quantity on hand.
    pub quantity: Decimal,
    /// Value on hand.
    pub value: Decimal,
    /// Current moving-average rate (last positive rate when stock is not positive).
    pub valuation_rate: Decimal,
    /// Last rate observed while stock was positive.
    pub last_positive_rate: Option<Decimal>,
}

impl RunningState {
    /// Returns the state left behind by a finalized movement.
    #[must_use]
    pub fn after(movement: &Movement) -> Self {
        Self {
            quantity: movement.quantity_after,
            value: movement.value_after,
            valuation_rate: movement.valuation_rate,
            last_positive_rate: (movement.valuation_rate > Decimal::ZERO)
                .then_some(movement.valuation_rate),
        }
    }

    /// Returns true while stock is negative and values are estimates.
    #[must_use]
    pub fn is_estimate(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn test_posting_time_orders_by_date_time_then_sequence() {
        let early = PostingTime::new(date(1), noon()).with_sequence(9);
        let later_same_instant = PostingTime::new(date(1), noon()).with_sequence(10);
        let next_day = PostingTime::new(date(2), noon()).with_sequence(1);

        assert!(early < later_same_instant);
        assert!(later_same_instant < next_day);
        assert!(PostingTime::new(date(1), noon()) < early);
    }

    #[test]
    fn test_voucher_kind_round_trips_through_str() {
        for kind in [
            VoucherKind::OpeningStock,
            VoucherKind::StockReceipt,
            VoucherKind::StockIssue,
            VoucherKind::StockTransfer,
            VoucherKind::Repack,
            VoucherKind::PurchaseReturn,
            VoucherKind::SalesReturn,
        ] {
            assert_eq!(kind.as_str().parse::<VoucherKind>().unwrap(), kind);
        }
        assert!("delivery_note".parse::<VoucherKind>().is_err());
    }

    #[test]
    fn test_dependency_share() {
        let line = VoucherRef::new(VoucherKind::Repack, "RP-1").line("c1");
        assert_eq!(Dependency::amount(line.clone()).share(), Decimal::ONE);
        assert_eq!(
            Dependency::amount(line).with_percentage(dec!(25)).share(),
            dec!(0.25)
        );
    }

    #[test]
    fn test_quantity_sign_matches() {
        assert!(QuantitySign::Positive.matches(dec!(1)));
        assert!(!QuantitySign::Positive.matches(dec!(0)));
        assert!(QuantitySign::Negative.matches(dec!(-0.5)));
        assert!(!QuantitySign::Negative.matches(dec!(2)));
    }

    #[test]
    fn test_mirror_reverses_quantity_and_value() {
        let voucher = VoucherRef::new(VoucherKind::StockReceipt, "REC-1");
        let draft = MovementDraft::new(
            StockPair::new("BOLT", "Stores"),
            voucher.line("1"),
            date(1),
            noon(),
            dec!(10),
        );
        let mut movement = Movement::from_draft(draft, MovementId::new(), 1);
        movement.value_delta = dec!(50);
        movement.quantity_after = dec!(10);
        movement.value_after = dec!(50);

        let mirror = movement.mirror(MovementId::new(), 2);
        assert_eq!(mirror.quantity_delta, dec!(-10));
        assert_eq!(mirror.value_delta, dec!(-50));
        assert_eq!(mirror.quantity_after, dec!(0));
        assert_eq!(mirror.value_after, dec!(0));
        assert!(mirror.is_cancelled());
        assert_eq!(mirror.posting.instant(), movement.posting.instant());
    }

    #[test]
    fn test_running_state_after_movement() {
        let voucher = VoucherRef::new(VoucherKind::StockReceipt, "REC-1");
        let draft = MovementDraft::new(
            StockPair::new("BOLT", "Stores"),
            voucher.line("1"),
            date(1),
            noon(),
            dec!(4),
        );
        let mut movement = Movement::from_draft(draft, MovementId::new(), 1);
        movement.quantity_after = dec!(4);
        movement.value_after = dec!(20);
        movement.valuation_rate = dec!(5);

        let state = RunningState::after(&movement);
        assert_eq!(state.quantity, dec!(4));
        assert_eq!(state.value, dec!(20));
        assert_eq!(state.last_positive_rate, Some(dec!(5)));
        assert!(!state.is_estimate());
    }
}
