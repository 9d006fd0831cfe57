//! Line types shared by stock documents.

use costflow_shared::types::{AccountCode, ItemCode, LocationCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::stock::StockPair;

/// One item line moving stock in or out of a single location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    /// Line identifier, unique within the document.
    pub line_id: String,
    /// Item moved.
    pub item: ItemCode,
    /// Location stock enters or leaves.
    pub location: LocationCode,
    /// Quantity moved (always positive; direction comes from the document).
    pub quantity: Decimal,
    /// Unit rate, where the document fixes one.
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// Optional batch.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Value the line at zero.
    #[serde(default)]
    pub allow_zero_valuation: bool,
    /// Counter account overriding the document default.
    #[serde(default)]
    pub expense_account: Option<AccountCode>,
    /// Cost center overriding the document default.
    #[serde(default)]
    pub cost_center: Option<String>,
}

impl StockLine {
    /// Creates a line without rate or overrides.
    #[must_use]
    pub fn new(
        line_id: impl Into<String>,
        item: impl Into<ItemCode>,
        location: impl Into<LocationCode>,
        quantity: Decimal,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            item: item.into(),
            location: location.into(),
            quantity,
            rate: None,
            batch_id: None,
            allow_zero_valuation: false,
            expense_account: None,
            cost_center: None,
        }
    }

    /// Sets the unit rate.
    #[must_use]
    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Sets the batch.
    #[must_use]
    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Values the line at zero.
    #[must_use]
    pub fn zero_valued(mut self) -> Self {
        self.allow_zero_valuation = true;
        self
    }

    /// Overrides the counter account.
    #[must_use]
    pub fn with_expense_account(mut self, account: impl Into<AccountCode>) -> Self {
        self.expense_account = Some(account.into());
        self
    }

    /// Overrides the cost center.
    #[must_use]
    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    /// Returns the line's stock pair.
    #[must_use]
    pub fn pair(&self) -> StockPair {
        StockPair {
            item: self.item.clone(),
            location: self.location.clone(),
        }
    }
}

/// A line moving stock from one location to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    /// Line identifier, unique within the document.
    pub line_id: String,
    /// Item moved.
    pub item: ItemCode,
    /// Source location.
    pub from: LocationCode,
    /// Target location.
    pub to: LocationCode,
    /// Quantity moved.
    pub quantity: Decimal,
    /// Optional batch.
    #[serde(default)]
    pub batch_id: Option<String>,
}

impl TransferLine {
    /// Creates a transfer line.
    #[must_use]
    pub fn new(
        line_id: impl Into<String>,
        item: impl Into<ItemCode>,
        from: impl Into<LocationCode>,
        to: impl Into<LocationCode>,
        quantity: Decimal,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            item: item.into(),
            from: from.into(),
            to: to.into(),
            quantity,
            batch_id: None,
        }
    }
}

/// A produced line of a repack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedLine {
    /// The produced stock.
    pub line: StockLine,
    /// Share of consumed cost and additional cost, in percent.
    ///
    /// Lines without an explicit rate and without a share split the
    /// remainder equally.
    #[serde(default)]
    pub cost_percentage: Option<Decimal>,
}

impl ProducedLine {
    /// Creates a produced line sharing cost equally with its siblings.
    #[must_use]
    pub const fn new(line: StockLine) -> Self {
        Self {
            line,
            cost_percentage: None,
        }
    }

    /// Sets the cost share.
    #[must_use]
    pub fn with_cost_percentage(mut self, percentage: Decimal) -> Self {
        self.cost_percentage = Some(percentage);
        self
    }
}

/// Raw material handed to a subcontractor for a receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppliedMaterial {
    /// Line identifier, unique within the document.
    pub line_id: String,
    /// Receipt line the material went into.
    pub for_line: String,
    /// Item consumed.
    pub item: ItemCode,
    /// Location the material leaves.
    pub location: LocationCode,
    /// Quantity consumed.
    pub quantity: Decimal,
}

/// A returned line, optionally pointing at the line it reverses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    /// The returned stock.
    pub line: StockLine,
    /// Line of the original document, when known.
    #[serde(default)]
    pub against_line: Option<String>,
}

impl ReturnLine {
    /// Creates a return line against an original line.
    #[must_use]
    pub fn against(line: StockLine, against_line: impl Into<String>) -> Self {
        Self {
            line,
            against_line: Some(against_line.into()),
        }
    }

    /// Creates a return line with no original line.
    #[must_use]
    pub const fn standalone(line: StockLine) -> Self {
        Self {
            line,
            against_line: None,
        }
    }
}
