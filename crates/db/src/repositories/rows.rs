//! Conversions between stock ledger rows and domain types.

use std::str::FromStr;

use chrono::Utc;
use costflow_core::gl::{ExpectedLedgerEntry, PersistedLedgerEntry};
use costflow_core::stock::{
    Dependency, Movement, MovementStatus, PostingTime, StockPair, VoucherKind, VoucherRef,
};
use costflow_core::store::{StoredVoucher, VoucherStatus};
use costflow_core::voucher::{Voucher, VoucherSource};
use costflow_shared::types::{GlEntryId, MovementId};
use sea_orm::{ActiveValue::NotSet, Set};
use uuid::Uuid;

use super::stock_ledger::StockLedgerError;
use crate::entities::{gl_entries, movement_dependencies, stock_movements, vouchers};

fn parse<T>(id: &str, value: &str) -> Result<T, StockLedgerError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|reason| StockLedgerError::CorruptRow {
        id: id.to_string(),
        reason,
    })
}

/// Parses a stored voucher status.
pub fn voucher_status(id: &str, value: &str) -> Result<VoucherStatus, StockLedgerError> {
    match value {
        "submitted" => Ok(VoucherStatus::Submitted),
        "cancelled" => Ok(VoucherStatus::Cancelled),
        other => Err(StockLedgerError::CorruptRow {
            id: id.to_string(),
            reason: format!("Unknown voucher status: {other}"),
        }),
    }
}

/// Converts a creation order to its column value.
pub fn sequence_column(sequence: u64) -> Result<i64, StockLedgerError> {
    i64::try_from(sequence).map_err(|_| StockLedgerError::CorruptRow {
        id: sequence.to_string(),
        reason: "sequence out of range".to_string(),
    })
}

// ========== Movements ==========

/// Builds a movement from its row and its dependency rows in position order.
pub fn movement_from_row(
    row: stock_movements::Model,
    dependencies: Vec<movement_dependencies::Model>,
) -> Result<Movement, StockLedgerError> {
    let id = row.id.to_string();
    let kind: VoucherKind = parse(&id, &row.voucher_kind)?;
    let status: MovementStatus = parse(&id, &row.status)?;
    let sequence = u64::try_from(row.sequence).map_err(|_| StockLedgerError::CorruptRow {
        id: id.clone(),
        reason: format!("negative sequence {}", row.sequence),
    })?;

    let dependencies = dependencies
        .into_iter()
        .map(|dep| {
            let target = VoucherRef::new(parse(&id, &dep.target_kind)?, dep.target_voucher_id)
                .line(dep.target_line_id);
            Ok(Dependency {
                target,
                kind: parse(&id, &dep.kind)?,
                percentage: dep.percentage,
                quantity_sign_filter: dep
                    .quantity_sign
                    .as_deref()
                    .map(|sign| parse(&id, sign))
                    .transpose()?,
            })
        })
        .collect::<Result<Vec<_>, StockLedgerError>>()?;

    Ok(Movement {
        id: MovementId::from_uuid(row.id),
        pair: StockPair::new(row.item, row.location),
        line: VoucherRef::new(kind, row.voucher_id).line(row.voucher_line_id),
        posting: PostingTime::new(row.posting_date, row.posting_time).with_sequence(sequence),
        batch_id: row.batch_id,
        quantity_delta: row.quantity_delta,
        given_rate: row.given_rate,
        additional_cost: row.additional_cost,
        allow_zero_valuation: row.allow_zero_valuation,
        dependencies,
        incoming_rate: row.incoming_rate,
        outgoing_rate: row.outgoing_rate,
        valuation_rate: row.valuation_rate,
        quantity_after: row.quantity_after,
        value_after: row.value_after,
        value_delta: row.value_delta,
        estimated: row.estimated,
        status,
    })
}

/// Builds the insert model of a movement; the database assigns the sequence.
pub fn new_movement(movement: &Movement) -> stock_movements::ActiveModel {
    let now = Utc::now().into();
    stock_movements::ActiveModel {
        id: Set(movement.id.into_inner()),
        item: Set(movement.pair.item.as_str().to_string()),
        location: Set(movement.pair.location.as_str().to_string()),
        voucher_kind: Set(movement.voucher().kind.as_str().to_string()),
        voucher_id: Set(movement.voucher().id.clone()),
        voucher_line_id: Set(movement.line.line_id.clone()),
        posting_date: Set(movement.posting.date),
        posting_time: Set(movement.posting.time),
        sequence: NotSet,
        batch_id: Set(movement.batch_id.clone()),
        quantity_delta: Set(movement.quantity_delta),
        given_rate: Set(movement.given_rate),
        additional_cost: Set(movement.additional_cost),
        allow_zero_valuation: Set(movement.allow_zero_valuation),
        incoming_rate: Set(movement.incoming_rate),
        outgoing_rate: Set(movement.outgoing_rate),
        valuation_rate: Set(movement.valuation_rate),
        quantity_after: Set(movement.quantity_after),
        value_after: Set(movement.value_after),
        value_delta: Set(movement.value_delta),
        estimated: Set(movement.estimated),
        status: Set(movement.status.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Builds an update model touching only the computed fields and status.
pub fn computed_fields(movement: &Movement) -> stock_movements::ActiveModel {
    stock_movements::ActiveModel {
        id: Set(movement.id.into_inner()),
        incoming_rate: Set(movement.incoming_rate),
        outgoing_rate: Set(movement.outgoing_rate),
        valuation_rate: Set(movement.valuation_rate),
        quantity_after: Set(movement.quantity_after),
        value_after: Set(movement.value_after),
        value_delta: Set(movement.value_delta),
        estimated: Set(movement.estimated),
        status: Set(movement.status.as_str().to_string()),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    }
}

/// Builds the dependency rows of a movement.
pub fn new_dependencies(movement: &Movement) -> Vec<movement_dependencies::ActiveModel> {
    movement
        .dependencies
        .iter()
        .zip(0i32..)
        .map(|(dep, position)| movement_dependencies::ActiveModel {
            id: Set(Uuid::now_v7()),
            movement_id: Set(movement.id.into_inner()),
            position: Set(position),
            target_kind: Set(dep.target.voucher.kind.as_str().to_string()),
            target_voucher_id: Set(dep.target.voucher.id.clone()),
            target_line_id: Set(dep.target.line_id.clone()),
            kind: Set(dep.kind.as_str().to_string()),
            percentage: Set(dep.percentage),
            quantity_sign: Set(dep.quantity_sign_filter.map(|sign| sign.as_str().to_string())),
        })
        .collect()
}

// ========== Ledger Entries ==========

/// Builds a persisted ledger entry from its row.
pub fn gl_entry_from_row(row: gl_entries::Model) -> Result<PersistedLedgerEntry, StockLedgerError> {
    let kind: VoucherKind = parse(&row.id.to_string(), &row.voucher_kind)?;
    Ok(PersistedLedgerEntry {
        id: GlEntryId::from_uuid(row.id),
        voucher: VoucherRef::new(kind, row.voucher_id),
        posting_date: row.posting_date,
        account: row.account.into(),
        cost_center: row.cost_center,
        party_type: row.party_type,
        party: row.party,
        debit: row.debit,
        credit: row.credit,
        remarks: row.remarks,
    })
}

/// Builds the insert model of an expected entry for a voucher.
pub fn new_gl_entry(
    voucher: &VoucherRef,
    posting_date: chrono::NaiveDate,
    entry: &ExpectedLedgerEntry,
) -> gl_entries::ActiveModel {
    let persisted = PersistedLedgerEntry::from_expected(voucher, posting_date, entry);
    gl_entries::ActiveModel {
        id: Set(persisted.id.into_inner()),
        voucher_kind: Set(voucher.kind.as_str().to_string()),
        voucher_id: Set(voucher.id.clone()),
        posting_date: Set(posting_date),
        account: Set(persisted.account.as_str().to_string()),
        cost_center: Set(persisted.cost_center),
        party_type: Set(persisted.party_type),
        party: Set(persisted.party),
        debit: Set(persisted.debit),
        credit: Set(persisted.credit),
        remarks: Set(persisted.remarks),
        created_at: Set(Utc::now().into()),
    }
}

// ========== Documents ==========

/// Builds a stored document from its row.
pub fn voucher_from_row(row: vouchers::Model) -> Result<StoredVoucher, StockLedgerError> {
    let id = format!("{}/{}", row.voucher_kind, row.voucher_id);
    let status = voucher_status(&id, &row.status)?;
    let document: Voucher = serde_json::from_value(row.document)?;
    Ok(StoredVoucher { document, status })
}

/// Builds the upsert model of a document.
pub fn voucher_row(
    document: &Voucher,
    status: VoucherStatus,
) -> Result<vouchers::ActiveModel, StockLedgerError> {
    let voucher = document.voucher_ref();
    let now = Utc::now().into();
    Ok(vouchers::ActiveModel {
        voucher_kind: Set(voucher.kind.as_str().to_string()),
        voucher_id: Set(voucher.id),
        status: Set(status.as_str().to_string()),
        posting_date: Set(document.header().posting_date),
        document: Set(serde_json::to_value(document)?),
        created_at: Set(now),
        updated_at: Set(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use costflow_core::stock::{DependencyKind, MovementDraft, QuantitySign};
    use rust_decimal_macros::dec;

    fn row(status: &str, sequence: i64) -> stock_movements::Model {
        let now = Utc::now().into();
        stock_movements::Model {
            id: Uuid::now_v7(),
            item: "BOLT".to_string(),
            location: "Stores".to_string(),
            voucher_kind: "repack".to_string(),
            voucher_id: "RP-1".to_string(),
            voucher_line_id: "p1".to_string(),
            posting_date: NaiveDate::from_ymd_opt(2026, 9, 4).unwrap(),
            posting_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            sequence,
            batch_id: None,
            quantity_delta: dec!(2),
            given_rate: None,
            additional_cost: dec!(1.5),
            allow_zero_valuation: false,
            incoming_rate: dec!(7),
            outgoing_rate: dec!(0),
            valuation_rate: dec!(7),
            quantity_after: dec!(2),
            value_after: dec!(14),
            value_delta: dec!(14),
            estimated: false,
            status: status.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn dependency(movement_id: Uuid, position: i32, sign: Option<&str>) -> movement_dependencies::Model {
        movement_dependencies::Model {
            id: Uuid::now_v7(),
            movement_id,
            position,
            target_kind: "repack".to_string(),
            target_voucher_id: "RP-1".to_string(),
            target_line_id: format!("c{position}"),
            kind: "amount".to_string(),
            percentage: Some(dec!(50)),
            quantity_sign: sign.map(str::to_string),
        }
    }

    #[test]
    fn test_movement_from_row_keeps_dependency_order() {
        let row = row("finalized", 12);
        let deps = vec![
            dependency(row.id, 0, Some("negative")),
            dependency(row.id, 1, None),
        ];

        let movement = movement_from_row(row, deps).unwrap();

        assert_eq!(movement.posting.sequence, 12);
        assert_eq!(movement.status, MovementStatus::Finalized);
        assert_eq!(movement.line.voucher.kind, VoucherKind::Repack);
        assert_eq!(movement.dependencies.len(), 2);
        assert_eq!(movement.dependencies[0].target.line_id, "c0");
        assert_eq!(movement.dependencies[0].kind, DependencyKind::Amount);
        assert_eq!(
            movement.dependencies[0].quantity_sign_filter,
            Some(QuantitySign::Negative)
        );
        assert_eq!(movement.dependencies[1].quantity_sign_filter, None);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        assert!(matches!(
            movement_from_row(row("archived", 1), Vec::new()),
            Err(StockLedgerError::CorruptRow { .. })
        ));
        assert!(matches!(
            movement_from_row(row("provisional", -1), Vec::new()),
            Err(StockLedgerError::CorruptRow { .. })
        ));
        assert!(voucher_status("x", "draft").is_err());
    }

    #[test]
    fn test_new_dependencies_number_positions() {
        let voucher = VoucherRef::new(VoucherKind::Repack, "RP-1");
        let draft = MovementDraft::new(
            StockPair::new("KIT", "Stores"),
            voucher.line("p1"),
            NaiveDate::from_ymd_opt(2026, 9, 4).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            dec!(1),
        )
        .with_dependency(Dependency::amount(voucher.line("c1")))
        .with_dependency(Dependency::amount(voucher.line("c2")).with_percentage(dec!(40)));
        let movement = Movement::from_draft(draft, MovementId::new(), 1);

        let rows = new_dependencies(&movement);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].position, Set(1));
        assert_eq!(rows[1].percentage, Set(Some(dec!(40))));
        assert_eq!(new_movement(&movement).sequence, NotSet);
    }
}
