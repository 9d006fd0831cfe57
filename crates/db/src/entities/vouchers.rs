//! `SeaORM` Entity for vouchers table.
//!
//! Holds each stock document as JSON next to its status so cancellation and
//! reconciliation can rebuild the document's ledger entries.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "vouchers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub voucher_kind: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub voucher_id: String,
    pub status: String,
    pub posting_date: Date,
    pub document: Json,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
