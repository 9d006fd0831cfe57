//! `SeaORM` Entity for gl_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "gl_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub voucher_kind: String,
    pub voucher_id: String,
    pub posting_date: Date,
    pub account: String,
    pub cost_center: Option<String>,
    pub party_type: Option<String>,
    pub party: Option<String>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub remarks: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
