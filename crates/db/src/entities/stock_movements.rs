//! `SeaORM` Entity for stock_movements table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item: String,
    pub location: String,
    pub voucher_kind: String,
    pub voucher_id: String,
    pub voucher_line_id: String,
    pub posting_date: Date,
    pub posting_time: Time,
    /// Creation order, assigned by the database on insert.
    pub sequence: i64,
    pub batch_id: Option<String>,
    pub quantity_delta: Decimal,
    pub given_rate: Option<Decimal>,
    pub additional_cost: Decimal,
    pub allow_zero_valuation: bool,
    pub incoming_rate: Decimal,
    pub outgoing_rate: Decimal,
    pub valuation_rate: Decimal,
    pub quantity_after: Decimal,
    pub value_after: Decimal,
    pub value_delta: Decimal,
    pub estimated: bool,
    pub status: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movement_dependencies::Entity")]
    MovementDependencies,
}

impl Related<super::movement_dependencies::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MovementDependencies.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
