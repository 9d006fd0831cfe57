//! Stock ledger schema.
//!
//! Creates the documents table, the append-only movement table with its
//! dependency links, and the indexes the repost window queries rely on.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(VOUCHERS_SQL).await?;
        db.execute_unprepared(STOCK_MOVEMENTS_SQL).await?;
        db.execute_unprepared(MOVEMENT_DEPENDENCIES_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            r"
            DROP TABLE IF EXISTS movement_dependencies CASCADE;
            DROP TABLE IF EXISTS stock_movements CASCADE;
            DROP SEQUENCE IF EXISTS stock_movement_sequence;
            DROP TABLE IF EXISTS vouchers CASCADE;
            ",
        )
        .await?;
        Ok(())
    }
}

const VOUCHERS_SQL: &str = r"
CREATE TABLE vouchers (
    voucher_kind VARCHAR(32) NOT NULL,
    voucher_id VARCHAR(140) NOT NULL,
    status VARCHAR(16) NOT NULL,
    posting_date DATE NOT NULL,
    document JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (voucher_kind, voucher_id),
    CONSTRAINT chk_voucher_status CHECK (status IN ('submitted', 'cancelled'))
);
";

const STOCK_MOVEMENTS_SQL: &str = r"
-- Creation order breaks ties between movements posted at the same instant
CREATE SEQUENCE stock_movement_sequence;

CREATE TABLE stock_movements (
    id UUID PRIMARY KEY,
    item VARCHAR(140) NOT NULL,
    location VARCHAR(140) NOT NULL,
    voucher_kind VARCHAR(32) NOT NULL,
    voucher_id VARCHAR(140) NOT NULL,
    voucher_line_id VARCHAR(140) NOT NULL,
    posting_date DATE NOT NULL,
    posting_time TIME NOT NULL,
    sequence BIGINT NOT NULL DEFAULT nextval('stock_movement_sequence'),
    batch_id VARCHAR(140),
    quantity_delta NUMERIC(28, 9) NOT NULL,
    given_rate NUMERIC(28, 9),
    additional_cost NUMERIC(28, 9) NOT NULL DEFAULT 0,
    allow_zero_valuation BOOLEAN NOT NULL DEFAULT false,
    incoming_rate NUMERIC(28, 9) NOT NULL DEFAULT 0,
    outgoing_rate NUMERIC(28, 9) NOT NULL DEFAULT 0,
    valuation_rate NUMERIC(28, 9) NOT NULL DEFAULT 0,
    quantity_after NUMERIC(28, 9) NOT NULL DEFAULT 0,
    value_after NUMERIC(28, 9) NOT NULL DEFAULT 0,
    value_delta NUMERIC(28, 9) NOT NULL DEFAULT 0,
    estimated BOOLEAN NOT NULL DEFAULT false,
    status VARCHAR(16) NOT NULL DEFAULT 'provisional',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_stock_movement_sequence UNIQUE (sequence),
    CONSTRAINT chk_movement_quantity CHECK (quantity_delta <> 0),
    CONSTRAINT chk_movement_status CHECK (status IN ('provisional', 'finalized', 'cancelled'))
);

ALTER SEQUENCE stock_movement_sequence OWNED BY stock_movements.sequence;

-- Repost windows and running-state lookups
CREATE INDEX idx_stock_movements_pair_posting
    ON stock_movements (item, location, posting_date, posting_time, sequence);

-- Voucher and dependency target lookups
CREATE INDEX idx_stock_movements_line
    ON stock_movements (voucher_kind, voucher_id, voucher_line_id);
";

const MOVEMENT_DEPENDENCIES_SQL: &str = r"
CREATE TABLE movement_dependencies (
    id UUID PRIMARY KEY,
    movement_id UUID NOT NULL REFERENCES stock_movements(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    target_kind VARCHAR(32) NOT NULL,
    target_voucher_id VARCHAR(140) NOT NULL,
    target_line_id VARCHAR(140) NOT NULL,
    kind VARCHAR(16) NOT NULL,
    percentage NUMERIC(9, 4),
    quantity_sign VARCHAR(16),
    CONSTRAINT uq_movement_dependency_position UNIQUE (movement_id, position),
    CONSTRAINT chk_dependency_kind CHECK (kind IN ('rate', 'amount')),
    CONSTRAINT chk_dependency_sign CHECK (quantity_sign IS NULL OR quantity_sign IN ('positive', 'negative'))
);

CREATE INDEX idx_movement_dependencies_target
    ON movement_dependencies (target_kind, target_voucher_id, target_line_id);
";
