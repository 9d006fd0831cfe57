//! General ledger schema.
//!
//! Creates the ledger entry table written by reconciliation and the
//! location to stock account mapping used to derive entries.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(GL_ENTRIES_SQL).await?;
        db.execute_unprepared(LOCATION_ACCOUNTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            r"
            DROP TABLE IF EXISTS location_accounts CASCADE;
            DROP TABLE IF EXISTS gl_entries CASCADE;
            ",
        )
        .await?;
        Ok(())
    }
}

const GL_ENTRIES_SQL: &str = r"
CREATE TABLE gl_entries (
    id UUID PRIMARY KEY,
    voucher_kind VARCHAR(32) NOT NULL,
    voucher_id VARCHAR(140) NOT NULL,
    posting_date DATE NOT NULL,
    account VARCHAR(140) NOT NULL,
    cost_center VARCHAR(140),
    party_type VARCHAR(64),
    party VARCHAR(140),
    debit NUMERIC(28, 9) NOT NULL DEFAULT 0,
    credit NUMERIC(28, 9) NOT NULL DEFAULT 0,
    remarks TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_gl_one_side CHECK (debit >= 0 AND credit >= 0)
);

CREATE INDEX idx_gl_entries_voucher ON gl_entries (voucher_kind, voucher_id);
CREATE INDEX idx_gl_entries_account_date ON gl_entries (account, posting_date);
";

const LOCATION_ACCOUNTS_SQL: &str = r"
CREATE TABLE location_accounts (
    location VARCHAR(140) PRIMARY KEY,
    stock_account VARCHAR(140) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
";
