//! Location to stock account mapping.

use chrono::Utc;
use costflow_core::voucher::LocationAccounts;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, QueryOrder, Set};
use tracing::info;

use crate::entities::location_accounts;

/// Repository for the stock account of each location.
#[derive(Debug, Clone)]
pub struct LocationAccountRepository {
    db: DatabaseConnection,
}

impl LocationAccountRepository {
    /// Creates a new location account repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Loads every configured location.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load(&self) -> Result<LocationAccounts, DbErr> {
        let rows = location_accounts::Entity::find()
            .order_by_asc(location_accounts::Column::Location)
            .all(&self.db)
            .await?;

        let mut accounts = LocationAccounts::new();
        for row in rows {
            accounts.insert(row.location.into(), row.stock_account.into());
        }
        Ok(accounts)
    }

    /// Sets the stock account of a location, replacing any previous one.
    ///
    /// Existing ledger entries are not touched; a manual repost of the
    /// location's pairs brings them in line.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert(&self, location: &str, stock_account: &str) -> Result<(), DbErr> {
        let row = location_accounts::ActiveModel {
            location: Set(location.trim().to_string()),
            stock_account: Set(stock_account.trim().to_string()),
            created_at: Set(Utc::now().into()),
        };
        location_accounts::Entity::insert(row)
            .on_conflict(
                OnConflict::column(location_accounts::Column::Location)
                    .update_column(location_accounts::Column::StockAccount)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        info!(location, stock_account, "Location stock account set");
        Ok(())
    }
}
