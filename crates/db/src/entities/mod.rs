//! `SeaORM` entity definitions.

pub mod gl_entries;
pub mod location_accounts;
pub mod movement_dependencies;
pub mod stock_movements;
pub mod vouchers;
