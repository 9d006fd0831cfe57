//! Shared types, errors, and configuration for Costflow.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for movements and ledger rows
//! - Stock codes (items, locations, accounts)
//! - Decimal precision rules for rates and amounts
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, CancellationPolicy, RepostConfig, ValuationConfig};
pub use error::{AppError, AppResult};
