//! Common types used across the application.

pub mod code;
pub mod id;
pub mod precision;

pub use code::{AccountCode, ItemCode, LocationCode};
pub use id::*;
pub use precision::Precision;
