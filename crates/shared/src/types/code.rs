//! Human-facing codes for items, locations, and accounts.
//!
//! Stock documents refer to items and warehouses by code rather than by UUID,
//! so these wrappers are string based. Codes are trimmed on construction.

use serde::{Deserialize, Serialize};

/// Macro to generate string code wrappers.
macro_rules! code_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a code, trimming surrounding whitespace.
            #[must_use]
            pub fn new(code: impl AsRef<str>) -> Self {
                Self(code.as_ref().trim().to_string())
            }

            /// Returns the code as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the code is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(code: &str) -> Self {
                Self::new(code)
            }
        }

        impl From<String> for $name {
            fn from(code: String) -> Self {
                Self::new(code)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

code_type!(ItemCode, "Code of a stocked item.");
code_type!(LocationCode, "Code of a stock location (warehouse).");
code_type!(AccountCode, "Code of a general ledger account.");
