//! Stock account per location.

use std::collections::BTreeMap;

use costflow_shared::types::{AccountCode, LocationCode};
use serde::{Deserialize, Serialize};

use crate::stock::VoucherError;

/// Maps each stock location to the ledger account holding its stock value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationAccounts {
    accounts: BTreeMap<LocationCode, AccountCode>,
}

impl LocationAccounts {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping.
    #[must_use]
    pub fn with(mut self, location: impl Into<LocationCode>, account: impl Into<AccountCode>) -> Self {
        self.insert(location.into(), account.into());
        self
    }

    /// Adds or replaces a mapping.
    pub fn insert(&mut self, location: LocationCode, account: AccountCode) {
        self.accounts.insert(location, account);
    }

    /// Returns the stock account of a location.
    pub fn stock_account(&self, location: &LocationCode) -> Result<&AccountCode, VoucherError> {
        self.accounts
            .get(location)
            .ok_or_else(|| VoucherError::MisconfiguredLocation {
                location: location.clone(),
            })
    }

    /// Fails on the first location without a stock account.
    pub fn ensure_configured<'a, I>(&self, locations: I) -> Result<(), VoucherError>
    where
        I: IntoIterator<Item = &'a LocationCode>,
    {
        for location in locations {
            self.stock_account(location)?;
        }
        Ok(())
    }

    /// Returns the number of mapped locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns true if no location is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Iterates over `(location, account)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&LocationCode, &AccountCode)> {
        self.accounts.iter()
    }
}

impl FromIterator<(LocationCode, AccountCode)> for LocationAccounts {
    fn from_iter<I: IntoIterator<Item = (LocationCode, AccountCode)>>(iter: I) -> Self {
        Self {
            accounts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_location_is_misconfigured() {
        let accounts = LocationAccounts::new().with("Stores", "1400 Stores");
        let stores = LocationCode::new("Stores");
        let transit = LocationCode::new("Transit");

        assert_eq!(accounts.stock_account(&stores).unwrap().as_str(), "1400 Stores");
        let err = accounts.ensure_configured([&stores, &transit]).unwrap_err();
        assert!(matches!(
            err,
            VoucherError::MisconfiguredLocation { location } if location == transit
        ));
    }
}
