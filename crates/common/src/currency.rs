//! Balance ledger for value carried by outbound messages.
//!
//! The compiled machine never settles value against the outside world on its
//! own; it emits send messages and leaves settlement to whatever drives it.
//! This ledger is that driver-side book: balances keyed by contract and
//! currency, credited before messages go in and debited as sends come out.

use alloy::primitives::U256;
use hashbrown::HashMap;

/// Tracks per-contract balances of each currency.
#[derive(Debug, Clone, Default)]
pub struct CurrencyStore {
    balances: HashMap<(U256, U256), U256>,
}

impl CurrencyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the balance of `currency` held by `holder`. Missing entries
    /// read as zero.
    pub fn get(&self, holder: U256, currency: U256) -> U256 {
        self.balances.get(&(holder, currency)).copied().unwrap_or(U256::ZERO)
    }

    /// Credits `delta` of `currency` to `holder`.
    pub fn add(&mut self, holder: U256, currency: U256, delta: U256) {
        let entry = self.balances.entry((holder, currency)).or_insert(U256::ZERO);
        *entry = entry.saturating_add(delta);
    }

    /// Debits `delta` of `currency` from `holder`. Returns false and leaves
    /// the store unmodified when the balance is insufficient.
    pub fn deduct(&mut self, holder: U256, currency: U256, delta: U256) -> bool {
        let balance = self.get(holder, currency);
        if balance < delta {
            return false;
        }
        self.balances.insert((holder, currency), balance - delta);
        true
    }
}
