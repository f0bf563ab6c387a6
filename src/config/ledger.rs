//! Ledger input policy.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Default ceiling for a single earn/deduct/exchange amount.
pub const DEFAULT_MAX_AMOUNT: i64 = 1_000_000;

/// Default maximum description length in characters.
pub const DEFAULT_MAX_DESCRIPTION_LEN: usize = 500;

/// Default maximum lot lifetime (ten years).
pub const DEFAULT_MAX_EXPIRATION_DAYS: u32 = 3650;

/// Default maximum history page size.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

/// Limits applied to every ledger request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerPolicy {
    /// Largest amount a single operation may move.
    pub max_amount: Decimal,
    /// Longest description accepted, after trimming.
    pub max_description_len: usize,
    /// Longest lifetime an earned lot may be given.
    pub max_expiration_days: u32,
    /// Lifetime applied when `earn` is called without one.
    ///
    /// `None` means lots earned without an explicit lifetime never expire.
    pub default_expiration_days: Option<u32>,
    /// Largest history page a caller may request.
    pub max_page_size: u32,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            max_amount: Decimal::from(DEFAULT_MAX_AMOUNT),
            max_description_len: DEFAULT_MAX_DESCRIPTION_LEN,
            max_expiration_days: DEFAULT_MAX_EXPIRATION_DAYS,
            default_expiration_days: None,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}
