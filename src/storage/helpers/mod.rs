//! Shared storage helper functions.
//!
//! Text encodings for amounts, timestamps and kinds used by the SQL backend
//! and by anything else that needs a stable, sortable representation.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use super::{Result, StorageError};
use crate::ledger::LotKind;

/// Fixed-width RFC 3339 UTC text with microseconds.
///
/// Every encoded instant has the same length, so lexical order is
/// chronological order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse text produced by [`format_timestamp`] (any RFC 3339 is accepted).
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(text.to_string()))
}

/// Canonical decimal text (trailing zeros removed).
pub fn format_decimal(amount: &Decimal) -> String {
    amount.normalize().to_string()
}

pub fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| StorageError::InvalidDecimal {
        value: text.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_kind(text: &str) -> Result<LotKind> {
    LotKind::from_str(text).map_err(StorageError::InvalidKind)
}
