//! Input validation for ledger commands.
//!
//! Everything that crosses into the engine from a caller goes through here
//! before any lock is taken or any row is read.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::error::{LedgerError, Result};
use super::types::MemberId;
use crate::config::LedgerPolicy;

/// Length limits for validated fields.
pub mod limits {
    /// Maximum member id length.
    pub const MAX_MEMBER_ID_LENGTH: usize = 128;
    /// Fractional digits allowed on an amount (currency precision).
    pub const MAX_AMOUNT_SCALE: u32 = 2;
    /// Upper bound on any day count: lot lifetimes and look-ahead horizons.
    pub const MAX_DAYS: u32 = 36_500;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const MEMBER_ID_EMPTY: &str = "member id cannot be empty";
    pub const MEMBER_ID_TOO_LONG: &str = "member id exceeds maximum length";
    pub const MEMBER_ID_INVALID_CHARS: &str =
        "member id contains invalid characters (allowed: a-zA-Z0-9 _ . : @ -)";

    pub const AMOUNT_NOT_POSITIVE: &str = "amount must be positive";
    pub const AMOUNT_TOO_PRECISE: &str = "amount has more than 2 fractional digits";
    pub const AMOUNT_TOO_LARGE: &str = "amount exceeds maximum";

    pub const DESCRIPTION_EMPTY: &str = "description cannot be empty";
    pub const DESCRIPTION_TOO_LONG: &str = "description exceeds maximum length";

    pub const EXPIRATION_DAYS_ZERO: &str = "expiration days must be at least 1";
    pub const EXPIRATION_DAYS_TOO_LARGE: &str = "expiration days exceeds maximum";

    pub const PAGE_ZERO: &str = "page numbers start at 1";
    pub const PAGE_SIZE_OUT_OF_RANGE: &str = "page size out of range";

    pub const HORIZON_DAYS_ZERO: &str = "look-ahead horizon must be at least 1 day";
    pub const HORIZON_DAYS_TOO_LARGE: &str = "look-ahead horizon exceeds maximum";

    pub const DATE_OUT_OF_RANGE: &str = "date out of range";
}

/// Validate a member id.
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters
/// - May contain: letters, digits, `_`, `.`, `:`, `@`, `-`
pub fn member_id(id: &MemberId) -> Result<()> {
    let id = id.as_str();
    if id.is_empty() {
        return Err(LedgerError::validation(errmsg::MEMBER_ID_EMPTY));
    }
    if id.len() > limits::MAX_MEMBER_ID_LENGTH {
        return Err(LedgerError::validation(format!(
            "{} (max: {}, got: {})",
            errmsg::MEMBER_ID_TOO_LONG,
            limits::MAX_MEMBER_ID_LENGTH,
            id.len()
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '@' | '-'))
    {
        return Err(LedgerError::validation(errmsg::MEMBER_ID_INVALID_CHARS));
    }
    Ok(())
}

/// Validate a point amount and return it normalised.
pub fn amount(amount: Decimal, policy: &LedgerPolicy) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "{} (got: {})",
            errmsg::AMOUNT_NOT_POSITIVE,
            amount
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > limits::MAX_AMOUNT_SCALE {
        return Err(LedgerError::validation(format!(
            "{} (got: {})",
            errmsg::AMOUNT_TOO_PRECISE,
            amount
        )));
    }
    if normalized > policy.max_amount {
        return Err(LedgerError::validation(format!(
            "{} (max: {}, got: {})",
            errmsg::AMOUNT_TOO_LARGE,
            policy.max_amount,
            amount
        )));
    }
    Ok(normalized)
}

/// Validate a free-text note and return it trimmed.
pub fn description<'a>(text: &'a str, policy: &LedgerPolicy) -> Result<&'a str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(errmsg::DESCRIPTION_EMPTY));
    }
    let len = trimmed.chars().count();
    if len > policy.max_description_len {
        return Err(LedgerError::validation(format!(
            "{} (max: {}, got: {})",
            errmsg::DESCRIPTION_TOO_LONG,
            policy.max_description_len,
            len
        )));
    }
    Ok(trimmed)
}

/// Validate a lot lifetime in days.
pub fn expiration_days(days: u32, policy: &LedgerPolicy) -> Result<u32> {
    if days == 0 {
        return Err(LedgerError::validation(errmsg::EXPIRATION_DAYS_ZERO));
    }
    let max = policy.max_expiration_days.min(limits::MAX_DAYS);
    if days > max {
        return Err(LedgerError::validation(format!(
            "{} (max: {}, got: {})",
            errmsg::EXPIRATION_DAYS_TOO_LARGE,
            max,
            days
        )));
    }
    Ok(days)
}

/// Validate 1-based pagination.
pub fn page(page: u32, page_size: u32, policy: &LedgerPolicy) -> Result<()> {
    if page == 0 {
        return Err(LedgerError::validation(errmsg::PAGE_ZERO));
    }
    if page_size == 0 || page_size > policy.max_page_size {
        return Err(LedgerError::validation(format!(
            "{} (1..={}, got: {})",
            errmsg::PAGE_SIZE_OUT_OF_RANGE,
            policy.max_page_size,
            page_size
        )));
    }
    Ok(())
}

/// Validate a look-ahead horizon.
pub fn horizon_days(days: u32) -> Result<u32> {
    if days == 0 {
        return Err(LedgerError::validation(errmsg::HORIZON_DAYS_ZERO));
    }
    if days > limits::MAX_DAYS {
        return Err(LedgerError::validation(format!(
            "{} (max: {}, got: {})",
            errmsg::HORIZON_DAYS_TOO_LARGE,
            limits::MAX_DAYS,
            days
        )));
    }
    Ok(days)
}

/// `days` whole days after `from`, or a validation error when the result
/// does not fit in a timestamp.
pub fn days_after(from: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|span| from.checked_add_signed(span))
        .ok_or_else(|| {
            LedgerError::validation(format!(
                "{} ({} + {} days)",
                errmsg::DATE_OUT_OF_RANGE,
                from,
                days
            ))
        })
}
