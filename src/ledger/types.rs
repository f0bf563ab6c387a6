//! Ledger domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owning member of a lot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque, immutable lot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(Uuid);

impl LotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a lot records.
///
/// Only `Earned` lots are ever drawn from. The consuming kinds are journal
/// entries describing consumption that already happened and always carry a
/// negative amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotKind {
    Earned,
    Deducted,
    Expired,
    Exchanged,
}

impl LotKind {
    pub const ALL: [LotKind; 4] = [
        LotKind::Earned,
        LotKind::Deducted,
        LotKind::Expired,
        LotKind::Exchanged,
    ];

    /// True for journal entries that draw points out of an earned lot.
    pub fn is_consuming(self) -> bool {
        !matches!(self, LotKind::Earned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LotKind::Earned => "EARNED",
            LotKind::Deducted => "DEDUCTED",
            LotKind::Expired => "EXPIRED",
            LotKind::Exchanged => "EXCHANGED",
        }
    }
}

impl fmt::Display for LotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EARNED" => Ok(LotKind::Earned),
            "DEDUCTED" => Ok(LotKind::Deducted),
            "EXPIRED" => Ok(LotKind::Expired),
            "EXCHANGED" => Ok(LotKind::Exchanged),
            other => Err(other.to_string()),
        }
    }
}

/// The atomic unit of the ledger.
///
/// Every field except `is_expired` is fixed at creation. `is_expired` exists
/// only for `Earned` lots and only ever moves from false to true, when the
/// expiration sweeper retires the lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointLot {
    pub id: LotId,
    pub member_id: MemberId,
    pub amount: Decimal,
    pub kind: LotKind,
    pub description: String,
    /// Earned lot this entry draws from. `None` on earned lots.
    pub source_lot_id: Option<LotId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
}

impl PointLot {
    /// A fresh earned lot.
    pub fn earned(
        member_id: MemberId,
        amount: Decimal,
        description: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LotId::new(),
            member_id,
            amount,
            kind: LotKind::Earned,
            description: description.into(),
            source_lot_id: None,
            expires_at,
            is_expired: false,
            created_at,
        }
    }

    /// A negative journal entry drawing `take` points out of `source`.
    pub fn journal_entry(
        member_id: MemberId,
        kind: LotKind,
        take: Decimal,
        source: LotId,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(kind.is_consuming());
        Self {
            id: LotId::new(),
            member_id,
            amount: -take.abs(),
            kind,
            description: description.into(),
            source_lot_id: Some(source),
            expires_at: None,
            is_expired: false,
            created_at,
        }
    }

    /// Availability per expiration rules, evaluated at `now`.
    ///
    /// Always false for consuming kinds.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.kind == LotKind::Earned
            && !self.is_expired
            && self.expires_at.map_or(true, |at| at > now)
    }

    /// Past its expiration date but not yet retired by a sweep.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.kind == LotKind::Earned
            && !self.is_expired
            && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Display amount: positive for earned lots, negative for the rest.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_consuming() {
            -self.amount.abs()
        } else {
            self.amount.abs()
        }
    }
}

/// A row of a member's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub lot: PointLot,
    pub signed_amount: Decimal,
}

impl From<PointLot> for HistoryEntry {
    fn from(lot: PointLot) -> Self {
        let signed_amount = lot.signed_amount();
        Self { lot, signed_amount }
    }
}

/// One page of reverse-chronological history. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryEntry>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl HistoryPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64)
    }
}

/// Aggregate report for one member.
///
/// Consuming totals are reported as positive magnitudes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointBalance {
    pub total_earned: Decimal,
    pub total_deducted: Decimal,
    pub total_expired: Decimal,
    pub total_exchanged: Decimal,
    pub available_balance: Decimal,
}
