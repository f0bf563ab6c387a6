//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Point lots table schema.
#[derive(Iden, Clone, Copy)]
pub enum PointLots {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "member_id"]
    MemberId,
    #[iden = "amount"]
    Amount,
    #[iden = "kind"]
    Kind,
    #[iden = "description"]
    Description,
    #[iden = "source_lot_id"]
    SourceLotId,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "is_expired"]
    IsExpired,
    #[iden = "created_at"]
    CreatedAt,
}

/// Columns in the order rows are decoded.
pub const POINT_LOT_COLUMNS: [PointLots; 9] = [
    PointLots::Id,
    PointLots::MemberId,
    PointLots::Amount,
    PointLots::Kind,
    PointLots::Description,
    PointLots::SourceLotId,
    PointLots::ExpiresAt,
    PointLots::IsExpired,
    PointLots::CreatedAt,
];

/// Sweep lease table schema.
#[derive(Iden, Clone, Copy)]
pub enum SweepLeases {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "holder"]
    Holder,
    #[iden = "expires_at"]
    ExpiresAt,
}

/// SQL for creating the point lots table.
///
/// Amounts are canonical decimal text; timestamps are fixed-width RFC 3339
/// UTC text, so string comparison is chronological. The triggers make every
/// column except `is_expired` immutable, make `is_expired` one-way, and
/// forbid deletes.
pub const CREATE_POINT_LOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS point_lots (
    id TEXT PRIMARY KEY NOT NULL,
    member_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('EARNED', 'DEDUCTED', 'EXPIRED', 'EXCHANGED')),
    description TEXT NOT NULL,
    source_lot_id TEXT,
    expires_at TEXT,
    is_expired INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_point_lots_member_created ON point_lots(member_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_point_lots_expiry ON point_lots(kind, is_expired, expires_at);
CREATE INDEX IF NOT EXISTS idx_point_lots_source ON point_lots(source_lot_id);

CREATE TRIGGER IF NOT EXISTS point_lots_immutable
BEFORE UPDATE ON point_lots
WHEN NEW.id IS NOT OLD.id
    OR NEW.member_id IS NOT OLD.member_id
    OR NEW.amount IS NOT OLD.amount
    OR NEW.kind IS NOT OLD.kind
    OR NEW.description IS NOT OLD.description
    OR NEW.source_lot_id IS NOT OLD.source_lot_id
    OR NEW.expires_at IS NOT OLD.expires_at
    OR NEW.created_at IS NOT OLD.created_at
    OR (OLD.is_expired = 1 AND NEW.is_expired = 0)
    OR (OLD.kind <> 'EARNED' AND NEW.is_expired <> OLD.is_expired)
BEGIN
    SELECT RAISE(ABORT, 'point lots are immutable');
END;

CREATE TRIGGER IF NOT EXISTS point_lots_append_only
BEFORE DELETE ON point_lots
BEGIN
    SELECT RAISE(ABORT, 'point lots are append-only');
END;
"#;

/// SQL for creating the sweep lease table.
pub const CREATE_SWEEP_LEASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sweep_leases (
    name TEXT PRIMARY KEY NOT NULL,
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
