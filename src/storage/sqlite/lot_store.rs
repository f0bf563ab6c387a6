//! SQLite LotStore implementation.

use std::str::FromStr;

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::ImmediateTx;
use crate::ledger::{LotId, LotKind, MemberId, PointLot};
use crate::storage::helpers::{
    format_decimal, format_timestamp, parse_decimal, parse_kind, parse_timestamp,
};
use crate::storage::schema::{PointLots, CREATE_POINT_LOTS_TABLE, POINT_LOT_COLUMNS};
use crate::storage::{JournalGuard, LotFilter, LotOrder, LotStore, Result, StorageError};

/// SQLite implementation of LotStore.
pub struct SqliteLotStore {
    pool: SqlitePool,
}

impl SqliteLotStore {
    /// Create a new SQLite lot store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_POINT_LOTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert lots within an already-started transaction.
    async fn insert_lots(conn: &mut SqliteConnection, lots: &[PointLot]) -> Result<()> {
        for lot in lots {
            let (sql, values) = Query::insert()
                .into_table(PointLots::Table)
                .columns(POINT_LOT_COLUMNS)
                .values_panic([
                    lot.id.to_string().into(),
                    lot.member_id.as_str().into(),
                    format_decimal(&lot.amount).into(),
                    lot.kind.as_str().into(),
                    lot.description.as_str().into(),
                    lot.source_lot_id.map(|id| id.to_string()).into(),
                    lot.expires_at.as_ref().map(format_timestamp).into(),
                    lot.is_expired.into(),
                    format_timestamp(&lot.created_at).into(),
                ])
                .build_sqlx(SqliteQueryBuilder);

            sqlx::query_with(&sql, values)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_insert_error(e, lot.id))?;
        }
        Ok(())
    }

    /// Verify a journal guard within an already-started transaction.
    ///
    /// The count runs after BEGIN IMMEDIATE, so no other writer can append
    /// for the member between this check and the commit.
    async fn check_guard(conn: &mut SqliteConnection, guard: &JournalGuard) -> Result<()> {
        let (sql, values) = Query::select()
            .expr(Expr::col(PointLots::Id).count())
            .from(PointLots::Table)
            .and_where(Expr::col(PointLots::MemberId).eq(guard.member_id.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_one(&mut *conn)
            .await?;
        let count: i64 = row.try_get(0)?;
        guard.check(count.max(0) as u64)
    }

    /// Flag earned lots within an already-started transaction.
    async fn flag_expired(conn: &mut SqliteConnection, lot_ids: &[LotId]) -> Result<()> {
        for id in lot_ids {
            let (sql, values) = Query::update()
                .table(PointLots::Table)
                .value(PointLots::IsExpired, true)
                .and_where(Expr::col(PointLots::Id).eq(id.to_string()))
                .and_where(Expr::col(PointLots::Kind).eq(LotKind::Earned.as_str()))
                .and_where(Expr::col(PointLots::IsExpired).eq(false))
                .build_sqlx(SqliteQueryBuilder);

            let done = sqlx::query_with(&sql, values).execute(&mut *conn).await?;
            if done.rows_affected() != 1 {
                return Err(StorageError::AlreadyRetired(*id));
            }
        }
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error, id: LotId) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateLot(id),
        _ => err.into(),
    }
}

fn apply_filter(select: &mut SelectStatement, filter: &LotFilter) {
    if let Some(member_id) = &filter.member_id {
        select.and_where(Expr::col(PointLots::MemberId).eq(member_id.as_str()));
    }
    if let Some(kind) = filter.kind {
        select.and_where(Expr::col(PointLots::Kind).eq(kind.as_str()));
    }
    if let Some(is_expired) = filter.is_expired {
        select.and_where(Expr::col(PointLots::IsExpired).eq(is_expired));
    }
    if let Some(bound) = &filter.expires_after {
        select.and_where(Expr::col(PointLots::ExpiresAt).gt(format_timestamp(bound)));
    }
    if let Some(bound) = &filter.expires_at_or_before {
        select.and_where(Expr::col(PointLots::ExpiresAt).lte(format_timestamp(bound)));
    }
}

fn apply_order(select: &mut SelectStatement, order: LotOrder) {
    match order {
        LotOrder::CreatedAsc => {
            select
                .order_by(PointLots::CreatedAt, Order::Asc)
                .order_by(PointLots::Id, Order::Asc);
        }
        LotOrder::CreatedDesc => {
            select
                .order_by(PointLots::CreatedAt, Order::Desc)
                .order_by(PointLots::Id, Order::Desc);
        }
        LotOrder::ExpiresAsc => {
            select
                .order_by(PointLots::ExpiresAt, Order::Asc)
                .order_by(PointLots::Id, Order::Asc);
        }
    }
}

fn decode_lot(row: &SqliteRow) -> Result<PointLot> {
    let id: String = row.try_get("id")?;
    let member_id: String = row.try_get("member_id")?;
    let amount: String = row.try_get("amount")?;
    let kind: String = row.try_get("kind")?;
    let description: String = row.try_get("description")?;
    let source_lot_id: Option<String> = row.try_get("source_lot_id")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;
    let is_expired: bool = row.try_get("is_expired")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(PointLot {
        id: LotId::from_str(&id)?,
        member_id: MemberId::from(member_id),
        amount: parse_decimal(&amount)?,
        kind: parse_kind(&kind)?,
        description,
        source_lot_id: source_lot_id
            .as_deref()
            .map(LotId::from_str)
            .transpose()?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        is_expired,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl LotStore for SqliteLotStore {
    async fn insert(&self, lot: PointLot) -> Result<()> {
        self.insert_batch(vec![lot]).await
    }

    async fn insert_batch(&self, lots: Vec<PointLot>) -> Result<()> {
        if lots.is_empty() {
            return Ok(());
        }

        let mut tx = ImmediateTx::begin(&self.pool).await?;
        let result = Self::insert_lots(tx.conn(), &lots).await;
        tx.finish(result).await
    }

    async fn append_guarded(&self, guard: &JournalGuard, lots: Vec<PointLot>) -> Result<()> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;
        let result = async {
            Self::check_guard(tx.conn(), guard).await?;
            Self::insert_lots(tx.conn(), &lots).await
        }
        .await;
        tx.finish(result).await
    }

    async fn get(&self, id: LotId) -> Result<Option<PointLot>> {
        let (sql, values) = Query::select()
            .columns(POINT_LOT_COLUMNS)
            .from(PointLots::Table)
            .and_where(Expr::col(PointLots::Id).eq(id.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_lot).transpose()
    }

    async fn scan(&self, filter: &LotFilter) -> Result<Vec<PointLot>> {
        let mut select = Query::select();
        select.columns(POINT_LOT_COLUMNS).from(PointLots::Table);
        apply_filter(&mut select, filter);
        apply_order(&mut select, filter.order);
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                select.limit(limit).offset(offset.unwrap_or(0));
            }
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => {
                select.limit(i64::MAX as u64).offset(offset);
            }
            (None, None) => {}
        }
        let (sql, values) = select.build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        let mut lots = Vec::with_capacity(rows.len());
        for row in &rows {
            lots.push(decode_lot(row)?);
        }
        Ok(lots)
    }

    async fn count(&self, filter: &LotFilter) -> Result<u64> {
        let mut select = Query::select();
        select
            .expr(Expr::col(PointLots::Id).count())
            .from(PointLots::Table);
        apply_filter(&mut select, filter);
        let (sql, values) = select.build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn retire(
        &self,
        guard: &JournalGuard,
        lot_ids: &[LotId],
        entries: Vec<PointLot>,
    ) -> Result<()> {
        if lot_ids.is_empty() && entries.is_empty() {
            return Ok(());
        }

        let mut tx = ImmediateTx::begin(&self.pool).await?;
        let result = async {
            Self::check_guard(tx.conn(), guard).await?;
            Self::flag_expired(tx.conn(), lot_ids).await?;
            Self::insert_lots(tx.conn(), &entries).await
        }
        .await;
        tx.finish(result).await
    }
}
