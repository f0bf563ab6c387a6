//! SQLite-backed sweep lease.
//!
//! One row per lease name. A holder may take the row when it is absent,
//! lapsed, or already theirs; the check and the write share one
//! `BEGIN IMMEDIATE` transaction so two processes cannot both win.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::ImmediateTx;
use crate::storage::helpers::{format_timestamp, parse_timestamp};
use crate::storage::schema::{SweepLeases, CREATE_SWEEP_LEASES_TABLE};
use crate::storage::{Result, SweepLease};

const SWEEP_LEASE_NAME: &str = "expiration-sweep";

/// SQLite implementation of SweepLease.
pub struct SqliteSweepLease {
    pool: SqlitePool,
    name: String,
}

impl SqliteSweepLease {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            name: SWEEP_LEASE_NAME.to_string(),
        }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SWEEP_LEASES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn acquire_in(
        &self,
        conn: &mut SqliteConnection,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();

        let (sql, values) = Query::select()
            .columns([SweepLeases::Holder, SweepLeases::ExpiresAt])
            .from(SweepLeases::Table)
            .and_where(Expr::col(SweepLeases::Name).eq(self.name.as_str()))
            .build_sqlx(SqliteQueryBuilder);
        let current = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(row) = current {
            let current_holder: String = row.try_get("holder")?;
            let expires_at: String = row.try_get("expires_at")?;
            if current_holder != holder && parse_timestamp(&expires_at)? > now {
                debug!(lease = %self.name, holder = %current_holder, "Lease held elsewhere");
                return Ok(false);
            }
        }

        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let (sql, values) = Query::insert()
            .into_table(SweepLeases::Table)
            .columns([SweepLeases::Name, SweepLeases::Holder, SweepLeases::ExpiresAt])
            .values_panic([
                self.name.as_str().into(),
                holder.into(),
                format_timestamp(&expires_at).into(),
            ])
            .on_conflict(
                OnConflict::column(SweepLeases::Name)
                    .update_columns([SweepLeases::Holder, SweepLeases::ExpiresAt])
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        Ok(true)
    }
}

#[async_trait]
impl SweepLease for SqliteSweepLease {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;
        let result = self.acquire_in(tx.conn(), holder, ttl).await;
        tx.finish(result).await
    }

    async fn release(&self, holder: &str) -> Result<()> {
        let (sql, values) = Query::delete()
            .from_table(SweepLeases::Table)
            .and_where(Expr::col(SweepLeases::Name).eq(self.name.as_str()))
            .and_where(Expr::col(SweepLeases::Holder).eq(holder))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }
}
