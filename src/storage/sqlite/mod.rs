//! SQLite implementations of storage interfaces.

mod lot_store;
mod sweep_lease;

pub use lot_store::SqliteLotStore;
pub use sweep_lease::SqliteSweepLease;

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use super::Result;

/// A write transaction on a pooled connection.
///
/// BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
/// when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
/// If the owning future is dropped before `finish`, the connection is closed
/// instead of going back to the pool with the transaction still open.
struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl ImmediateTx {
    async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut tx = Self {
            conn: pool.acquire().await?,
            open: true,
        };
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *tx.conn).await?;
        Ok(tx)
    }

    fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Commit on success, roll back on failure, and hand the outcome back.
    async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *self.conn).await?;
                self.open = false;
                Ok(value)
            }
            Err(e) => {
                if sqlx::query("ROLLBACK").execute(&mut *self.conn).await.is_ok() {
                    self.open = false;
                }
                Err(e)
            }
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            self.conn.close_on_drop();
        }
    }
}
