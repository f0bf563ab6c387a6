//! Lot storage.
//!
//! The Lot Store is the leaf of the ledger: a durable, append-only collection
//! of point lots. It knows how to insert, batch insert, scan with a filter,
//! and retire earned lots. It knows nothing about balances or FIFO order.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::ledger::{LotId, MemberId};

pub mod helpers;
mod lease;
mod lot_store;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use lease::SweepLease;
pub use lot_store::{JournalGuard, LotFilter, LotOrder, LotStore};
pub use memory::{MemoryLotStore, MemorySweepLease};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteLotStore, SqliteSweepLease};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Lot already exists: {0}")]
    DuplicateLot(LotId),

    #[error("Lot {0} is not an unretired earned lot")]
    AlreadyRetired(LotId),

    #[error("Journal of {member_id} changed: expected {expected} lots, found {actual}")]
    JournalConflict {
        member_id: MemberId,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid decimal '{value}': {reason}")]
    InvalidDecimal { value: String, reason: String },

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Invalid lot kind '{0}'")]
    InvalidKind(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown storage type: {0}")]
    UnknownBackend(String),
}

impl StorageError {
    /// Infrastructure hiccups a caller may retry.
    ///
    /// Decode failures and contract violations are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_)
            | StorageError::Io(_)
            | StorageError::JournalConflict { .. } => true,
            #[cfg(feature = "sqlite")]
            StorageError::Database(e) => match e {
                sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::WorkerCrashed => true,
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("5") | Some("6"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// The store plus the lease primitive living next to it.
#[derive(Clone)]
pub struct StorageBackend {
    pub lots: Arc<dyn LotStore>,
    pub lease: Arc<dyn SweepLease>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<StorageBackend> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(StorageBackend {
                lots: Arc::new(MemoryLotStore::new()),
                lease: Arc::new(MemorySweepLease::new()),
            })
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
            use std::str::FromStr;

            info!("Storage: sqlite at {}", config.path);

            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5));
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await?;

            let lots = SqliteLotStore::new(pool.clone());
            lots.init().await?;
            let lease = SqliteSweepLease::new(pool);
            lease.init().await?;

            Ok(StorageBackend {
                lots: Arc::new(lots),
                lease: Arc::new(lease),
            })
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::UnknownBackend("sqlite".to_string()))
        }
    }
}
