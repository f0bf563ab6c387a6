//! Backend factory for interface tests.
//!
//! Provides a unified interface to create storage backends based on environment configuration.

use std::env;
use std::sync::Arc;

use pointledger::storage::{LotStore, MemoryLotStore, SqliteLotStore};

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Holds the storage implementation for a backend.
pub struct StorageContext {
    pub lot_store: Arc<dyn LotStore>,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("lot_store", &"<dyn LotStore>")
            .finish()
    }
}

impl StorageContext {
    /// Create a storage context for the configured backend.
    pub async fn new(backend: StorageBackend) -> Self {
        match backend {
            StorageBackend::Sqlite => Self::create_sqlite().await,
            StorageBackend::Memory => Self::create_memory(),
        }
    }

    async fn create_sqlite() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;

        // One connection: every pooled connection would otherwise get its
        // own private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create SQLite pool");

        let store = SqliteLotStore::new(pool);
        store.init().await.expect("Failed to create schema");

        StorageContext {
            lot_store: Arc::new(store),
        }
    }

    fn create_memory() -> Self {
        StorageContext {
            lot_store: Arc::new(MemoryLotStore::new()),
        }
    }
}
