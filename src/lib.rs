//! pointledger - FIFO point ledger
//!
//! Tracks loyalty points as lots with their own earn and expiration dates.
//! Deductions and exchanges consume the oldest available lots first, lapsed
//! lots are retired by a background sweeper, and every balance is computed
//! live from the append-only lot journal.

pub mod audit;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod utils;

pub use service::{PointLedger, PointLedgerBuilder, ServiceError};
