//! Point ledger core.
//!
//! Points live in lots. An earned lot is credited once; deductions,
//! exchanges and expirations are negative journal entries that each draw
//! from one earned lot, named by `source_lot_id`. What is left of a lot is
//! its amount minus everything drawn from it, and the available balance is
//! the sum of what is left on lots that have not expired.

mod engine;
mod error;
pub mod fifo;
mod journal;
mod locks;
mod types;
pub mod validate;

pub use engine::LedgerEngine;
pub(crate) use engine::GUARDED_WRITE_ATTEMPTS;
pub use error::{LedgerError, Result};
pub use fifo::{Consumption, FifoError, LotPosition};
pub use journal::Journal;
pub use locks::{MemberGuard, MemberLocks};
pub use types::{
    HistoryEntry, HistoryPage, LotId, LotKind, MemberId, PointBalance, PointLot,
};
