//! Live view over one member's journal.
//!
//! Nothing here is cached across calls: a `Journal` is built from a fresh
//! scan, answers questions about it, and is dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::fifo::{FifoError, LotPosition};
use super::types::{LotId, LotKind, PointBalance, PointLot};

/// All lots of one member plus per-lot consumption.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    lots: Vec<PointLot>,
    consumed: HashMap<LotId, Decimal>,
}

impl Journal {
    pub fn new(lots: Vec<PointLot>) -> Self {
        let mut consumed: HashMap<LotId, Decimal> = HashMap::new();
        for lot in lots.iter().filter(|lot| lot.kind.is_consuming()) {
            if let Some(source) = lot.source_lot_id {
                *consumed.entry(source).or_default() += lot.amount.abs();
            }
        }
        Self { lots, consumed }
    }

    pub fn lots(&self) -> &[PointLot] {
        &self.lots
    }

    /// Number of lots scanned. Lots are never deleted, so this only grows.
    pub fn len(&self) -> u64 {
        self.lots.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn find(&self, id: LotId) -> Option<&PointLot> {
        self.lots.iter().find(|lot| lot.id == id)
    }

    /// Points of an earned lot not yet drawn by any journal entry.
    pub fn remaining(&self, lot: &PointLot) -> Decimal {
        let consumed = self.consumed.get(&lot.id).copied().unwrap_or_default();
        lot.amount - consumed
    }

    /// Available earned lots with something left, in consumption order
    /// (`created_at` ascending, ties broken by id).
    pub fn positions(&self, now: DateTime<Utc>) -> Result<Vec<LotPosition>, FifoError> {
        let mut positions = Vec::new();
        for lot in self.lots.iter().filter(|lot| lot.is_available(now)) {
            let remaining = self.remaining(lot);
            if remaining < Decimal::ZERO {
                return Err(FifoError::OverConsumed {
                    lot_id: lot.id,
                    remaining,
                });
            }
            if remaining > Decimal::ZERO {
                positions.push(LotPosition {
                    lot: lot.clone(),
                    remaining,
                });
            }
        }
        positions.sort_by(|a, b| {
            a.lot
                .created_at
                .cmp(&b.lot.created_at)
                .then_with(|| a.lot.id.cmp(&b.lot.id))
        });
        Ok(positions)
    }

    /// Sum of what is left on every available earned lot.
    pub fn available_balance(&self, now: DateTime<Utc>) -> Result<Decimal, FifoError> {
        Ok(self
            .positions(now)?
            .iter()
            .map(|position| position.remaining)
            .sum())
    }

    /// Sum of every lot's stored amount, expired or not.
    pub fn net_total(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.amount).sum()
    }

    pub fn totals(&self, now: DateTime<Utc>) -> Result<PointBalance, FifoError> {
        let mut balance = PointBalance {
            available_balance: self.available_balance(now)?,
            ..PointBalance::default()
        };
        for lot in &self.lots {
            let magnitude = lot.amount.abs();
            match lot.kind {
                LotKind::Earned => balance.total_earned += magnitude,
                LotKind::Deducted => balance.total_deducted += magnitude,
                LotKind::Expired => balance.total_expired += magnitude,
                LotKind::Exchanged => balance.total_exchanged += magnitude,
            }
        }
        Ok(balance)
    }
}
