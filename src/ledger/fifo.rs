//! FIFO consumption planning.
//!
//! Pure functions: given the available lots of a member in consumption
//! order, decide how much to draw from each. No I/O.

use rust_decimal::Decimal;

use super::error::LedgerError;
use super::types::{LotId, PointLot};

/// An available earned lot and what is left on it.
#[derive(Debug, Clone, PartialEq)]
pub struct LotPosition {
    pub lot: PointLot,
    pub remaining: Decimal,
}

/// Draw `take` points out of `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub source: LotId,
    pub take: Decimal,
}

/// Journal states the planner refuses to work with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FifoError {
    #[error("available lots exhausted with {shortfall} of {requested} still unconsumed")]
    Exhausted {
        requested: Decimal,
        shortfall: Decimal,
    },

    #[error("lot {lot_id} consumed beyond its amount (remaining {remaining})")]
    OverConsumed { lot_id: LotId, remaining: Decimal },
}

impl From<FifoError> for LedgerError {
    fn from(err: FifoError) -> Self {
        LedgerError::ConsistencyViolation(err.to_string())
    }
}

/// Total left across positions.
pub fn total(positions: &[LotPosition]) -> Decimal {
    positions.iter().map(|p| p.remaining).sum()
}

/// Plan consumption of `amount` from `positions`, oldest first.
///
/// Each position is visited at most once and never drawn beyond its
/// `remaining`. The takes sum to exactly `amount`. Running out of lots is an
/// error, not a partial plan.
pub fn plan(positions: &[LotPosition], amount: Decimal) -> Result<Vec<Consumption>, FifoError> {
    let mut outstanding = amount;
    let mut consumptions = Vec::new();

    for position in positions {
        if outstanding <= Decimal::ZERO {
            break;
        }
        if position.remaining <= Decimal::ZERO {
            continue;
        }
        let take = outstanding.min(position.remaining);
        consumptions.push(Consumption {
            source: position.lot.id,
            take,
        });
        outstanding -= take;
    }

    if outstanding > Decimal::ZERO {
        return Err(FifoError::Exhausted {
            requested: amount,
            shortfall: outstanding,
        });
    }

    Ok(consumptions)
}
