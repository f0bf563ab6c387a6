//! Audit trail delivery.
//!
//! Every journal mutation produces one `AuditRecord` carrying the member's
//! balance before and after that entry. Records are delivered after the
//! journal write commits. The journal stays the source of truth, so a failed
//! delivery is logged and never rolls anything back.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ledger::{LotId, LotKind, MemberId, PointLot};

/// Tracing target audit records are emitted on.
pub const AUDIT_TARGET: &str = "audit";

/// Errors from audit delivery.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// One journal mutation, as seen by auditors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub member_id: MemberId,
    pub lot_id: LotId,
    pub kind: LotKind,
    /// Signed amount of the entry.
    pub amount: Decimal,
    pub source_lot_id: Option<LotId>,
    pub description: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn for_lot(lot: &PointLot, balance_before: Decimal, balance_after: Decimal) -> Self {
        Self {
            member_id: lot.member_id.clone(),
            lot_id: lot.id,
            kind: lot.kind,
            amount: lot.signed_amount(),
            source_lot_id: lot.source_lot_id,
            description: lot.description.clone(),
            balance_before,
            balance_after,
            recorded_at: lot.created_at,
        }
    }
}

/// Receives audit records.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Deliver records in order, logging failures instead of returning them.
pub(crate) async fn deliver(recorder: &dyn AuditRecorder, records: &[AuditRecord]) {
    for record in records {
        if let Err(e) = recorder.record(record).await {
            warn!(
                member_id = %record.member_id,
                lot_id = %record.lot_id,
                kind = %record.kind,
                error = %e,
                "Audit delivery failed"
            );
        }
    }
}

/// Emits each record as JSON on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditRecorder;

impl TracingAuditRecorder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditRecorder for TracingAuditRecorder {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        info!(target: AUDIT_TARGET, member_id = %record.member_id, record = %json, "ledger entry");
        Ok(())
    }
}

/// Keeps records in memory. For tests.
#[derive(Debug, Default)]
pub struct MemoryAuditRecorder {
    records: Mutex<Vec<AuditRecord>>,
    fail: AtomicBool,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` call fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn records_for(&self, member_id: &MemberId) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| &record.member_id == member_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit failure injected".to_string()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
