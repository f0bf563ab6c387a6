//! The point ledger service surface.
//!
//! `PointLedger` wires a store, an audit recorder, a clock and the member
//! lock registry into one `LedgerEngine` and one `ExpirationSweeper` that
//! share them, and exposes the ledger's commands and queries.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::info;

use crate::audit::{AuditRecorder, TracingAuditRecorder};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError, LeaseMode, LedgerPolicy, SweeperConfig};
use crate::ledger::{
    HistoryPage, LedgerEngine, LotId, MemberId, MemberLocks, PointBalance, PointLot, Result,
};
use crate::storage::{init_storage, LotStore, StorageError, SweepLease};
use crate::sweeper::{ExpirationSweeper, SweepOutcome, SweepScheduler};

/// Errors building a ledger from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Command and query surface of the point ledger.
pub struct PointLedger {
    engine: LedgerEngine,
    sweeper: Arc<ExpirationSweeper>,
    sweeper_config: SweeperConfig,
}

impl PointLedger {
    pub fn builder(store: Arc<dyn LotStore>) -> PointLedgerBuilder {
        PointLedgerBuilder::new(store)
    }

    /// Build a ledger from validated configuration.
    ///
    /// Uses the system clock and the tracing audit recorder. With
    /// `sweeper.lease: store` the storage backend's lease fences sweeps.
    pub async fn from_config(config: &Config) -> std::result::Result<Self, ServiceError> {
        config.validate()?;
        let backend = init_storage(&config.storage).await?;

        let mut builder = PointLedger::builder(backend.lots)
            .policy(config.ledger.clone())
            .sweeper_config(config.sweeper.clone());
        if config.sweeper.lease == LeaseMode::Store {
            builder = builder.lease(backend.lease);
        }
        let ledger = builder.build();

        info!(
            storage = ?config.storage.storage_type,
            lease = ?config.sweeper.lease,
            holder = %ledger.sweeper.holder(),
            "Point ledger ready"
        );
        Ok(ledger)
    }

    pub async fn earn(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
        expiration_days: Option<u32>,
    ) -> Result<PointLot> {
        self.engine
            .earn(member_id, amount, description, expiration_days)
            .await
    }

    pub async fn deduct(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
    ) -> Result<Vec<PointLot>> {
        self.engine.deduct(member_id, amount, description).await
    }

    pub async fn exchange(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        label: &str,
    ) -> Result<Vec<PointLot>> {
        self.engine.exchange(member_id, amount, label).await
    }

    pub async fn get_available_balance(&self, member_id: &MemberId) -> Result<Decimal> {
        self.engine.get_available_balance(member_id).await
    }

    pub async fn get_point_balance(&self, member_id: &MemberId) -> Result<PointBalance> {
        self.engine.get_point_balance(member_id).await
    }

    pub async fn get_point_history(
        &self,
        member_id: &MemberId,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage> {
        self.engine
            .get_point_history(member_id, page, page_size)
            .await
    }

    pub async fn get_expiring_within(&self, days: u32) -> Result<Vec<PointLot>> {
        self.sweeper.find_expiring_within(days).await
    }

    pub async fn get_lot(&self, lot_id: LotId) -> Result<PointLot> {
        self.engine.get_lot(lot_id).await
    }

    /// Run an expiration sweep now.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        self.sweeper.sweep().await
    }

    pub fn sweeper(&self) -> &Arc<ExpirationSweeper> {
        &self.sweeper
    }

    pub fn scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(Arc::clone(&self.sweeper), &self.sweeper_config)
    }

    /// Start the background scheduler if `sweeper.enabled` is set.
    pub fn spawn_scheduler(&self) -> Option<JoinHandle<()>> {
        self.sweeper_config
            .enabled
            .then(|| self.scheduler().spawn())
    }
}

/// Assembles a `PointLedger` from parts.
pub struct PointLedgerBuilder {
    store: Arc<dyn LotStore>,
    audit: Option<Arc<dyn AuditRecorder>>,
    clock: Option<Arc<dyn Clock>>,
    lease: Option<Arc<dyn SweepLease>>,
    policy: LedgerPolicy,
    sweeper_config: SweeperConfig,
}

impl PointLedgerBuilder {
    pub fn new(store: Arc<dyn LotStore>) -> Self {
        Self {
            store,
            audit: None,
            clock: None,
            lease: None,
            policy: LedgerPolicy::default(),
            sweeper_config: SweeperConfig::default(),
        }
    }

    pub fn audit(mut self, audit: Arc<dyn AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lease(mut self, lease: Arc<dyn SweepLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sweeper_config(mut self, config: SweeperConfig) -> Self {
        self.sweeper_config = config;
        self
    }

    pub fn build(self) -> PointLedger {
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditRecorder::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let locks = Arc::new(MemberLocks::new());

        let engine = LedgerEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&audit),
            Arc::clone(&clock),
            Arc::clone(&locks),
            self.policy,
        );

        let mut sweeper =
            ExpirationSweeper::new(self.store, audit, clock, locks, &self.sweeper_config);
        if let Some(lease) = self.lease {
            sweeper = sweeper.with_lease(lease);
        }

        PointLedger {
            engine,
            sweeper: Arc::new(sweeper),
            sweeper_config: self.sweeper_config,
        }
    }
}
