//! Batched transactional writer
//!
//! Executes a [`WritePlan`] against a [`RecordStore`]:
//!
//! 1. every transaction opened is recorded in a [`RollbackLedger`];
//! 2. children are split into batches of at most `max_operations`, each
//!    staged and committed in its own transaction, strictly in order;
//! 3. in the batched layout the parent transaction is opened first and
//!    committed last, so a failing child batch still discards the parent;
//! 4. on any failure every ledger entry is rolled back in order, each with
//!    a bounded number of attempts at a fixed delay. Rollback failures are
//!    logged and never replace the original error.
//!
//! Batches that already committed are not compensated.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{StagingMode, TransactionLayout, WriterConfig};
use crate::errors::{Error, Result};
use crate::ledger::{RollbackLedger, RollbackOutcome};
use crate::models::{BatchUpdateRequest, NewEvent};
use crate::plan::{event_plan, product_update_plan, GroupPurchase, WritePlan};
use crate::store::{Collection, RecordStore, TransactionId, WriteOp};

/// Outcome of a fully committed write sequence
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    /// Every committed transaction, in the order they were opened
    pub transaction_ids: Vec<TransactionId>,
    pub parent_count: usize,
    pub child_count: usize,
    /// Number of child batches
    pub batches: usize,
}

/// A failed write sequence
#[derive(Debug, ThisError)]
#[error("{error}")]
pub struct WriteFailure {
    /// The error that stopped the sequence
    pub error: Error,
    /// Whether a rollback was attempted (not whether it succeeded)
    pub rolled_back: bool,
    pub rollbacks: Vec<RollbackOutcome>,
}

impl From<Error> for WriteFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            rolled_back: false,
            rollbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Single,
    Batched,
}

pub struct BatchedWriter {
    store: Arc<dyn RecordStore>,
    config: WriterConfig,
}

impl BatchedWriter {
    pub fn new(store: Arc<dyn RecordStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Create an event and one product per ingredient.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn create_event(&self, event: &NewEvent) -> std::result::Result<WriteSummary, WriteFailure> {
        let plan = event_plan(event)?;

        // Idempotency guard. Not atomic with the writes below.
        if self
            .store
            .get_record(Collection::Main, &event.event_id)
            .await?
            .is_some()
        {
            warn!("Event already exists, nothing written");
            return Err(Error::AlreadyExists(format!("event {}", event.event_id)).into());
        }

        self.execute(&plan).await
    }

    /// Apply one update per listed product.
    #[instrument(skip(self, request))]
    pub async fn update_products(
        &self,
        request: &BatchUpdateRequest,
    ) -> std::result::Result<WriteSummary, WriteFailure> {
        let plan = product_update_plan(request)?;
        self.execute(&plan).await
    }

    /// Record a group purchase and mark its products as purchased.
    #[instrument(skip(self, purchase), fields(event_id = %purchase.main_id, purchase_id = %purchase.purchase_id))]
    pub async fn create_group_purchase(
        &self,
        purchase: &GroupPurchase,
    ) -> std::result::Result<WriteSummary, WriteFailure> {
        let plan = purchase.plan()?;

        if self
            .store
            .get_record(Collection::Main, &purchase.main_id)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!("event {}", purchase.main_id)).into());
        }
        if self
            .store
            .get_record(Collection::Purchases, &purchase.purchase_id)
            .await?
            .is_some()
        {
            warn!("Purchase already recorded, nothing written");
            return Err(Error::AlreadyExists(format!("purchase {}", purchase.purchase_id)).into());
        }

        self.execute(&plan).await
    }

    /// Run a plan, rolling back every opened transaction on failure.
    #[instrument(skip(self, plan), fields(parent = plan.parent.len(), children = plan.children.len()))]
    pub async fn execute(&self, plan: &WritePlan) -> std::result::Result<WriteSummary, WriteFailure> {
        let layout = self.resolve_layout(plan)?;
        let mut ledger = RollbackLedger::new();

        match self.run(plan, layout, &mut ledger).await {
            Ok(summary) => {
                info!(
                    transactions = summary.transaction_ids.len(),
                    batches = summary.batches,
                    "Write sequence committed"
                );
                Ok(summary)
            }
            Err(error) => {
                error!(
                    error = %error,
                    opened = ledger.len(),
                    committed = ledger.committed_count(),
                    "Write sequence failed"
                );
                let rollbacks = self.roll_back(&ledger).await;
                Err(WriteFailure {
                    error,
                    rolled_back: !ledger.is_empty(),
                    rollbacks,
                })
            }
        }
    }

    fn resolve_layout(&self, plan: &WritePlan) -> Result<Layout> {
        let max = self.config.max_operations;
        let total = plan.total_operations();

        let layout = match self.config.layout {
            TransactionLayout::Single => Layout::Single,
            TransactionLayout::Batched => Layout::Batched,
            TransactionLayout::Auto if total <= max => Layout::Single,
            TransactionLayout::Auto => Layout::Batched,
        };

        match layout {
            Layout::Single if total > max => Err(Error::OperationLimitExceeded(format!(
                "{} operations exceed the per-transaction limit of {}",
                total, max
            ))),
            Layout::Batched if plan.parent.len() > max => Err(Error::OperationLimitExceeded(format!(
                "parent batch of {} operations exceeds the per-transaction limit of {}",
                plan.parent.len(),
                max
            ))),
            _ => Ok(layout),
        }
    }

    async fn run(&self, plan: &WritePlan, layout: Layout, ledger: &mut RollbackLedger) -> Result<WriteSummary> {
        let mut batches = 0;

        match layout {
            Layout::Single => {
                let transaction = self.open(ledger).await?;
                let ops: Vec<WriteOp> = plan.parent.iter().chain(&plan.children).cloned().collect();
                self.store.stage_writes(&transaction, &ops).await?;
                self.commit(&transaction, ledger).await?;
                if !plan.children.is_empty() {
                    batches = 1;
                }
            }
            Layout::Batched => {
                let parent = if plan.parent.is_empty() {
                    None
                } else {
                    let transaction = self.open(ledger).await?;
                    self.stage(&transaction, &plan.parent).await?;
                    Some(transaction)
                };

                for (index, batch) in plan.children.chunks(self.config.max_operations).enumerate() {
                    let transaction = self.open(ledger).await?;
                    debug!(
                        batch = index + 1,
                        size = batch.len(),
                        transaction_id = %transaction,
                        "Staging batch"
                    );
                    self.stage(&transaction, batch).await?;
                    self.commit(&transaction, ledger).await?;
                    batches += 1;
                }

                if let Some(transaction) = parent {
                    self.commit(&transaction, ledger).await?;
                }
            }
        }

        Ok(WriteSummary {
            transaction_ids: ledger.transactions().cloned().collect(),
            parent_count: plan.parent.len(),
            child_count: plan.children.len(),
            batches,
        })
    }

    async fn open(&self, ledger: &mut RollbackLedger) -> Result<TransactionId> {
        let transaction = self.store.open_transaction(self.config.transaction_ttl).await?;
        ledger.record(transaction.clone());
        Ok(transaction)
    }

    async fn stage(&self, transaction: &TransactionId, ops: &[WriteOp]) -> Result<()> {
        match self.config.staging {
            StagingMode::Bulk => self.store.stage_writes(transaction, ops).await,
            StagingMode::PerRow => {
                for op in ops {
                    self.store
                        .stage_writes(transaction, std::slice::from_ref(op))
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn commit(&self, transaction: &TransactionId, ledger: &mut RollbackLedger) -> Result<()> {
        self.store.commit(transaction).await?;
        ledger.mark_committed(transaction);
        Ok(())
    }

    /// Roll back every ledger entry, one at a time, in ledger order.
    async fn roll_back(&self, ledger: &RollbackLedger) -> Vec<RollbackOutcome> {
        let mut outcomes = Vec::with_capacity(ledger.len());
        for transaction in ledger.transactions() {
            let committed = ledger.is_committed(transaction);
            if committed {
                warn!(
                    transaction_id = %transaction,
                    "Transaction already committed; its writes stay in place"
                );
            }
            outcomes.push(self.roll_back_one(transaction, committed).await);
        }
        outcomes
    }

    /// A committed transaction gets a single attempt.
    async fn roll_back_one(&self, transaction: &TransactionId, committed: bool) -> RollbackOutcome {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let store = self.store.as_ref();

        let retries = if committed {
            0
        } else {
            self.config.rollback_attempts.saturating_sub(1) as usize
        };
        let backoff = ConstantBuilder::default()
            .with_delay(self.config.rollback_delay)
            .with_max_times(retries);

        let result = (move || async move {
            counter.fetch_add(1, Ordering::Relaxed);
            store.rollback(transaction).await
        })
        .retry(backoff)
        .when(is_transient)
        .notify(|err: &Error, delay: Duration| {
            warn!(
                transaction_id = %transaction,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Rollback attempt failed, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(()) => {
                info!(transaction_id = %transaction, attempts, "Rolled back transaction");
                RollbackOutcome {
                    transaction_id: transaction.clone(),
                    attempts,
                    succeeded: true,
                }
            }
            Err(err) => {
                error!(
                    transaction_id = %transaction,
                    attempts,
                    error = %err,
                    "Rollback failed, giving up"
                );
                RollbackOutcome {
                    transaction_id: transaction.clone(),
                    attempts,
                    succeeded: false,
                }
            }
        }
    }
}

/// Rollback errors worth another attempt after the fixed delay.
fn is_transient(err: &Error) -> bool {
    matches!(err, Error::TransactionNotReady(_) | Error::Remote(_))
}
