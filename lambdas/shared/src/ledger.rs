//! Rollback ledger
//!
//! Ordered list of every transaction opened during one write sequence. It is
//! owned by a single execution and drives compensating rollback on failure.

use serde::Serialize;

use crate::store::TransactionId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LedgerEntry {
    transaction: TransactionId,
    committed: bool,
}

#[derive(Debug, Default)]
pub struct RollbackLedger {
    entries: Vec<LedgerEntry>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly opened transaction.
    pub fn record(&mut self, transaction: TransactionId) {
        self.entries.push(LedgerEntry {
            transaction,
            committed: false,
        });
    }

    pub fn mark_committed(&mut self, transaction: &TransactionId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.transaction == transaction) {
            entry.committed = true;
        }
    }

    pub fn is_committed(&self, transaction: &TransactionId) -> bool {
        self.entries
            .iter()
            .any(|e| &e.transaction == transaction && e.committed)
    }

    /// Transactions in the order they were opened.
    pub fn transactions(&self) -> impl Iterator<Item = &TransactionId> {
        self.entries.iter().map(|e| &e.transaction)
    }

    pub fn committed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.committed).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of rolling back one ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub transaction_id: TransactionId,
    pub attempts: u32,
    pub succeeded: bool,
}
