//! In-process record store
//!
//! Keeps real transaction semantics (staging, atomic commit, rollback, TTL
//! expiry, optional per-transaction operation cap) and records every call so
//! tests can assert on exactly what reached the store. Faults can be
//! injected for the n-th commit and for the first rollback attempts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::{Collection, RecordStore, TransactionId, WriteAction, WriteOp};
use crate::errors::{Error, Result};

/// A call as observed by the store, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get { collection: Collection, record_id: String },
    Open(TransactionId),
    Stage { transaction: TransactionId, ops: usize },
    Commit(TransactionId),
    Rollback(TransactionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

struct MemoryTransaction {
    ops: Vec<WriteOp>,
    state: TransactionState,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<(Collection, String), Value>,
    transactions: HashMap<TransactionId, MemoryTransaction>,
    calls: Vec<StoreCall>,
    next_transaction: u64,
    commits_seen: usize,
    /// 1-based commit call number -> error returned by that call
    commit_failures: HashMap<usize, Error>,
    rollback_failures: u32,
}

/// In-memory [`RecordStore`]
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    max_operations: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject staging beyond `max` operations in one transaction.
    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations = Some(max);
        self
    }

    /// Seed an existing record.
    pub fn with_record(self, collection: Collection, record_id: &str, value: Value) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.records.insert((collection, record_id.to_string()), value);
        }
        self
    }

    /// Make the `nth` commit call (1-based) fail with `error`. The
    /// transaction stays open, so it can still be rolled back.
    pub fn fail_commit(self, nth: usize, error: Error) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.commit_failures.insert(nth, error);
        }
        self
    }

    /// Make the next `count` rollback calls report "not ready".
    pub fn fail_rollbacks(self, count: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rollback_failures = count;
        }
        self
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn record(&self, collection: Collection, record_id: &str) -> Option<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.records.get(&(collection, record_id.to_string())).cloned())
    }

    pub fn record_count(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .map(|s| s.records.keys().filter(|(c, _)| *c == collection).count())
            .unwrap_or(0)
    }

    pub fn transaction_state(&self, transaction: &TransactionId) -> Option<TransactionState> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.transactions.get(transaction).map(|tx| tx.state))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
    }
}

fn open_transaction<'a>(
    transactions: &'a mut HashMap<TransactionId, MemoryTransaction>,
    id: &TransactionId,
) -> Result<&'a mut MemoryTransaction> {
    let tx = transactions
        .get_mut(id)
        .ok_or_else(|| Error::Remote(format!("unknown transaction {}", id)))?;

    if tx.state != TransactionState::Open {
        return Err(Error::Remote(format!("transaction {} is {:?}", id, tx.state)));
    }
    if Instant::now() > tx.expires_at {
        tx.state = TransactionState::RolledBack;
        return Err(Error::TransactionExpired(id.to_string()));
    }
    Ok(tx)
}

fn apply(records: &mut HashMap<(Collection, String), Value>, op: &WriteOp) -> Result<()> {
    let key = (op.collection, op.record_id.clone());
    match op.action {
        WriteAction::Create => {
            if records.contains_key(&key) {
                return Err(Error::Conflict(format!(
                    "{} record {} already exists",
                    op.collection, op.record_id
                )));
            }
            records.insert(key, op.data.clone());
        }
        WriteAction::Update => {
            let existing = records.get_mut(&key).ok_or_else(|| {
                Error::NotFound(format!("{} record {}", op.collection, op.record_id))
            })?;
            match (existing.as_object_mut(), op.data.as_object()) {
                (Some(target), Some(patch)) => {
                    for (field, value) in patch {
                        target.insert(field.clone(), value.clone());
                    }
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "update of {} must be a JSON object",
                        op.record_id
                    )))
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, collection: Collection, record_id: &str) -> Result<Option<Value>> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::Get {
            collection,
            record_id: record_id.to_string(),
        });
        Ok(state.records.get(&(collection, record_id.to_string())).cloned())
    }

    async fn open_transaction(&self, ttl: Duration) -> Result<TransactionId> {
        let mut state = self.lock()?;
        state.next_transaction += 1;
        let id = TransactionId::new(format!("tx-{}", state.next_transaction));
        state.transactions.insert(
            id.clone(),
            MemoryTransaction {
                ops: Vec::new(),
                state: TransactionState::Open,
                expires_at: Instant::now() + ttl,
            },
        );
        state.calls.push(StoreCall::Open(id.clone()));
        Ok(id)
    }

    async fn stage_writes(&self, transaction: &TransactionId, ops: &[WriteOp]) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.calls.push(StoreCall::Stage {
            transaction: transaction.clone(),
            ops: ops.len(),
        });

        let tx = open_transaction(&mut state.transactions, transaction)?;
        if let Some(max) = self.max_operations {
            if tx.ops.len() + ops.len() > max {
                return Err(Error::OperationLimitExceeded(format!(
                    "transaction {} would hold {} operations (max {})",
                    transaction,
                    tx.ops.len() + ops.len(),
                    max
                )));
            }
        }
        tx.ops.extend_from_slice(ops);
        Ok(())
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.calls.push(StoreCall::Commit(transaction.clone()));
        state.commits_seen += 1;

        if let Some(err) = state.commit_failures.remove(&state.commits_seen) {
            return Err(err);
        }

        let tx = open_transaction(&mut state.transactions, transaction)?;

        // all-or-nothing
        let mut staged = state.records.clone();
        for op in &tx.ops {
            apply(&mut staged, op)?;
        }
        state.records = staged;
        tx.state = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.calls.push(StoreCall::Rollback(transaction.clone()));

        if state.rollback_failures > 0 {
            state.rollback_failures -= 1;
            return Err(Error::TransactionNotReady(transaction.to_string()));
        }

        let tx = state
            .transactions
            .get_mut(transaction)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction)))?;

        match tx.state {
            TransactionState::Committed => Err(Error::Remote(format!(
                "transaction {} is already committed",
                transaction
            ))),
            TransactionState::Open | TransactionState::RolledBack => {
                tx.state = TransactionState::RolledBack;
                tx.ops.clear();
                Ok(())
            }
        }
    }
}
