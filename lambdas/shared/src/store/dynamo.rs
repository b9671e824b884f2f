//! DynamoDB record store
//!
//! Single-table design, one item per record:
//!
//! | PK                          | SK        | Purpose             |
//! |-----------------------------|-----------|---------------------|
//! | {main_id}#{event_id}        | RECORD    | Event record        |
//! | {products_id}#{product_id}  | RECORD    | Product record      |
//! | {purchases_id}#{purchase_id}| RECORD    | Group purchase      |
//!
//! DynamoDB has no long-lived transactions, so they are staged here: opening
//! one creates a local buffer with a deadline, staging converts operations
//! into `TransactWriteItem`s, and commit sends a single `TransactWriteItems`
//! call with the transaction id as idempotency token. Rollback drops the
//! buffer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde_dynamo::{from_item, to_attribute_value, to_item};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{Collection, RecordStore, TransactionId, WriteAction, WriteOp};
use crate::config::CollectionIds;
use crate::errors::{Error, Result};

/// Hard cap of a single `TransactWriteItems` call
pub const TRANSACTION_ITEM_LIMIT: usize = 100;

const RECORD_SK: &str = "RECORD";

struct PendingTransaction {
    items: Vec<TransactWriteItem>,
    expires_at: DateTime<Utc>,
}

/// DynamoDB-backed [`RecordStore`]
pub struct DynamoStore {
    client: Client,
    table_name: String,
    collections: CollectionIds,
    pending: Mutex<HashMap<TransactionId, PendingTransaction>>,
}

impl DynamoStore {
    pub fn new(client: Client, table_name: String, collections: CollectionIds) -> Self {
        Self {
            client,
            table_name,
            collections,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> Result<MutexGuard<'_, HashMap<TransactionId, PendingTransaction>>> {
        self.pending
            .lock()
            .map_err(|_| Error::Internal("pending transactions lock poisoned".to_string()))
    }

    fn partition_key(&self, collection: Collection, record_id: &str) -> Result<String> {
        Ok(format!("{}#{}", collection.resolve(&self.collections)?, record_id))
    }

    fn key(&self, collection: Collection, record_id: &str) -> Result<HashMap<String, AttributeValue>> {
        let mut key = HashMap::new();
        key.insert(
            "PK".to_string(),
            AttributeValue::S(self.partition_key(collection, record_id)?),
        );
        key.insert("SK".to_string(), AttributeValue::S(RECORD_SK.to_string()));
        Ok(key)
    }

    /// Convert a staged write into a transaction item.
    fn transact_item(&self, op: &WriteOp) -> Result<TransactWriteItem> {
        let key = self.key(op.collection, &op.record_id)?;

        match op.action {
            WriteAction::Create => {
                let mut item: HashMap<String, AttributeValue> =
                    to_item(&op.data).map_err(|e| Error::DynamoSerialization(e.to_string()))?;
                item.extend(key);

                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(item))
                    .condition_expression("attribute_not_exists(PK)")
                    .build()
                    .map_err(|e| Error::Internal(e.to_string()))?;
                Ok(TransactWriteItem::builder().put(put).build())
            }
            WriteAction::Update => {
                let fields = op.data.as_object().ok_or_else(|| {
                    Error::Validation(format!("update of {} must be a JSON object", op.record_id))
                })?;
                if fields.is_empty() {
                    return Err(Error::Validation(format!("update of {} is empty", op.record_id)));
                }

                let mut assignments = Vec::with_capacity(fields.len());
                let mut names = HashMap::new();
                let mut values = HashMap::new();
                for (i, (field, value)) in fields.iter().enumerate() {
                    let av: AttributeValue = to_attribute_value(value)
                        .map_err(|e| Error::DynamoSerialization(e.to_string()))?;
                    assignments.push(format!("#f{} = :v{}", i, i));
                    names.insert(format!("#f{}", i), field.clone());
                    values.insert(format!(":v{}", i), av);
                }

                let update = Update::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(key))
                    .update_expression(format!("SET {}", assignments.join(", ")))
                    .set_expression_attribute_names(Some(names))
                    .set_expression_attribute_values(Some(values))
                    .condition_expression("attribute_exists(PK)")
                    .build()
                    .map_err(|e| Error::Internal(e.to_string()))?;
                Ok(TransactWriteItem::builder().update(update).build())
            }
        }
    }
}

/// Map cancellation reason codes of a cancelled transaction.
fn cancellation_error<'a>(codes: impl IntoIterator<Item = &'a str>) -> Error {
    let codes: Vec<&str> = codes.into_iter().filter(|c| *c != "None").collect();

    if codes.iter().any(|c| *c == "ConditionalCheckFailed" || *c == "TransactionConflict") {
        Error::Conflict(format!("transaction cancelled: {}", codes.join(", ")))
    } else {
        Error::Remote(format!("transaction cancelled: {}", codes.join(", ")))
    }
}

/// Map any other `TransactWriteItems` failure by its message.
fn classify_message(message: &str) -> Error {
    if message.contains("less than or equal to 100") || message.contains("exceeds the maximum") {
        Error::OperationLimitExceeded(message.to_string())
    } else if message.contains("TransactionInProgress") {
        Error::TransactionNotReady(message.to_string())
    } else if message.contains("IdempotentParameterMismatch") {
        Error::Conflict(message.to_string())
    } else {
        Error::Remote(message.to_string())
    }
}

#[async_trait]
impl RecordStore for DynamoStore {
    async fn get_record(&self, collection: Collection, record_id: &str) -> Result<Option<Value>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(collection, record_id)?))
            .send()
            .await
            .map_err(|e| Error::Remote(DisplayErrorContext(&e).to_string()))?;

        match result.item {
            Some(mut item) => {
                item.remove("PK");
                item.remove("SK");
                Ok(Some(from_item(item).map_err(|e| Error::DynamoSerialization(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    async fn open_transaction(&self, ttl: Duration) -> Result<TransactionId> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Config(e.to_string()))?;
        let id = TransactionId::new(Uuid::new_v4().to_string());

        self.pending()?.insert(
            id.clone(),
            PendingTransaction {
                items: Vec::new(),
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn stage_writes(&self, transaction: &TransactionId, ops: &[WriteOp]) -> Result<()> {
        let items = ops
            .iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<_>>>()?;

        let mut pending = self.pending()?;
        let tx = pending
            .get_mut(transaction)
            .ok_or_else(|| Error::Remote(format!("transaction {} is not pending", transaction)))?;

        if tx.items.len() + items.len() > TRANSACTION_ITEM_LIMIT {
            return Err(Error::OperationLimitExceeded(format!(
                "transaction {} would hold {} items (max {})",
                transaction,
                tx.items.len() + items.len(),
                TRANSACTION_ITEM_LIMIT
            )));
        }
        tx.items.extend(items);
        Ok(())
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<()> {
        let tx = self
            .pending()?
            .remove(transaction)
            .ok_or_else(|| Error::Remote(format!("transaction {} is not pending", transaction)))?;

        if Utc::now() > tx.expires_at {
            return Err(Error::TransactionExpired(transaction.to_string()));
        }
        if tx.items.is_empty() {
            return Ok(());
        }

        let item_count = tx.items.len();
        self.client
            .transact_write_items()
            .set_transact_items(Some(tx.items))
            .client_request_token(transaction.as_str())
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    TransactWriteItemsError::TransactionCanceledException(cancelled) => {
                        cancellation_error(
                            cancelled
                                .cancellation_reasons()
                                .iter()
                                .filter_map(|reason| reason.code()),
                        )
                    }
                    _ => classify_message(&message),
                }
            })?;

        debug!(transaction_id = %transaction, items = item_count, "Committed transaction");
        Ok(())
    }

    /// Commit drops the buffer before sending, so an id that is no longer
    /// pending has nothing left to discard.
    async fn rollback(&self, transaction: &TransactionId) -> Result<()> {
        if self.pending()?.remove(transaction).is_none() {
            debug!(transaction_id = %transaction, "Nothing pending to roll back");
        }
        Ok(())
    }
}
