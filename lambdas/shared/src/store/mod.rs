//! Record store capability
//!
//! The writer only ever talks to the store through [`RecordStore`]: a point
//! read plus the four transaction primitives. Backends:
//!
//! - [`RestStore`]: hosted tables API over HTTPS
//! - [`DynamoStore`]: DynamoDB single table, transactions staged locally
//! - [`InMemoryStore`]: in-process, with fault injection for tests

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::{AppConfig, Backend, CollectionIds};
use crate::errors::{Error, Result};

pub mod dynamo;
pub mod memory;
pub mod rest;

pub use dynamo::DynamoStore;
pub use memory::{InMemoryStore, StoreCall};
pub use rest::RestStore;

/// Logical record set. Backends map it to their own table/collection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Main,
    Products,
    Purchases,
}

impl Collection {
    /// Resolve the configured identifier of this collection.
    pub fn resolve<'a>(&self, ids: &'a CollectionIds) -> Result<&'a str> {
        match self {
            Collection::Main => Ok(&ids.main),
            Collection::Products => Ok(&ids.products),
            Collection::Purchases => ids
                .purchases
                .as_deref()
                .ok_or_else(|| Error::Config("MEALSYNC_PURCHASES_COLLECTION_ID not set".to_string())),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Main => write!(f, "main"),
            Collection::Products => write!(f, "products"),
            Collection::Purchases => write!(f, "purchases"),
        }
    }
}

/// Opaque transaction handle issued by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    /// Insert; fails if the record exists
    Create,
    /// Merge fields into an existing record
    Update,
}

/// One staged write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub action: WriteAction,
    pub collection: Collection,
    pub record_id: String,
    /// JSON object
    pub data: Value,
}

impl WriteOp {
    pub fn create(collection: Collection, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            action: WriteAction::Create,
            collection,
            record_id: record_id.into(),
            data,
        }
    }

    pub fn update(collection: Collection, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            action: WriteAction::Update,
            collection,
            record_id: record_id.into(),
            data,
        }
    }
}

/// Remote store capabilities consumed by the writer.
///
/// A transaction ends either committed or rolled back; committing twice or
/// committing after a rollback is an error reported by the store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record, `None` if it does not exist.
    async fn get_record(&self, collection: Collection, record_id: &str) -> Result<Option<Value>>;

    /// Open a transaction that expires after `ttl`.
    async fn open_transaction(&self, ttl: Duration) -> Result<TransactionId>;

    /// Stage writes into an open transaction.
    async fn stage_writes(&self, transaction: &TransactionId, ops: &[WriteOp]) -> Result<()>;

    async fn commit(&self, transaction: &TransactionId) -> Result<()>;

    /// Discard everything staged in an open transaction.
    async fn rollback(&self, transaction: &TransactionId) -> Result<()>;
}

/// Build the configured store backend.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn RecordStore>> {
    info!(backend = ?config.backend, "Connecting record store");

    match config.backend {
        Backend::Rest => {
            let rest = config
                .rest
                .clone()
                .ok_or_else(|| Error::Config("REST store settings missing".to_string()))?;
            Ok(Arc::new(RestStore::new(rest, config.collections.clone())?))
        }
        Backend::Dynamo => {
            let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
            let client = aws_sdk_dynamodb::Client::new(&sdk_config);
            Ok(Arc::new(DynamoStore::new(
                client,
                config.table_name.clone(),
                config.collections.clone(),
            )))
        }
        Backend::Memory => Ok(Arc::new(InMemoryStore::new())),
    }
}
