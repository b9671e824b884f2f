//! MealSync Core Library
//!
//! Shared functionality for the MealSync writer Lambdas:
//! - Domain models and payload decoding
//! - Record stores (hosted REST tables, DynamoDB, in-memory)
//! - The batched transactional writer and its rollback ledger
//! - Error types

pub mod config;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod payload;
pub mod plan;
pub mod service;
pub mod store;
pub mod writer;

pub use config::{AppConfig, Backend, WriterConfig};
pub use errors::{Error, Result};
pub use models::*;
pub use service::ApiReply;
pub use store::{Collection, RecordStore, TransactionId};
pub use writer::{BatchedWriter, WriteFailure, WriteSummary};
