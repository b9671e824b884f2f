//! Error types for MealSync

use thiserror::Error;

/// Result type alias using MealSync Error
pub type Result<T> = std::result::Result<T, Error>;

/// MealSync error types
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Idempotency guard tripped: the record was already written
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// The store rejected a write because of a conflicting record or transaction
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many operations for a single transaction
    #[error("Operation limit exceeded: {0}")]
    OperationLimitExceeded(String),

    /// Referenced record or transaction does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transaction exists but the store cannot act on it yet
    #[error("Transaction not ready: {0}")]
    TransactionNotReady(String),

    /// Transaction outlived its TTL before commit
    #[error("Transaction expired: {0}")]
    TransactionExpired(String),

    /// Process configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other failure reported by the store
    #[error("Store error: {0}")]
    Remote(String),

    /// JSON Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// DynamoDB serialization error
    #[error("DynamoDB serialization error: {0}")]
    DynamoSerialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::AlreadyExists(_) => "already_exists",
            Error::Conflict(_) => "conflict",
            Error::OperationLimitExceeded(_) => "operation_limit_exceeded",
            Error::NotFound(_) => "not_found",
            Error::TransactionNotReady(_) => "transaction_not_ready",
            Error::TransactionExpired(_) => "transaction_expired",
            Error::Config(_) => "config_error",
            Error::Remote(_) => "unexpected_remote_error",
            Error::Serialization(_) => "serialization_error",
            Error::DynamoSerialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::AlreadyExists(_) => 409,
            Error::Conflict(_) => 409,
            Error::OperationLimitExceeded(_) => 429,
            Error::NotFound(_) => 404,
            Error::TransactionNotReady(_) => 500,
            Error::TransactionExpired(_) => 500,
            Error::Config(_) => 500,
            Error::Remote(_) => 500,
            Error::Serialization(_) => 400,
            Error::DynamoSerialization(_) => 500,
            Error::Internal(_) => 500,
        }
    }
}
