//! Process configuration
//!
//! Built once at cold start from environment variables and validated there,
//! so a missing connection parameter fails the init phase instead of the
//! first store call.
//!
//! - `MEALSYNC_STORE_BACKEND`: `rest` (default), `dynamo` or `memory`
//! - `MEALSYNC_ENDPOINT`, `MEALSYNC_PROJECT_ID`, `MEALSYNC_API_KEY`: required for `rest`
//! - `MEALSYNC_DATABASE_ID`: required for `rest`, table name for `dynamo`
//! - `MEALSYNC_MAIN_COLLECTION_ID`, `MEALSYNC_PRODUCTS_COLLECTION_ID`,
//!   `MEALSYNC_PURCHASES_COLLECTION_ID`: collection (table) ids
//! - `MEALSYNC_MAX_OPERATIONS`, `MEALSYNC_STAGING`, `MEALSYNC_LAYOUT`,
//!   `MEALSYNC_TRANSACTION_TTL_SECS`, `MEALSYNC_ROLLBACK_ATTEMPTS`,
//!   `MEALSYNC_ROLLBACK_DELAY_MS`: writer tuning
//! - `MEALSYNC_HTTP_TIMEOUT_SECS`: REST client timeout

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Error, Result};

const DEFAULT_DYNAMO_TABLE: &str = "mealsync";

/// Which store implementation backs the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Rest,
    Dynamo,
    Memory,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(Backend::Rest),
            "dynamo" | "dynamodb" => Ok(Backend::Dynamo),
            "memory" => Ok(Backend::Memory),
            other => Err(Error::Config(format!("unknown store backend '{}'", other))),
        }
    }
}

/// Collection (table) identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionIds {
    pub main: String,
    pub products: String,
    /// Only group purchases write here
    pub purchases: Option<String>,
}

impl Default for CollectionIds {
    fn default() -> Self {
        Self {
            main: "main".to_string(),
            products: "products".to_string(),
            purchases: None,
        }
    }
}

/// Connection parameters of the hosted table store
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
    pub timeout: Duration,
}

/// How each batch is handed to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StagingMode {
    /// One stage call carrying the whole batch
    #[default]
    Bulk,
    /// One stage call per record
    PerRow,
}

impl FromStr for StagingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" => Ok(StagingMode::Bulk),
            "per_row" | "per-row" | "perrow" => Ok(StagingMode::PerRow),
            other => Err(Error::Config(format!("unknown staging mode '{}'", other))),
        }
    }
}

/// How a write plan is spread over transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionLayout {
    /// Single when everything fits under the cap, Batched otherwise
    #[default]
    Auto,
    /// Parent and children in one transaction
    Single,
    /// Parent transaction plus one transaction per child batch
    Batched,
}

impl FromStr for TransactionLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TransactionLayout::Auto),
            "single" => Ok(TransactionLayout::Single),
            "batched" => Ok(TransactionLayout::Batched),
            other => Err(Error::Config(format!("unknown transaction layout '{}'", other))),
        }
    }
}

/// Tuning of the batched writer
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Provider cap on operations per transaction
    pub max_operations: usize,
    pub staging: StagingMode,
    pub layout: TransactionLayout,
    pub transaction_ttl: Duration,
    /// Total attempts per rollback, first one included
    pub rollback_attempts: u32,
    /// Fixed delay between rollback attempts
    pub rollback_delay: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_operations: 99,
            staging: StagingMode::Bulk,
            layout: TransactionLayout::Auto,
            transaction_ttl: Duration::from_secs(120),
            rollback_attempts: 3,
            rollback_delay: Duration::from_secs(2),
        }
    }
}

impl WriterConfig {
    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    pub fn with_staging(mut self, staging: StagingMode) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_layout(mut self, layout: TransactionLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_rollback(mut self, attempts: u32, delay: Duration) -> Self {
        self.rollback_attempts = attempts;
        self.rollback_delay = delay;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_operations == 0 {
            return Err(Error::Config("MEALSYNC_MAX_OPERATIONS must be at least 1".to_string()));
        }
        if self.rollback_attempts == 0 {
            return Err(Error::Config("MEALSYNC_ROLLBACK_ATTEMPTS must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Backend,
    /// Present for the `rest` backend
    pub rest: Option<RestConfig>,
    /// DynamoDB table for the `dynamo` backend
    pub table_name: String,
    pub collections: CollectionIds,
    pub writer: WriterConfig,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| Error::Config(format!("{} not set", key)))
        };

        let backend = get("MEALSYNC_STORE_BACKEND")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(Backend::Rest);

        let rest = match backend {
            Backend::Rest => Some(RestConfig {
                endpoint: require("MEALSYNC_ENDPOINT")?,
                project_id: require("MEALSYNC_PROJECT_ID")?,
                api_key: require("MEALSYNC_API_KEY")?,
                database_id: require("MEALSYNC_DATABASE_ID")?,
                timeout: Duration::from_secs(parse_or(&get, "MEALSYNC_HTTP_TIMEOUT_SECS", 30)?),
            }),
            Backend::Dynamo | Backend::Memory => None,
        };

        let defaults = CollectionIds::default();
        let collections = CollectionIds {
            main: get("MEALSYNC_MAIN_COLLECTION_ID").unwrap_or(defaults.main),
            products: get("MEALSYNC_PRODUCTS_COLLECTION_ID").unwrap_or(defaults.products),
            purchases: get("MEALSYNC_PURCHASES_COLLECTION_ID"),
        };

        let writer_defaults = WriterConfig::default();
        let writer = WriterConfig {
            max_operations: parse_or(&get, "MEALSYNC_MAX_OPERATIONS", writer_defaults.max_operations)?,
            staging: parse_or(&get, "MEALSYNC_STAGING", writer_defaults.staging)?,
            layout: parse_or(&get, "MEALSYNC_LAYOUT", writer_defaults.layout)?,
            transaction_ttl: Duration::from_secs(parse_or(
                &get,
                "MEALSYNC_TRANSACTION_TTL_SECS",
                writer_defaults.transaction_ttl.as_secs(),
            )?),
            rollback_attempts: parse_or(&get, "MEALSYNC_ROLLBACK_ATTEMPTS", writer_defaults.rollback_attempts)?,
            rollback_delay: Duration::from_millis(parse_or(
                &get,
                "MEALSYNC_ROLLBACK_DELAY_MS",
                writer_defaults.rollback_delay.as_millis() as u64,
            )?),
        };
        writer.validate()?;

        Ok(Self {
            backend,
            rest,
            table_name: get("MEALSYNC_DATABASE_ID").unwrap_or_else(|| DEFAULT_DYNAMO_TABLE.to_string()),
            collections,
            writer,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{} is invalid ({}): {}", key, raw, e))),
        None => Ok(default),
    }
}
