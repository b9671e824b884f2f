//! Hosted tables store over REST
//!
//! | Call              | Request                                                   |
//! |-------------------|-----------------------------------------------------------|
//! | get_record        | `GET   /tablesdb/{db}/tables/{table}/rows/{row}`          |
//! | open_transaction  | `POST  /tablesdb/transactions` `{ttl}`                    |
//! | stage_writes      | `POST  /tablesdb/transactions/{tx}/operations` `{operations}` |
//! | commit            | `PATCH /tablesdb/transactions/{tx}` `{commit: true}`      |
//! | rollback          | `PATCH /tablesdb/transactions/{tx}` `{rollback: true}`    |
//!
//! Every request carries the project id and the admin API key as headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Collection, RecordStore, TransactionId, WriteAction, WriteOp};
use crate::config::{CollectionIds, RestConfig};
use crate::errors::{Error, Result};

const PROJECT_HEADER: &str = "X-Appwrite-Project";
const KEY_HEADER: &str = "X-Appwrite-Key";

/// Error body returned by the store
#[derive(Debug, Default, Deserialize)]
struct StoreErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

/// Which kind of endpoint a request went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Row,
    Transaction,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    #[serde(rename = "$id")]
    id: String,
}

/// [`RecordStore`] backed by the hosted tables REST API
pub struct RestStore {
    client: Client,
    config: RestConfig,
    collections: CollectionIds,
}

impl RestStore {
    pub fn new(config: RestConfig, collections: CollectionIds) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: RestConfig {
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                ..config
            },
            collections,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.endpoint, path))
            .header(PROJECT_HEADER, &self.config.project_id)
            .header(KEY_HEADER, &self.config.api_key)
    }

    fn row_path(&self, collection: Collection, record_id: &str) -> Result<String> {
        Ok(format!(
            "/tablesdb/{}/tables/{}/rows/{}",
            self.config.database_id,
            collection.resolve(&self.collections)?,
            record_id
        ))
    }

    /// Operation list in the shape the transaction endpoint expects.
    fn operations_body(&self, ops: &[WriteOp]) -> Result<Value> {
        let operations = ops
            .iter()
            .map(|op| {
                Ok(json!({
                    "action": match op.action {
                        WriteAction::Create => "create",
                        WriteAction::Update => "update",
                    },
                    "databaseId": self.config.database_id,
                    "tableId": op.collection.resolve(&self.collections)?,
                    "rowId": op.record_id,
                    "data": op.data,
                }))
            })
            .collect::<Result<Vec<Value>>>()?;

        Ok(json!({ "operations": operations }))
    }

    async fn send(&self, request: RequestBuilder, scope: Scope) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Remote(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Remote(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            warn!(status = %status, body = %truncate(&body), "Store request failed");
            Err(classify_failure(status, &body, scope))
        }
    }

    async fn patch_transaction(&self, transaction: &TransactionId, body: Value) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/tablesdb/transactions/{}", transaction))
            .json(&body);
        self.send(request, Scope::Transaction).await.map(|_| ())
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Map a failed store response onto the error taxonomy.
///
/// A 404 is `NotFound` only for a missing row. An unknown or expired
/// transaction is a store failure.
fn classify_failure(status: StatusCode, body: &str, scope: Scope) -> Error {
    let parsed: StoreErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        format!("HTTP {} - {}", status, truncate(body))
    } else {
        parsed.message.clone()
    };
    let kind = parsed.kind.as_str();
    let lowered = message.to_ascii_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS || kind.contains("limit") {
        Error::OperationLimitExceeded(message)
    } else if lowered.contains("not ready") || kind.contains("not_ready") {
        Error::TransactionNotReady(message)
    } else if kind.contains("expired") {
        Error::TransactionExpired(message)
    } else if status == StatusCode::CONFLICT || kind.contains("already_exists") {
        Error::Conflict(message)
    } else if status == StatusCode::NOT_FOUND && (scope == Scope::Row || kind.starts_with("row_")) {
        Error::NotFound(message)
    } else {
        Error::Remote(message)
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn get_record(&self, collection: Collection, record_id: &str) -> Result<Option<Value>> {
        let request = self.request(Method::GET, &self.row_path(collection, record_id)?);
        match self.send(request, Scope::Row).await {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_transaction(&self, ttl: Duration) -> Result<TransactionId> {
        let request = self
            .request(Method::POST, "/tablesdb/transactions")
            .json(&json!({ "ttl": ttl.as_secs() }));
        let body = self.send(request, Scope::Transaction).await?;
        let transaction: TransactionBody = serde_json::from_str(&body)?;

        debug!(transaction_id = %transaction.id, "Opened transaction");
        Ok(TransactionId::new(transaction.id))
    }

    async fn stage_writes(&self, transaction: &TransactionId, ops: &[WriteOp]) -> Result<()> {
        let request = self
            .request(
                Method::POST,
                &format!("/tablesdb/transactions/{}/operations", transaction),
            )
            .json(&self.operations_body(ops)?);
        self.send(request, Scope::Transaction).await.map(|_| ())
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<()> {
        self.patch_transaction(transaction, json!({ "commit": true })).await
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<()> {
        self.patch_transaction(transaction, json!({ "rollback": true })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(
            RestConfig {
                endpoint: "https://store.example.com/v1/".into(),
                project_id: "planner".into(),
                api_key: "secret".into(),
                database_id: "db".into(),
                timeout: Duration::from_secs(5),
            },
            CollectionIds::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_is_normalized() {
        assert_eq!(store().config.endpoint, "https://store.example.com/v1");
    }

    #[test]
    fn test_row_path() {
        let path = store().row_path(Collection::Main, "E1").unwrap();
        assert_eq!(path, "/tablesdb/db/tables/main/rows/E1");

        assert!(store().row_path(Collection::Purchases, "P1").is_err());
    }

    #[test]
    fn test_operations_body() {
        let ops = vec![
            WriteOp::create(Collection::Main, "E1", json!({"eventId": "E1"})),
            WriteOp::update(Collection::Products, "A_E1", json!({"isPurchased": true})),
        ];
        let body = store().operations_body(&ops).unwrap();

        assert_eq!(
            body,
            json!({"operations": [
                {"action": "create", "databaseId": "db", "tableId": "main", "rowId": "E1", "data": {"eventId": "E1"}},
                {"action": "update", "databaseId": "db", "tableId": "products", "rowId": "A_E1", "data": {"isPurchased": true}}
            ]})
        );
    }

    #[test]
    fn test_classify_conflicts() {
        let body = r#"{"message":"Row with the requested ID already exists.","code":409,"type":"row_already_exists"}"#;
        assert_eq!(classify_failure(StatusCode::CONFLICT, body, Scope::Transaction).code(), "conflict");
    }

    #[test]
    fn test_classify_limits() {
        let body = r#"{"message":"Transaction operation limit exceeded.","type":"transaction_limit_exceeded"}"#;
        assert_eq!(classify_failure(StatusCode::BAD_REQUEST, body, Scope::Transaction).status_code(), 429);
        assert_eq!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "", Scope::Transaction).status_code(), 429);
    }

    #[test]
    fn test_classify_not_ready_and_not_found() {
        let body = r#"{"message":"Transaction is not ready yet","type":"general_server_error"}"#;
        assert_eq!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, body, Scope::Transaction).code(),
            "transaction_not_ready"
        );

        let body = r#"{"message":"Row not found","type":"row_not_found"}"#;
        assert_eq!(classify_failure(StatusCode::NOT_FOUND, body, Scope::Row).code(), "not_found");
        assert_eq!(
            classify_failure(StatusCode::NOT_FOUND, body, Scope::Transaction).code(),
            "not_found"
        );
    }

    #[test]
    fn test_classify_missing_transaction_is_store_error() {
        let body = r#"{"message":"Transaction with the requested ID could not be found.","type":"transaction_not_found"}"#;
        let err = classify_failure(StatusCode::NOT_FOUND, body, Scope::Transaction);
        assert_eq!(err.code(), "unexpected_remote_error");
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("could not be found"));

        let err = classify_failure(StatusCode::NOT_FOUND, "", Scope::Transaction);
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_classify_passes_message_through() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, "upstream down", Scope::Row);
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("upstream down"));
    }
}
