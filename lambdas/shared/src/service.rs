//! Request services
//!
//! Shared by the HTTP and direct-invocation Lambdas: take a decoded payload,
//! run it through the writer and shape the JSON reply and status code.

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::errors::Error;
use crate::models::*;
use crate::payload::is_operation_envelope;
use crate::plan::GroupPurchase;
use crate::writer::{BatchedWriter, WriteFailure, WriteSummary};

/// Status code plus JSON body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self::from_error(&Error::Serialization(e)),
        }
    }

    fn written(response: WriteResponse) -> Self {
        Self::json(200, &response)
    }

    /// Error raised before the writer was involved.
    pub fn from_error(err: &Error) -> Self {
        log_error(err);
        Self::json(err.status_code(), &ErrorResponse::new(err.to_string(), err.code()))
    }

    fn from_failure(failure: &WriteFailure) -> Self {
        log_error(&failure.error);
        let mut body = ErrorResponse::new(failure.error.to_string(), failure.error.code());
        if !matches!(failure.error, Error::Validation(_)) {
            body = body.with_rolled_back(failure.rolled_back);
        }
        Self::json(failure.error.status_code(), &body)
    }
}

fn log_error(err: &Error) {
    if err.status_code() >= 500 {
        error!(error = %err, code = err.code(), "Request failed");
    } else {
        warn!(error = %err, code = err.code(), "Request rejected");
    }
}

fn transaction_ids(summary: &WriteSummary) -> Vec<String> {
    summary
        .transaction_ids
        .iter()
        .map(|t| t.as_str().to_string())
        .collect()
}

/// Route a decoded payload: envelopes go to [`handle_operation`],
/// everything else is a create-event request.
pub async fn handle_payload(writer: &BatchedWriter, payload: Value) -> ApiReply {
    if is_operation_envelope(&payload) {
        handle_operation(writer, payload).await
    } else {
        handle_create_event(writer, payload).await
    }
}

/// Create an event with its products.
pub async fn handle_create_event(writer: &BatchedWriter, payload: Value) -> ApiReply {
    let event = match serde_json::from_value::<CreateEventRequest>(payload)
        .map_err(Error::from)
        .and_then(CreateEventRequest::into_new_event)
    {
        Ok(event) => event,
        Err(e) => return ApiReply::from_error(&e),
    };

    info!(
        event_id = %event.event_id,
        ingredients = event.event_data.ingredients.len(),
        "Processing create-event request"
    );

    match writer.create_event(&event).await {
        Ok(summary) => ApiReply::written(WriteResponse {
            event_id: Some(event.event_id.clone()),
            products_created: Some(summary.child_count),
            ..WriteResponse::new(
                format!(
                    "Event {} created with {} products",
                    event.event_id, summary.child_count
                ),
                transaction_ids(&summary),
            )
        }),
        Err(failure) => ApiReply::from_failure(&failure),
    }
}

/// Dispatch an `{operation, data}` envelope.
pub async fn handle_operation(writer: &BatchedWriter, payload: Value) -> ApiReply {
    let envelope: OperationEnvelope = match serde_json::from_value(payload) {
        Ok(envelope) => envelope,
        Err(e) => return ApiReply::from_error(&Error::from(e)),
    };

    let name = envelope.operation.unwrap_or_default();
    let operation = match Operation::parse(&name) {
        Some(operation) => operation,
        None if name.is_empty() => {
            return ApiReply::from_error(&Error::Validation("operation is required".to_string()))
        }
        None => {
            return ApiReply::from_error(&Error::Validation(format!("Unknown operation: {}", name)))
        }
    };
    let data = match envelope.data {
        Some(data) if data.is_object() => data,
        _ => return ApiReply::from_error(&Error::Validation("data must be a JSON object".to_string())),
    };

    info!(operation = operation.as_str(), "Processing operation request");

    match operation {
        Operation::BatchUpdateProducts => batch_update_products(writer, data).await,
        Operation::CreateGroupPurchaseWithSync => create_group_purchase(writer, data).await,
    }
}

async fn batch_update_products(writer: &BatchedWriter, data: Value) -> ApiReply {
    let request: BatchUpdateRequest = match serde_json::from_value(data) {
        Ok(request) => request,
        Err(e) => return ApiReply::from_error(&Error::from(e)),
    };

    match writer.update_products(&request).await {
        Ok(summary) => ApiReply::written(WriteResponse {
            products_updated: Some(summary.child_count),
            ..WriteResponse::new(
                format!("Updated {} products", summary.child_count),
                transaction_ids(&summary),
            )
        }),
        Err(failure) => ApiReply::from_failure(&failure),
    }
}

async fn create_group_purchase(writer: &BatchedWriter, data: Value) -> ApiReply {
    let purchase = match serde_json::from_value::<GroupPurchaseRequest>(data)
        .map_err(Error::from)
        .and_then(GroupPurchase::from_request)
    {
        Ok(purchase) => purchase,
        Err(e) => return ApiReply::from_error(&e),
    };

    match writer.create_group_purchase(&purchase).await {
        Ok(summary) => ApiReply::written(WriteResponse {
            event_id: Some(purchase.main_id.clone()),
            purchase_id: Some(purchase.purchase_id.clone()),
            products_updated: Some(summary.child_count),
            ..WriteResponse::new(
                format!(
                    "Group purchase {} recorded for {} products",
                    purchase.purchase_id, summary.child_count
                ),
                transaction_ids(&summary),
            )
        }),
        Err(failure) => ApiReply::from_failure(&failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::store::{Collection, InMemoryStore, StoreCall};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(store: InMemoryStore, max_operations: usize) -> (Arc<InMemoryStore>, BatchedWriter) {
        let store = Arc::new(store);
        let config = WriterConfig::default()
            .with_max_operations(max_operations)
            .with_rollback(3, Duration::ZERO);
        (store.clone(), BatchedWriter::new(store, config))
    }

    #[tokio::test]
    async fn test_create_event_example() {
        let (store, writer) = setup(InMemoryStore::new(), 99);
        let payload = json!({
            "eventId": "E1",
            "eventData": {"ingredients": [{"ingredientHugoUuid": "A"}]},
            "contentHash": "h",
            "userId": "U"
        });

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["success"], true);
        assert_eq!(reply.body["eventId"], "E1");
        assert_eq!(reply.body["transactionId"], "tx-1");
        assert_eq!(reply.body["productsCreated"], 1);
        assert!(store.record(Collection::Products, "A_E1").is_some());
    }

    #[tokio::test]
    async fn test_missing_content_hash_makes_no_store_calls() {
        let (store, writer) = setup(InMemoryStore::new(), 99);
        let payload = json!({
            "eventId": "E1",
            "eventData": {"ingredients": [{"ingredientHugoUuid": "A"}]},
            "userId": "U"
        });

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["code"], "validation_error");
        assert!(reply.body["error"].as_str().unwrap().contains("contentHash"));
        assert!(reply.body.get("rolledBack").is_none());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_large_event_lists_every_transaction() {
        let (_, writer) = setup(InMemoryStore::new(), 99);
        let ingredients: Vec<Value> = (0..250)
            .map(|i| json!({"ingredientHugoUuid": format!("I{}", i)}))
            .collect();
        let payload = json!({
            "eventId": "E1",
            "eventData": {"ingredients": ingredients},
            "contentHash": "h",
            "userId": "U"
        });

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 200);
        // parent + ceil(250 / 99)
        assert_eq!(reply.body["transactionIds"].as_array().unwrap().len(), 4);
        assert_eq!(reply.body["productsCreated"], 250);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_409() {
        let (store, writer) = setup(
            InMemoryStore::new().with_record(Collection::Main, "E1", json!({"eventId": "E1"})),
            99,
        );
        let payload = json!({"eventId": "E1", "eventData": {}, "contentHash": "h", "userId": "U"});

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 409);
        assert_eq!(reply.body["code"], "already_exists");
        assert_eq!(reply.body["rolledBack"], false);
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_reports_rollback() {
        let (_, writer) = setup(
            InMemoryStore::new().fail_commit(1, Error::Remote("database unavailable".into())),
            99,
        );
        let payload = json!({"eventId": "E1", "eventData": {}, "contentHash": "h", "userId": "U"});

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body["rolledBack"], true);
        assert!(reply.body["error"].as_str().unwrap().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_conflict_is_409() {
        let (_, writer) = setup(
            InMemoryStore::new().with_record(Collection::Products, "A_E1", json!({})),
            99,
        );
        let payload = json!({
            "eventId": "E1",
            "eventData": {"ingredients": [{"ingredientHugoUuid": "A"}]},
            "contentHash": "h",
            "userId": "U"
        });

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 409);
        assert_eq!(reply.body["code"], "conflict");
    }

    #[tokio::test]
    async fn test_operation_limit_is_429() {
        let (_, writer) = setup(InMemoryStore::new().with_max_operations(2), 10);
        let payload = json!({
            "eventId": "E1",
            "eventData": {"ingredients": [{"ingredientHugoUuid": "A"}, {"ingredientHugoUuid": "B"}]},
            "contentHash": "h",
            "userId": "U"
        });

        let reply = handle_create_event(&writer, payload).await;
        assert_eq!(reply.status, 429);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let (store, writer) = setup(InMemoryStore::new(), 99);
        let reply = handle_operation(&writer, json!({"operation": "dropTables", "data": {}})).await;

        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["error"], "Validation error: Unknown operation: dropTables");
        assert!(store.calls().is_empty());

        let reply = handle_operation(&writer, json!({"data": {}})).await;
        assert_eq!(reply.status, 400);
    }

    #[tokio::test]
    async fn test_batch_update_operation() {
        let (store, writer) = setup(
            InMemoryStore::new().with_record(Collection::Products, "A_E1", json!({"quantities": "null"})),
            99,
        );
        let payload = json!({
            "operation": "batchUpdateProducts",
            "data": {"productIds": ["A_E1"], "updateType": "quantities", "updateData": {"g": 250}}
        });

        let reply = handle_payload(&writer, payload).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["productsUpdated"], 1);
        assert_eq!(
            store.record(Collection::Products, "A_E1").unwrap()["quantities"],
            r#"{"g":250}"#
        );
    }

    #[tokio::test]
    async fn test_batch_update_validation() {
        let (store, writer) = setup(InMemoryStore::new(), 99);
        let payload = json!({
            "operation": "batchUpdateProducts",
            "data": {"productIds": ["A_E1"], "updateData": {}}
        });

        let reply = handle_operation(&writer, payload).await;
        assert_eq!(reply.status, 400);
        assert!(reply.body.get("rolledBack").is_none());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_group_purchase_operation() {
        let store = InMemoryStore::new()
            .with_record(Collection::Main, "E1", json!({"eventId": "E1"}))
            .with_record(Collection::Products, "A_E1", json!({"isPurchased": false}));
        let (store, writer) = setup(store, 99);
        let payload = json!({
            "operation": "createGroupPurchaseWithSync",
            "data": {
                "mainId": "E1",
                "batchData": [{"productId": "A_E1", "quantity": 1}],
                "invoiceData": {"total": 4}
            }
        });

        let reply = handle_payload(&writer, payload).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["eventId"], "E1");
        let purchase_id = reply.body["purchaseId"].as_str().unwrap();
        assert!(store.record(Collection::Purchases, purchase_id).is_some());
        assert_eq!(store.record(Collection::Products, "A_E1").unwrap()["isPurchased"], true);
    }

    #[tokio::test]
    async fn test_group_purchase_for_missing_event_is_404() {
        let (store, writer) = setup(InMemoryStore::new(), 99);
        let payload = json!({
            "operation": "createGroupPurchaseWithSync",
            "data": {"mainId": "E9", "batchData": [{"productId": "A_E9"}], "invoiceData": {"total": 1}}
        });

        let reply = handle_operation(&writer, payload).await;
        assert_eq!(reply.status, 404);
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::Open(_))));
    }
}
