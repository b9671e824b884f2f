//! Integration tests for the MealSync writer API
//!
//! Run with: MEALSYNC_API_URL=https://your-api.execute-api.us-west-2.amazonaws.com cargo test
//!
//! These tests require a deployed MealSync instance.

use mealsync_integration_tests::{
    client::MealSyncClient,
    fixtures::{event_request, product_id, unique_event_id},
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Helper to get client or skip test
fn get_client() -> Option<MealSyncClient> {
    let client = MealSyncClient::from_env();
    if client.is_none() {
        eprintln!("Skipping: MEALSYNC_API_URL not set");
    }
    client
}

// ============================================================================
// Create Event
// ============================================================================

#[tokio::test]
async fn test_create_event() {
    let Some(client) = get_client() else { return };

    let event_id = unique_event_id();
    let response = client
        .create_event(&event_request(&event_id, 3))
        .await
        .expect("Failed to create event");

    assert!(response.success);
    assert_eq!(response.event_id.as_deref(), Some(event_id.as_str()));
    assert_eq!(response.products_created, Some(3));
    assert_eq!(response.transaction_count(), 1);
}

#[tokio::test]
async fn test_create_duplicate_event_fails() {
    let Some(client) = get_client() else { return };

    let event_id = unique_event_id();
    let req = event_request(&event_id, 2);
    client.create_event(&req).await.expect("Failed to create event");

    let err = client.create_event(&req).await.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(err.error_body().and_then(|b| b.code).as_deref(), Some("already_exists"));
}

#[tokio::test]
async fn test_missing_content_hash_is_rejected() {
    let Some(client) = get_client() else { return };

    let mut req = event_request(&unique_event_id(), 1);
    req.content_hash = None;

    let err = client.create_event(&req).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    let body = err.error_body().expect("JSON error body");
    assert!(body.error.contains("contentHash"));
    assert_eq!(body.rolled_back, None);
}

#[tokio::test]
async fn test_large_event_spans_transactions() {
    let Some(client) = get_client() else { return };

    let event_id = unique_event_id();
    let response = client
        .create_event(&event_request(&event_id, 150))
        .await
        .expect("Failed to create event");

    assert_eq!(response.products_created, Some(150));
    assert!(response.transaction_count() > 1);
}

// ============================================================================
// Operations
// ============================================================================

#[tokio::test]
async fn test_batch_update_quantities() {
    let Some(client) = get_client() else { return };

    let event_id = unique_event_id();
    let req = event_request(&event_id, 2);
    client.create_event(&req).await.expect("Failed to create event");

    let ids: Vec<String> = req.event_data["ingredients"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| product_id(i, &event_id))
        .collect();

    let response = client
        .run_operation(
            "batchUpdateProducts",
            json!({"productIds": ids, "updateType": "quantities", "updateData": {"g": 500}}),
        )
        .await
        .expect("Failed to update products");

    assert!(response.success);
    assert_eq!(response.products_updated, Some(2));
}

#[tokio::test]
async fn test_group_purchase() {
    let Some(client) = get_client() else { return };

    let event_id = unique_event_id();
    let req = event_request(&event_id, 2);
    client.create_event(&req).await.expect("Failed to create event");

    let lines: Vec<_> = req.event_data["ingredients"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| json!({"productId": product_id(i, &event_id), "quantity": 1}))
        .collect();
    let data = json!({
        "mainId": event_id,
        "batchData": lines,
        "invoiceData": {"store": "Market", "total": 12.5},
    });

    let response = client
        .run_operation("createGroupPurchaseWithSync", data.clone())
        .await
        .expect("Failed to record purchase");
    assert!(response.purchase_id.is_some());
    assert_eq!(response.products_updated, Some(2));

    // Same invoice again maps to the same purchase id
    let err = client
        .run_operation("createGroupPurchaseWithSync", data)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
}

#[tokio::test]
async fn test_unknown_operation() {
    let Some(client) = get_client() else { return };

    let err = client
        .run_operation("dropEverything", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
}
