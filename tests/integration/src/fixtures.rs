//! Test fixtures and utilities

use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::CreateEventRequest;

/// Generate a unique event ID for testing
pub fn unique_event_id() -> String {
    format!("test-event-{}", &Uuid::new_v4().to_string()[..8])
}

/// `count` ingredients with unique component ids
pub fn ingredients(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "ingredientHugoUuid": format!("ing-{}-{}", i, &Uuid::new_v4().to_string()[..8]),
                "name": format!("Ingredient {}", i),
                "quantities": {"g": 100 + i},
                "recipes": ["stew"],
            })
        })
        .collect()
}

/// A complete create-event request
pub fn event_request(event_id: &str, ingredient_count: usize) -> CreateEventRequest {
    CreateEventRequest {
        event_id: event_id.to_string(),
        event_data: json!({
            "name": "Integration camp",
            "allDates": ["2026-07-01", "2026-07-02"],
            "ingredients": ingredients(ingredient_count),
        }),
        content_hash: Some(format!("hash-{}", event_id)),
        user_id: "integration-user".to_string(),
    }
}

/// Product id of an ingredient within an event
pub fn product_id(ingredient: &Value, event_id: &str) -> String {
    format!(
        "{}_{}",
        ingredient["ingredientHugoUuid"].as_str().unwrap_or_default(),
        event_id
    )
}
