//! Domain models for MealSync
//!
//! These types represent the core entities in the system:
//! - Events: one planning occasion, keyed by a caller-supplied id
//! - Products: one line item per ingredient, owned by an event
//! - Purchases: a group purchase that marks several products as bought
//!
//! Stored records use camelCase field names, matching the inbound payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};

/// Inbound create-event payload.
///
/// Every top-level field is optional here so that missing inputs can be
/// reported together as a validation error instead of a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_data: Option<EventData>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Event body as submitted by the planner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub all_dates: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

/// One ingredient of an event; becomes one product record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    /// Component identifier the product id is derived from
    #[serde(default)]
    pub ingredient_hugo_uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantities: Value,
    #[serde(default)]
    pub recipes: Value,
    /// Everything else the planner sent, kept verbatim
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Create-event payload after validation
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: String,
    pub event_data: EventData,
    pub content_hash: String,
    pub user_id: String,
}

impl CreateEventRequest {
    /// Check the four required inputs and return the validated payload.
    pub fn into_new_event(self) -> Result<NewEvent> {
        let mut missing = Vec::new();
        if is_blank(&self.event_id) {
            missing.push("eventId");
        }
        if self.event_data.is_none() {
            missing.push("eventData");
        }
        if is_blank(&self.content_hash) {
            missing.push("contentHash");
        }
        if is_blank(&self.user_id) {
            missing.push("userId");
        }

        match (self.event_id, self.event_data, self.content_hash, self.user_id) {
            (Some(event_id), Some(event_data), Some(content_hash), Some(user_id)) if missing.is_empty() => {
                Ok(NewEvent {
                    event_id,
                    event_data,
                    content_hash,
                    user_id,
                })
            }
            _ => Err(Error::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Lifecycle flag of an event record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Active,
    Archived,
}

/// Stored event (the parent / main record)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_id: String,
    pub name: String,
    pub content_hash: String,
    pub user_id: String,
    pub status: EventStatus,
    pub all_dates: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event: &NewEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            name: event.event_data.name.clone(),
            content_hash: event.content_hash.clone(),
            user_id: event.user_id.clone(),
            status: EventStatus::Active,
            all_dates: event.event_data.all_dates.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Stored product (a child record of an event)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_id: String,
    pub event_id: String,
    pub ingredient_hugo_uuid: String,
    pub name: String,
    /// JSON text
    pub quantities: String,
    /// JSON text
    pub recipes: String,
    /// JSON text of the remaining ingredient fields
    pub attributes: String,
    pub is_purchased: bool,
    pub purchase_count: u32,
    pub recipe_count: u32,
}

/// Product ids are the ingredient id and the event id joined by `_`.
pub fn product_id(ingredient_hugo_uuid: &str, event_id: &str) -> String {
    format!("{}_{}", ingredient_hugo_uuid, event_id)
}

impl ProductRecord {
    pub fn from_ingredient(ingredient: &Ingredient, event_id: &str) -> Result<Self> {
        let recipe_count = ingredient
            .recipes
            .as_array()
            .map_or(0, |recipes| recipes.len() as u32);

        Ok(Self {
            product_id: product_id(&ingredient.ingredient_hugo_uuid, event_id),
            event_id: event_id.to_string(),
            ingredient_hugo_uuid: ingredient.ingredient_hugo_uuid.clone(),
            name: ingredient.name.clone().unwrap_or_default(),
            quantities: serde_json::to_string(&ingredient.quantities)?,
            recipes: serde_json::to_string(&ingredient.recipes)?,
            attributes: serde_json::to_string(&ingredient.attributes)?,
            is_purchased: false,
            purchase_count: 0,
            recipe_count,
        })
    }
}

/// Stored group purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub purchase_id: String,
    pub event_id: String,
    /// JSON text of the invoice
    pub invoice: String,
    pub product_ids: Vec<String>,
    pub line_count: u32,
    pub created_at: DateTime<Utc>,
}

/// `{operation, data}` envelope accepted by the operations handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationEnvelope {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Operations reachable through the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BatchUpdateProducts,
    CreateGroupPurchaseWithSync,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "batchUpdateProducts" => Some(Operation::BatchUpdateProducts),
            "createGroupPurchaseWithSync" => Some(Operation::CreateGroupPurchaseWithSync),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::BatchUpdateProducts => "batchUpdateProducts",
            Operation::CreateGroupPurchaseWithSync => "createGroupPurchaseWithSync",
        }
    }
}

/// Kind of change applied by `batchUpdateProducts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateType {
    /// `updateData.isPurchased` (bool)
    PurchaseStatus,
    /// `updateData` replaces the quantities blob
    Quantities,
    /// `updateData` is merged into the row
    Fields,
}

/// `data` of a `batchUpdateProducts` operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,
    #[serde(default)]
    pub products: Option<Vec<ProductUpdate>>,
    #[serde(default)]
    pub update_type: Option<UpdateType>,
    #[serde(default)]
    pub update_data: Option<Value>,
}

/// Per-product entry of a batch update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub update_data: Option<Value>,
}

/// `data` of a `createGroupPurchaseWithSync` operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPurchaseRequest {
    #[serde(default)]
    pub main_id: Option<String>,
    #[serde(default)]
    pub batch_data: Option<Vec<PurchaseLine>>,
    #[serde(default)]
    pub invoice_data: Option<Value>,
}

/// One product covered by a group purchase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLine {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub quantity: Value,
}

/// Successful write response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    /// Set when the write used exactly one transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Set when the write used more than one transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ids: Option<Vec<String>>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products_created: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products_updated: Option<usize>,
}

impl WriteResponse {
    pub fn new(message: impl Into<String>, transaction_ids: Vec<String>) -> Self {
        let (transaction_id, transaction_ids) = match transaction_ids.len() {
            1 => (transaction_ids.into_iter().next(), None),
            _ => (None, Some(transaction_ids)),
        };
        Self {
            success: true,
            transaction_id,
            transaction_ids,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Present once the write sequence got past validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            rolled_back: None,
        }
    }

    pub fn with_rolled_back(mut self, rolled_back: bool) -> Self {
        self.rolled_back = Some(rolled_back);
        self
    }
}
