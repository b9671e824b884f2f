//! Write plans
//!
//! Turns validated requests into the parent and child operations the writer
//! executes. Everything here is local: no store access, so every validation
//! failure happens before the first remote call.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::models::*;
use crate::store::{Collection, WriteOp};

/// Product fields a `fields` update may not touch
const PROTECTED_PRODUCT_FIELDS: [&str; 3] = ["productId", "eventId", "ingredientHugoUuid"];

/// Operations of one write sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    /// Written together in the parent's transaction
    pub parent: Vec<WriteOp>,
    /// Split into batches under the per-transaction cap
    pub children: Vec<WriteOp>,
}

impl WritePlan {
    pub fn total_operations(&self) -> usize {
        self.parent.len() + self.children.len()
    }
}

/// Event record plus one product per ingredient.
pub fn event_plan(event: &NewEvent) -> Result<WritePlan> {
    let mut seen = HashSet::new();
    for (index, ingredient) in event.event_data.ingredients.iter().enumerate() {
        let id = ingredient.ingredient_hugo_uuid.trim();
        if id.is_empty() {
            return Err(Error::Validation(format!(
                "ingredients[{}].ingredientHugoUuid is required",
                index
            )));
        }
        if !seen.insert(id) {
            return Err(Error::Validation(format!("duplicate ingredient {}", id)));
        }
    }

    let record = EventRecord::new(event);
    let parent = vec![WriteOp::create(
        Collection::Main,
        &event.event_id,
        serde_json::to_value(&record)?,
    )];

    let children = event
        .event_data
        .ingredients
        .iter()
        .map(|ingredient| {
            let product = ProductRecord::from_ingredient(ingredient, &event.event_id)?;
            Ok(WriteOp::create(
                Collection::Products,
                product.product_id.clone(),
                serde_json::to_value(&product)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WritePlan { parent, children })
}

/// One update per listed product; there is no parent record.
pub fn product_update_plan(req: &BatchUpdateRequest) -> Result<WritePlan> {
    let update_type = req
        .update_type
        .ok_or_else(|| Error::Validation("updateType is required".to_string()))?;

    let targets: Vec<(&str, &Value)> = match (&req.products, &req.product_ids) {
        (Some(products), _) if !products.is_empty() => products
            .iter()
            .map(|p| {
                p.update_data
                    .as_ref()
                    .or(req.update_data.as_ref())
                    .map(|data| (p.product_id.as_str(), data))
                    .ok_or_else(|| {
                        Error::Validation(format!("updateData is required for {}", p.product_id))
                    })
            })
            .collect::<Result<_>>()?,
        (_, Some(ids)) if !ids.is_empty() => {
            let data = req
                .update_data
                .as_ref()
                .ok_or_else(|| Error::Validation("updateData is required".to_string()))?;
            ids.iter().map(|id| (id.as_str(), data)).collect()
        }
        _ => {
            return Err(Error::Validation(
                "productIds or products is required".to_string(),
            ))
        }
    };

    let mut seen = HashSet::new();
    let children = targets
        .into_iter()
        .map(|(product_id, data)| {
            if product_id.trim().is_empty() {
                return Err(Error::Validation("productId must not be empty".to_string()));
            }
            if !seen.insert(product_id) {
                return Err(Error::Validation(format!("duplicate product {}", product_id)));
            }
            Ok(WriteOp::update(
                Collection::Products,
                product_id,
                update_patch(update_type, data)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WritePlan {
        parent: Vec::new(),
        children,
    })
}

fn update_patch(update_type: UpdateType, data: &Value) -> Result<Value> {
    match update_type {
        UpdateType::PurchaseStatus => {
            let purchased = data
                .get("isPurchased")
                .and_then(Value::as_bool)
                .ok_or_else(|| {
                    Error::Validation("updateData.isPurchased must be a boolean".to_string())
                })?;
            Ok(json!({ "isPurchased": purchased }))
        }
        UpdateType::Quantities => Ok(json!({ "quantities": serde_json::to_string(data)? })),
        UpdateType::Fields => {
            let fields = data
                .as_object()
                .filter(|fields| !fields.is_empty())
                .ok_or_else(|| {
                    Error::Validation("updateData must be a non-empty object".to_string())
                })?;
            if let Some(field) = PROTECTED_PRODUCT_FIELDS.iter().find(|f| fields.contains_key(**f)) {
                return Err(Error::Validation(format!("{} cannot be updated", field)));
            }
            Ok(Value::Object(fields.clone()))
        }
    }
}

/// Group purchase after validation
#[derive(Debug, Clone)]
pub struct GroupPurchase {
    pub main_id: String,
    pub purchase_id: String,
    pub lines: Vec<PurchaseLine>,
    pub invoice: Value,
}

impl GroupPurchase {
    pub fn from_request(req: GroupPurchaseRequest) -> Result<Self> {
        let main_id = req
            .main_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Validation("mainId is required".to_string()))?;
        let lines = req
            .batch_data
            .filter(|lines| !lines.is_empty())
            .ok_or_else(|| Error::Validation("batchData must list at least one product".to_string()))?;
        let invoice = req
            .invoice_data
            .filter(|invoice| !invoice.is_null())
            .ok_or_else(|| Error::Validation("invoiceData is required".to_string()))?;

        let mut seen = HashSet::new();
        for line in &lines {
            if line.product_id.trim().is_empty() {
                return Err(Error::Validation("batchData productId must not be empty".to_string()));
            }
            if !seen.insert(line.product_id.as_str()) {
                return Err(Error::Validation(format!("duplicate product {}", line.product_id)));
            }
        }

        let purchase_id = purchase_id(&main_id, &invoice)?;
        Ok(Self {
            main_id,
            purchase_id,
            lines,
            invoice,
        })
    }

    /// Purchase record as parent, product updates as children.
    pub fn plan(&self) -> Result<WritePlan> {
        let record = PurchaseRecord {
            purchase_id: self.purchase_id.clone(),
            event_id: self.main_id.clone(),
            invoice: serde_json::to_string(&self.invoice)?,
            product_ids: self.lines.iter().map(|l| l.product_id.clone()).collect(),
            line_count: self.lines.len() as u32,
            created_at: Utc::now(),
        };
        let parent = vec![WriteOp::create(
            Collection::Purchases,
            &self.purchase_id,
            serde_json::to_value(&record)?,
        )];

        let children = self
            .lines
            .iter()
            .map(|line| {
                Ok(WriteOp::update(
                    Collection::Products,
                    &line.product_id,
                    json!({
                        "isPurchased": true,
                        "purchaseId": self.purchase_id,
                        "purchasedQuantity": serde_json::to_string(&line.quantity)?,
                    }),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(WritePlan { parent, children })
    }
}

/// Deterministic purchase id: the same invoice for the same event maps to
/// the same record, so a resubmission trips the existence check.
pub fn purchase_id(main_id: &str, invoice: &Value) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(main_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_string(invoice)?.as_bytes());
    let digest = hasher.finalize();

    Ok(digest.iter().take(16).map(|b| format!("{:02x}", b)).collect())
}
