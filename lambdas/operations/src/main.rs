//! MealSync Operations Lambda
//!
//! Handles POST /operations with an `{operation, data}` envelope:
//! - batchUpdateProducts
//! - createGroupPurchaseWithSync

use lambda_http::{run, service_fn, Body, Error as LambdaError, Request, Response};
use mealsync_core::{payload, service, store, AppConfig, BatchedWriter, Error};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn handler(writer: &BatchedWriter, event: Request) -> Result<Response<Body>, LambdaError> {
    let reply = match payload::decode_bytes(event.body()) {
        Ok(payload) if payload::is_operation_envelope(&payload) => {
            service::handle_operation(writer, payload).await
        }
        Ok(_) => service::ApiReply::from_error(&Error::Validation("operation is required".to_string())),
        Err(e) => service::ApiReply::from_error(&e),
    };

    json_response(reply.status, &reply.body)
}

fn json_response<T: Serialize>(status: u16, body: &T) -> Result<Response<Body>, LambdaError> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(body)?))?)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let config = AppConfig::from_env()?;
    let store = store::connect(&config).await?;
    let writer = BatchedWriter::new(store, config.writer.clone());
    info!(max_operations = writer.config().max_operations, "Operations writer ready");

    let writer = &writer;
    run(service_fn(move |event| async move { handler(writer, event).await })).await
}
