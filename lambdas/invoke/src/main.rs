//! MealSync Invoke Lambda
//!
//! Direct invocation entry point. Accepts a structured payload, a raw JSON
//! string or a `{"body": ...}` wrapper, and routes envelopes carrying an
//! `operation` field to the operations service.

use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use mealsync_core::{payload, service, store, AppConfig, BatchedWriter};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Proxy-shaped result so callers see the same contract as the HTTP routes
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeResponse {
    status_code: u16,
    body: Value,
}

async fn handler(writer: &BatchedWriter, event: LambdaEvent<Value>) -> Result<InvokeResponse, LambdaError> {
    let (payload, context) = event.into_parts();
    info!(request_id = %context.request_id, "Processing direct invocation");

    let reply = match payload::decode_value(payload) {
        Ok(payload) => service::handle_payload(writer, payload).await,
        Err(e) => service::ApiReply::from_error(&e),
    };

    Ok(InvokeResponse {
        status_code: reply.status,
        body: reply.body,
    })
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

    let writer = &writer;
    run(service_fn(move |event| async move { handler(writer, event).await })).await
}
