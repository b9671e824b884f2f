//! MealSync Create Event Lambda
//!
//! Handles POST /events

use lambda_http::{run, service_fn, Body, Error as LambdaError, Request, Response};
use mealsync_core::{payload, service, store, AppConfig, BatchedWriter};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn handler(writer: &BatchedWriter, event: Request) -> Result<Response<Body>, LambdaError> {
    let reply = match payload::decode_bytes(event.body()) {
        Ok(payload) => service::handle_create_event(writer, payload).await,
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
    info!(max_operations = writer.config().max_operations, "Create-event writer ready");

    let writer = &writer;
    run(service_fn(move |event| async move { handler(writer, event).await })).await
}
