//! MealSync API Client for testing

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// API client for the MealSync writer routes
pub struct MealSyncClient {
    client: Client,
    base_url: String,
}

// Request/Response types

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub event_id: String,
    pub event_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationRequest {
    pub operation: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub success: bool,
    pub event_id: Option<String>,
    pub purchase_id: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_ids: Option<Vec<String>>,
    pub message: String,
    pub products_created: Option<usize>,
    pub products_updated: Option<usize>,
}

impl WriteResponse {
    /// Number of committed transactions, whichever field carried them
    pub fn transaction_count(&self) -> usize {
        match (&self.transaction_id, &self.transaction_ids) {
            (Some(_), _) => 1,
            (None, Some(ids)) => ids.len(),
            (None, None) => 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: Option<String>,
    pub rolled_back: Option<bool>,
}

/// Result type for API responses
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// HTTP error with status code and body
    Http { status: StatusCode, body: String },
    /// Network or serialization error
    Request(String),
}

impl ApiError {
    /// Decode the JSON error body of an HTTP failure.
    pub fn error_body(&self) -> Option<ErrorResponse> {
        match self {
            ApiError::Http { body, .. } => serde_json::from_str(body).ok(),
            ApiError::Request(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(status.as_u16()),
            ApiError::Request(_) => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl MealSyncClient {
    /// Create a new client with the given base URL
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client from MEALSYNC_API_URL, if set
    pub fn from_env() -> Option<Self> {
        let _ = dotenvy::dotenv();
        std::env::var("MEALSYNC_API_URL")
            .ok()
            .map(|url| Self::new(&url))
    }

    /// Create an event with its products
    pub async fn create_event(&self, req: &CreateEventRequest) -> ApiResult<WriteResponse> {
        self.post("/events", req).await
    }

    /// Run an `{operation, data}` envelope
    pub async fn run_operation(&self, operation: &str, data: Value) -> ApiResult<WriteResponse> {
        let req = OperationRequest {
            operation: operation.to_string(),
            data,
        };
        self.post("/operations", &req).await
    }

    // HTTP helpers

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| ApiError::Request(e.to_string()))
        } else {
            Err(ApiError::Http { status, body })
        }
    }
}
