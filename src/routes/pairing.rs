//! Pairing endpoint
//!
//! ## Endpoints
//!
//! - `POST /v1/pairing` - Register a worker and issue its identity
//!
//! ## Authentication
//!
//! Pairing requires the cluster API secret in the `X-AUTH-TOKEN` header.
//! The issued `worker_token` (not the API secret) authenticates the worker
//! on subsequent status updates.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::db::schemas::WorkerRegistration;
use crate::server::AppState;

type FullBody = Full<Bytes>;

/// Pairing request body
#[derive(Debug, Deserialize)]
pub struct PairingRequest {
    pub worker_registration: WorkerRegistration,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

fn error_response(status: StatusCode, error: &str, code: Option<&str>) -> Response<FullBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(|c| c.to_string()),
        },
    )
}

/// Main handler for POST /v1/pairing
pub async fn handle_pairing_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<FullBody> {
    let presented = req
        .headers()
        .get("X-AUTH-TOKEN")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if presented != state.args.api_secret() {
        warn!("Rejected pairing request: bad or missing API secret");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid API secret",
            Some("INVALID_TOKEN"),
        );
    }

    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid body", None),
    };

    let request: PairingRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid JSON",
                Some("INVALID_REGISTRATION"),
            )
        }
    };

    match state.registry.register(request.worker_registration).await {
        Ok(pairing) => json_response(StatusCode::ACCEPTED, &pairing),
        Err(e) => {
            error!("Pairing failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed",
                Some("STORAGE_ERROR"),
            )
        }
    }
}
