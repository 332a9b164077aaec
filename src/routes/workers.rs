//! Worker API endpoints
//!
//! ## Endpoints
//!
//! - `GET /v1/worker/{worker_id}/routes` - Personalized downstream route table
//! - `PUT /v1/worker/{worker_id}/status` - Worker-reported status update
//! - `PUT /v1/watchlist/{worker_id}` - Liveness complaint against a worker
//!
//! ## Authentication
//!
//! Status updates require the worker's own `worker_token` in `X-AUTH-TOKEN`.
//! Route fetches and watchlist reports are data-plane traffic and carry no
//! token, matching the trust model of the pipeline network.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::db::schemas::WorkerStatus;
use crate::fleet::Route;
use crate::server::AppState;
use crate::types::ForemanError;

type FullBody = Full<Bytes>;

/// Route table response body
#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<Route>,
}

/// Status update request body
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub worker_status: WorkerStatus,
}

/// Status update response body
#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse {
    pub worker_id: String,
    pub worker_status: WorkerStatus,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
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

// =============================================================================
// Route Handlers
// =============================================================================

/// Main handler for /v1/worker/* routes
pub async fn handle_worker_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();

    // Extract subpath after /v1/worker
    let subpath = path.strip_prefix("/v1/worker").unwrap_or("");

    match (method, subpath) {
        // GET /v1/worker/{worker_id}/routes - Personalized route table
        (Method::GET, p) if p.ends_with("/routes") => {
            let worker_id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/routes"))
                .unwrap_or("");
            handle_get_routes(state, worker_id).await
        }

        // PUT /v1/worker/{worker_id}/status - Worker status update
        (Method::PUT, p) if p.ends_with("/status") => {
            let worker_id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/status"))
                .unwrap_or("");
            handle_update_status(req, state, worker_id).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

/// Main handler for PUT /v1/watchlist/{worker_id}
pub async fn handle_watchlist_request(
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let worker_id = path.strip_prefix("/v1/watchlist/").unwrap_or("");
    if worker_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing worker id", None);
    }

    match state.monitor.process_watchlist_item(worker_id).await {
        Ok(()) => json_response(
            StatusCode::ACCEPTED,
            &SuccessResponse {
                success: true,
                message: "Watchlist report accepted".to_string(),
            },
        ),
        Err(ForemanError::NotFound(e)) => {
            warn!("Watchlist report for unknown worker: {}", e);
            error_response(
                StatusCode::NOT_FOUND,
                "Worker not found",
                Some("WORKER_NOT_FOUND"),
            )
        }
        Err(e) => {
            error!("Watchlist processing failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Watchlist processing failed",
                Some("STORAGE_ERROR"),
            )
        }
    }
}

/// GET /v1/worker/{worker_id}/routes
async fn handle_get_routes(state: Arc<AppState>, worker_id: &str) -> Response<FullBody> {
    let worker = match state.registry.find_worker(worker_id).await {
        Ok(w) => w,
        Err(ForemanError::NotFound(_)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "Worker not found",
                Some("WORKER_NOT_FOUND"),
            )
        }
        Err(e) => {
            error!("Route lookup failed for worker {}: {}", worker_id, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Route lookup failed",
                Some("STORAGE_ERROR"),
            );
        }
    };

    match state.resolver.resolve_routes(&worker).await {
        Ok(routes) => {
            debug!(
                "Resolved {} route group(s) for worker {}",
                routes.len(),
                worker_id
            );
            json_response(StatusCode::OK, &RoutesResponse { routes })
        }
        Err(e) => {
            error!("Route resolution failed for worker {}: {}", worker_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Route resolution failed",
                Some("STORAGE_ERROR"),
            )
        }
    }
}

/// PUT /v1/worker/{worker_id}/status
async fn handle_update_status(
    req: Request<Incoming>,
    state: Arc<AppState>,
    worker_id: &str,
) -> Response<FullBody> {
    let worker = match state.registry.find_worker(worker_id).await {
        Ok(w) => w,
        Err(ForemanError::NotFound(_)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "Worker not found",
                Some("WORKER_NOT_FOUND"),
            )
        }
        Err(e) => {
            error!("Status update lookup failed for worker {}: {}", worker_id, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Status update failed",
                Some("STORAGE_ERROR"),
            );
        }
    };

    let presented = req
        .headers()
        .get("X-AUTH-TOKEN")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if presented != worker.worker_token {
        warn!("Rejected status update for worker {}: bad token", worker_id);
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid worker token",
            Some("INVALID_TOKEN"),
        );
    }

    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid body", None),
    };

    let request: StatusUpdateRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid JSON",
                Some("INVALID_STATUS"),
            )
        }
    };

    // Offline is the coordinator's verdict, reached through the watchlist;
    // a worker only ever reports itself new or online
    if request.worker_status == WorkerStatus::Offline {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Workers cannot report themselves offline",
            Some("INVALID_STATUS"),
        );
    }

    match state
        .registry
        .update_worker_status(worker_id, request.worker_status)
        .await
    {
        Ok(()) => json_response(
            StatusCode::OK,
            &StatusUpdateResponse {
                worker_id: worker_id.to_string(),
                worker_status: request.worker_status,
            },
        ),
        Err(e) => {
            error!("Status update failed for worker {}: {}", worker_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Status update failed",
                Some("STORAGE_ERROR"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;

    use crate::config::Args;
    use crate::db::schemas::{Personality, SystemInfo, WorkerRegistration};
    use crate::fleet::PairingResponse;

    fn dev_state() -> Arc<AppState> {
        let args = Args::parse_from(["foreman", "--dev-mode"]);
        Arc::new(AppState::new(args))
    }

    /// Serve the worker and watchlist handlers on a loopback port
    async fn spawn_api(state: Arc<AppState>) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move {
                            let path = req.uri().path().to_string();
                            let response = if path.starts_with("/v1/watchlist/") {
                                handle_watchlist_request(state, &path).await
                            } else {
                                handle_worker_request(req, state, &path).await
                            };
                            Ok::<_, std::convert::Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });
        port
    }

    async fn register(state: &AppState, personality: Personality) -> PairingResponse {
        state
            .registry
            .register(WorkerRegistration {
                hostname: "node-1".to_string(),
                callback: "192.0.2.10:8080/v1/callback".to_string(),
                ip_address_v4: "192.0.2.10".to_string(),
                ip_address_v6: "::1".to_string(),
                personality,
                status: WorkerStatus::New,
                system_info: SystemInfo::default(),
            })
            .await
            .unwrap()
    }

    fn status_url(port: u16, worker_id: &str) -> String {
        format!("http://127.0.0.1:{}/v1/worker/{}/status", port, worker_id)
    }

    #[tokio::test]
    async fn status_update_with_wrong_token_is_unauthorized() {
        let state = dev_state();
        let worker = register(&state, Personality::Correlation).await;
        let port = spawn_api(Arc::clone(&state)).await;

        let response = reqwest::Client::new()
            .put(status_url(port, &worker.worker_id))
            .header("X-AUTH-TOKEN", "not-the-worker-token")
            .json(&serde_json::json!({ "worker_status": "online" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

        // Status untouched
        let stored = state.registry.find_worker(&worker.worker_id).await.unwrap();
        assert_eq!(stored.status, WorkerStatus::New);
    }

    #[tokio::test]
    async fn worker_cannot_report_itself_offline() {
        let state = dev_state();
        let worker = register(&state, Personality::Correlation).await;
        let port = spawn_api(Arc::clone(&state)).await;

        let response = reqwest::Client::new()
            .put(status_url(port, &worker.worker_id))
            .header("X-AUTH-TOKEN", &worker.worker_token)
            .json(&serde_json::json!({ "worker_status": "offline" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let stored = state.registry.find_worker(&worker.worker_id).await.unwrap();
        assert_eq!(stored.status, WorkerStatus::New);
    }

    #[tokio::test]
    async fn worker_publishes_itself_online_with_its_token() {
        let state = dev_state();
        let worker = register(&state, Personality::Correlation).await;
        let port = spawn_api(Arc::clone(&state)).await;

        let response = reqwest::Client::new()
            .put(status_url(port, &worker.worker_id))
            .header("X-AUTH-TOKEN", &worker.worker_token)
            .json(&serde_json::json!({ "worker_status": "online" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let stored = state.registry.find_worker(&worker.worker_id).await.unwrap();
        assert_eq!(stored.status, WorkerStatus::Online);
    }

    #[tokio::test]
    async fn unknown_worker_routes_are_not_found() {
        let state = dev_state();
        let port = spawn_api(state).await;

        let response = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/v1/worker/missing/routes", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn watchlist_report_is_accepted() {
        let state = dev_state();
        let worker = register(&state, Personality::Correlation).await;
        let port = spawn_api(Arc::clone(&state)).await;

        let response = reqwest::Client::new()
            .put(format!(
                "http://127.0.0.1:{}/v1/watchlist/{}",
                port, worker.worker_id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    }
}
