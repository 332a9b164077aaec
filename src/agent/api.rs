//! Agent-local HTTP API
//!
//! ## Endpoints
//!
//! - `POST /v1/pairing/configure` - Pair (or re-pair) with a coordinator
//! - `GET /v1/pairing/status` - Current pairing stage
//! - `PUT /v1/callback` - Coordinator-triggered route refresh
//! - `GET /health`, `/healthz`, `/version`
//!
//! The configure webhook carries the cluster API secret in its body, so this
//! API is meant for the provisioning network, not the public internet.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::agent::pairing::{
    fetch_worker_routes, load_saved_config, AgentSettings, PairingAgent, PairingStage,
    PairingTarget,
};
use crate::db::schemas::Personality;
use crate::types::Result;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;
type FullBody = Full<Bytes>;

/// Shared agent state
pub struct AgentState {
    pub settings: AgentSettings,
    /// Pairing agent for the current (or last) handshake
    pub agent: RwLock<Option<Arc<PairingAgent>>>,
    client: reqwest::Client,
}

impl AgentState {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            agent: RwLock::new(None),
            client: reqwest::Client::new(),
        }
    }

    /// Install a pairing agent and run its handshake in the background
    pub async fn start_pairing(&self, target: PairingTarget) -> Arc<PairingAgent> {
        let mut slot = self.agent.write().await;
        Self::install(&mut slot, target, self.settings.clone())
    }

    /// Like `start_pairing`, but refuses while a handshake is still in
    /// flight. The stage check and the install happen under one write lock
    /// so two racing configure calls cannot both spawn a handshake.
    pub async fn try_start_pairing(&self, target: PairingTarget) -> Option<Arc<PairingAgent>> {
        let mut slot = self.agent.write().await;

        if let Some(agent) = slot.as_ref() {
            // A freshly installed agent may still read Start before its
            // task runs; only a finished run may be replaced
            match agent.stage().await {
                PairingStage::Done | PairingStage::Failed { .. } => {}
                _ => return None,
            }
        }

        Some(Self::install(&mut slot, target, self.settings.clone()))
    }

    fn install(
        slot: &mut Option<Arc<PairingAgent>>,
        target: PairingTarget,
        settings: AgentSettings,
    ) -> Arc<PairingAgent> {
        let agent = Arc::new(PairingAgent::new(target, settings));
        *slot = Some(Arc::clone(&agent));

        let task_agent = Arc::clone(&agent);
        tokio::spawn(async move {
            // Outcome lands in the agent's stage; callers poll /v1/pairing/status
            let _ = task_agent.pair().await;
        });

        agent
    }
}

/// Configure request body, as delivered by the provisioning webhook
#[derive(Debug, serde::Deserialize)]
pub struct ConfigureRequest {
    pub api_secret: String,
    pub coordinator_uri: String,
    pub personality: Personality,
}

/// Pairing status response body
#[derive(Debug, serde::Serialize)]
pub struct PairingStatusResponse {
    #[serde(flatten)]
    pub stage: PairingStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// Error response
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Success response
#[derive(Debug, serde::Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
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

/// Run the agent API server
pub async fn run(state: Arc<AgentState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;

    info!("Agent API listening on {}", listen);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_agent_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_agent_request(
    state: Arc<AgentState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => to_boxed(health_check()),

        (Method::GET, "/version") => to_boxed(version_info()),

        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        (Method::POST, "/v1/pairing/configure") => {
            to_boxed(handle_configure(req, Arc::clone(&state)).await)
        }

        (Method::GET, "/v1/pairing/status") => to_boxed(handle_status(Arc::clone(&state)).await),

        (Method::PUT, "/v1/callback") => to_boxed(handle_callback(Arc::clone(&state)).await),

        _ => to_boxed(error_response(StatusCode::NOT_FOUND, "Not found", None)),
    };

    Ok(response)
}

/// POST /v1/pairing/configure
async fn handle_configure(
    req: Request<Incoming>,
    state: Arc<AgentState>,
) -> Response<FullBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid body", None),
    };

    let request: ConfigureRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid JSON",
                Some("INVALID_CONFIGURATION"),
            )
        }
    };

    // Refuse while a handshake is mid-flight; a finished (or failed) one
    // may be replaced
    let started = state
        .try_start_pairing(PairingTarget {
            coordinator_uri: request.coordinator_uri,
            api_secret: request.api_secret,
            personality: request.personality,
        })
        .await;

    if started.is_none() {
        return error_response(
            StatusCode::CONFLICT,
            "Pairing already in progress",
            Some("PAIRING_IN_PROGRESS"),
        );
    }

    json_response(
        StatusCode::OK,
        &SuccessResponse {
            success: true,
            message: "Pairing started".to_string(),
        },
    )
}

/// GET /v1/pairing/status
async fn handle_status(state: Arc<AgentState>) -> Response<FullBody> {
    let (stage, worker_id) = match state.agent.read().await.as_ref() {
        Some(agent) => {
            let stage = agent.stage().await;
            let worker_id = if stage == PairingStage::Done {
                agent.load_saved().map(|c| c.worker_id)
            } else {
                None
            };
            (stage, worker_id)
        }
        // No handshake this run; a previous run may have left an identity
        None => match load_saved_config(&state.settings.state_dir) {
            Some(config) => (PairingStage::Done, Some(config.worker_id)),
            None => (PairingStage::Start, None),
        },
    };

    json_response(StatusCode::OK, &PairingStatusResponse { stage, worker_id })
}

/// PUT /v1/callback
async fn handle_callback(state: Arc<AgentState>) -> Response<FullBody> {
    let Some(config) = load_saved_config(&state.settings.state_dir) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "Worker is not paired",
            Some("NOT_PAIRED"),
        );
    };

    match fetch_worker_routes(&state.client, &config.coordinator_uri, &config.worker_id).await {
        Ok(routes) => {
            info!(
                "Refreshed {} route group(s) after coordinator callback",
                routes.len()
            );
            json_response(
                StatusCode::OK,
                &SuccessResponse {
                    success: true,
                    message: format!("{} route group(s) refreshed", routes.len()),
                },
            )
        }
        Err(e) => {
            error!("Route refresh failed: {}", e);
            error_response(
                StatusCode::BAD_GATEWAY,
                "Coordinator unreachable",
                Some("COORDINATOR_UNREACHABLE"),
            )
        }
    }
}

/// Handle liveness probe (/health, /healthz)
fn health_check() -> Response<FullBody> {
    let body = serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Handle version endpoint (/version)
fn version_info() -> Response<FullBody> {
    let body = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        "service": "foreman-agent",
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings_for(dir: &std::path::Path) -> AgentSettings {
        AgentSettings {
            state_dir: dir.to_path_buf(),
            callback_port: 9090,
            data_plane_url: None,
            pair_max_attempts: 1,
            pair_backoff_secs: 0,
        }
    }

    async fn body_string(response: Response<FullBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn status_starts_at_start_with_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AgentState::new(settings_for(dir.path())));

        let response = handle_status(state).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(r#""stage":"start"#));
    }

    #[tokio::test]
    async fn status_reports_identity_left_by_a_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("worker.json"),
            r#"{
                "personality": "storage",
                "personality_module": "foreman.personas.storage",
                "worker_id": "w-earlier",
                "worker_token": "t-earlier",
                "coordinator_uri": "http://127.0.0.1:1/v1"
            }"#,
        )
        .unwrap();
        let state = Arc::new(AgentState::new(settings_for(dir.path())));

        let body = body_string(handle_status(state).await).await;
        assert!(body.contains(r#""stage":"done"#));
        assert!(body.contains("w-earlier"));
    }

    #[tokio::test]
    async fn callback_without_identity_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AgentState::new(settings_for(dir.path())));

        let response = handle_callback(state).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configure_refuses_while_a_handshake_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        // Unreachable coordinator plus retries keeps the first run busy
        settings.pair_max_attempts = 5;
        settings.pair_backoff_secs = 1;
        let state = Arc::new(AgentState::new(settings));

        let target = PairingTarget {
            coordinator_uri: "http://127.1.1.1:9/v1".to_string(),
            api_secret: "cluster-secret".to_string(),
            personality: Personality::Storage,
        };

        assert!(state.try_start_pairing(target.clone()).await.is_some());
        // Second configure races the first handshake and must lose
        assert!(state.try_start_pairing(target).await.is_none());
    }

    #[tokio::test]
    async fn finished_handshake_may_be_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AgentState::new(settings_for(dir.path())));

        let target = PairingTarget {
            coordinator_uri: "http://127.1.1.1:9/v1".to_string(),
            api_secret: "cluster-secret".to_string(),
            personality: Personality::Storage,
        };

        let agent = state.try_start_pairing(target.clone()).await.unwrap();
        let mut stage = agent.stage().await;
        for _ in 0..200 {
            if matches!(stage, PairingStage::Failed { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stage = agent.stage().await;
        }
        assert!(matches!(stage, PairingStage::Failed { .. }));

        assert!(state.try_start_pairing(target).await.is_some());
    }

    #[tokio::test]
    async fn background_pairing_lands_on_done() {
        let pairing_body = r#"{
            "personality_module": "foreman.personas.correlation",
            "worker_id": "w-bg",
            "worker_token": "t-bg"
        }"#;
        let (port, _seen) = crate::agent::pairing::tests::spawn_coordinator_stub(vec![
            (202, pairing_body),
            (200, r#"{"routes":[]}"#),
            (200, "{}"),
        ])
        .await;

        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AgentState::new(settings_for(dir.path())));
        let agent = state
            .start_pairing(PairingTarget {
                coordinator_uri: format!("http://127.0.0.1:{}/v1", port),
                api_secret: "cluster-secret".to_string(),
                personality: Personality::Correlation,
            })
            .await;

        let mut stage = agent.stage().await;
        for _ in 0..200 {
            if matches!(stage, PairingStage::Done | PairingStage::Failed { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stage = agent.stage().await;
        }
        assert_eq!(stage, PairingStage::Done);

        let body = body_string(handle_status(state).await).await;
        assert!(body.contains("w-bg"));
    }
}
