//! HTTP server implementation
//!
//! Pattern adapted from holo-host/rust/holo-gateway/src/lib.rs
//! Uses hyper http1 with TokioIo for async handling.

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
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::MongoClient;
use crate::fleet::{
    BroadcastConfig, BroadcastDispatcher, MemoryWatchlistStore, MemoryWorkerStore,
    MongoWatchlistStore, MongoWorkerStore, RouteResolver, WatchlistConfig, WatchlistMonitor,
    WatchlistStore, WorkerRegistry, WorkerStore,
};
use crate::routes;
use crate::types::ForemanError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Worker registry for pairing, lookup, and status changes
    pub registry: WorkerRegistry,
    /// Route resolver for personalized downstream route tables
    pub resolver: RouteResolver,
    /// Watchlist monitor for liveness reports and offline transitions
    pub monitor: WatchlistMonitor,
    /// True when backed by MongoDB, false on the in-memory store
    pub using_mongo: bool,
}

impl AppState {
    /// Create AppState on the in-memory store (dev mode, no MongoDB)
    pub fn new(args: Args) -> Self {
        let workers: Arc<dyn WorkerStore> = Arc::new(MemoryWorkerStore::new());
        let watchlist: Arc<dyn WatchlistStore> = Arc::new(MemoryWatchlistStore::new());
        Self::assemble(args, workers, watchlist, false)
    }

    /// Create AppState backed by MongoDB collections
    ///
    /// Fetches both collections up front so index problems surface at
    /// startup rather than on the first request.
    pub async fn with_mongo(args: Args, mongo: &MongoClient) -> Result<Self, ForemanError> {
        let workers: Arc<dyn WorkerStore> = Arc::new(MongoWorkerStore::new(mongo).await?);
        let watchlist: Arc<dyn WatchlistStore> = Arc::new(MongoWatchlistStore::new(mongo).await?);
        Ok(Self::assemble(args, workers, watchlist, true))
    }

    fn assemble(
        args: Args,
        workers: Arc<dyn WorkerStore>,
        watchlist: Arc<dyn WatchlistStore>,
        using_mongo: bool,
    ) -> Self {
        let registry = WorkerRegistry::new(workers);
        let resolver = RouteResolver::new(registry.clone());
        let dispatcher = BroadcastDispatcher::new(
            registry.clone(),
            resolver.clone(),
            BroadcastConfig {
                port: args.broadcast_port,
                timeout_secs: args.broadcast_timeout_secs,
            },
        );
        let monitor = WatchlistMonitor::new(
            watchlist,
            registry.clone(),
            dispatcher,
            WatchlistConfig {
                failure_tolerance_seconds: args.failure_tolerance_seconds,
                watchlist_count_threshold: args.watchlist_count_threshold,
            },
        );

        Self {
            args,
            registry,
            resolver,
            monitor,
            using_mongo,
        }
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), ForemanError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Foreman listening on {} ({} store)",
        state.args.listen,
        if state.using_mongo { "mongodb" } else { "memory" }
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - using default API secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
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
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if the coordinator is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Worker pairing - issues worker_id and worker_token
        (Method::POST, "/v1/pairing") => {
            to_boxed(routes::handle_pairing_request(req, Arc::clone(&state)).await)
        }

        // Worker routes and status (/v1/worker/{worker_id}/...)
        (_, p) if p.starts_with("/v1/worker/") => {
            to_boxed(routes::handle_worker_request(req, Arc::clone(&state), p).await)
        }

        // Liveness complaints (/v1/watchlist/{worker_id})
        (Method::PUT, p) if p.starts_with("/v1/watchlist/") => {
            to_boxed(routes::handle_watchlist_request(Arc::clone(&state), p).await)
        }

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
