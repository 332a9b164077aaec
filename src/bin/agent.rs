//! Foreman Agent - worker-side bootstrap for fleet nodes
//!
//! Run this binary on each worker node. It pairs the node with the
//! coordinator, persists the issued identity, and serves the callback
//! API the coordinator pushes route changes to.
//!
//! Usage:
//!   foreman-agent --coordinator-uri http://coordinator:8080/v1 \
//!                 --api-secret <secret> --personality correlation
//!
//! With no pairing flags the agent starts idle and waits for a
//! POST /v1/pairing/configure from provisioning tooling.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use foreman::agent::{api, AgentSettings, AgentState, PairingTarget};
use foreman::db::schemas::Personality;

#[derive(Parser, Debug)]
#[command(name = "foreman-agent")]
#[command(about = "Worker-side bootstrap agent for the Foreman fleet")]
#[command(version)]
struct Args {
    /// Address the agent API listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Coordinator API base, including the version segment
    #[arg(long, env = "COORDINATOR_URI")]
    coordinator_uri: Option<String>,

    /// Cluster API secret presented when pairing
    #[arg(long, env = "API_SECRET")]
    api_secret: Option<String>,

    /// Personality to register as (correlation, normalization, storage,
    /// broadcaster, pairing)
    #[arg(long, env = "PERSONALITY")]
    personality: Option<Personality>,

    /// Directory the paired identity is persisted under
    #[arg(long, env = "STATE_DIR", default_value = "/var/lib/foreman")]
    state_dir: PathBuf,

    /// Local data-plane base URL to nudge after a config change
    #[arg(long, env = "DATA_PLANE_URL")]
    data_plane_url: Option<String>,

    /// Attempts per pairing stage before giving up
    #[arg(long, env = "PAIR_MAX_ATTEMPTS", default_value = "5")]
    pair_max_attempts: u32,

    /// Initial backoff between attempts, doubled each retry
    #[arg(long, env = "PAIR_BACKOFF_SECS", default_value = "2")]
    pair_backoff_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("foreman={},info", args.log_level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Foreman agent on {} (state dir: {})",
        args.listen,
        args.state_dir.display()
    );

    let state = Arc::new(AgentState::new(AgentSettings {
        state_dir: args.state_dir.clone(),
        callback_port: args.listen.port(),
        data_plane_url: args.data_plane_url.clone(),
        pair_max_attempts: args.pair_max_attempts,
        pair_backoff_secs: args.pair_backoff_secs,
    }));

    // Pair immediately when the target is fully specified on the command
    // line; otherwise wait for a configure call
    match (args.coordinator_uri, args.api_secret, args.personality) {
        (Some(coordinator_uri), Some(api_secret), Some(personality)) => {
            info!(
                "Pairing with {} as {} at startup",
                coordinator_uri, personality
            );
            state
                .start_pairing(PairingTarget {
                    coordinator_uri,
                    api_secret,
                    personality,
                })
                .await;
        }
        (None, None, None) => {
            info!("No pairing target configured, waiting for /v1/pairing/configure");
        }
        _ => {
            error!("--coordinator-uri, --api-secret and --personality must be given together");
            std::process::exit(1);
        }
    }

    // Serve the agent API until shutdown
    tokio::select! {
        result = api::run(Arc::clone(&state), args.listen) => {
            if let Err(e) = result {
                error!("Agent API error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Agent shutting down");
}
