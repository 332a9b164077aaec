//! Configuration for Foreman
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;

/// Foreman - fleet coordinator for the event pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "foreman")]
#[command(about = "Fleet coordinator: worker registry, routes, and liveness watchlist")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "foreman")]
    pub mongodb_db: String,

    /// Shared secret workers must present when pairing (required in production)
    #[arg(long, env = "API_SECRET")]
    pub api_secret: Option<String>,

    /// Enable development mode (in-memory store fallback, default pairing secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Seconds a watchlist entry may sit unchanged before the expiry sweep drops it
    #[arg(long, env = "FAILURE_TOLERANCE_SECONDS", default_value = "60")]
    pub failure_tolerance_seconds: i64,

    /// Failure-report count at which a worker is marked offline
    #[arg(long, env = "WATCHLIST_COUNT_THRESHOLD", default_value = "5")]
    pub watchlist_count_threshold: i32,

    /// Port broadcaster workers listen on for route pushes
    #[arg(long, env = "BROADCAST_PORT", default_value = "8080")]
    pub broadcast_port: u16,

    /// Per-broadcaster timeout for route pushes, in seconds
    #[arg(long, env = "BROADCAST_TIMEOUT_SECS", default_value = "5")]
    pub broadcast_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Get effective pairing secret (uses default in dev mode)
    pub fn api_secret(&self) -> String {
        if self.dev_mode {
            self.api_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.api_secret
                .clone()
                .expect("API_SECRET is required in production mode")
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.api_secret.is_none() {
                return Err("API_SECRET is required in production mode".to_string());
            }
        }

        if self.failure_tolerance_seconds <= 0 {
            return Err("FAILURE_TOLERANCE_SECONDS must be positive".to_string());
        }

        if self.watchlist_count_threshold < 1 {
            return Err("WATCHLIST_COUNT_THRESHOLD must be at least 1".to_string());
        }

        Ok(())
    }
}
