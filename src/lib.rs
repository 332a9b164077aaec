//! Foreman - fleet coordinator for the event pipeline
//!
//! Tracks a fleet of heterogeneous worker nodes, computes per-worker routing
//! tables from a static personality topology, detects unresponsive workers
//! through a threshold-based watchlist, and pushes updated route targets to
//! broadcaster nodes. The `agent` module holds the worker-side bootstrap
//! that pairs a new node with the coordinator.

pub mod agent;
pub mod config;
pub mod db;
pub mod fleet;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ForemanError, Result};
