//! Broadcast dispatch
//!
//! Pushes refreshed route targets to broadcaster workers after a topology
//! change. Broadcasters are tried in order until one accepts; a non-200
//! answer falls through to the next broadcaster, while a transport failure
//! aborts the whole dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::schemas::{Personality, WorkerDoc};
use crate::fleet::registry::WorkerRegistry;
use crate::fleet::routing::RouteResolver;
use crate::fleet::topology::VALID_ROUTE_STATUSES;
use crate::types::{ForemanError, Result};

/// Wire payload PUT to a broadcaster
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BroadcastPayload {
    pub broadcast: BroadcastMessage,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: BroadcastType,
    pub targets: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastType {
    #[serde(rename = "ROUTES")]
    Routes,
}

/// How a dispatch attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A broadcaster answered 200
    Delivered,
    /// No broadcaster worker is currently active
    NoBroadcasters,
    /// No upstream worker holds routes to the changed worker
    NoTargets,
    /// Every broadcaster answered, none with 200
    Exhausted,
}

impl DispatchOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Port broadcaster workers listen on
    pub port: u16,
    /// Per-broadcaster request timeout
    pub timeout_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout_secs: 5,
        }
    }
}

/// Pushes ROUTES broadcasts at broadcaster workers
#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: WorkerRegistry,
    resolver: RouteResolver,
    client: reqwest::Client,
    config: BroadcastConfig,
}

impl BroadcastDispatcher {
    pub fn new(registry: WorkerRegistry, resolver: RouteResolver, config: BroadcastConfig) -> Self {
        Self {
            registry,
            resolver,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Push the upstream target list for `worker` to the first broadcaster
    /// that accepts it.
    pub async fn dispatch(&self, worker: &WorkerDoc) -> Result<DispatchOutcome> {
        let broadcasters = self
            .registry
            .workers_by_personality(&[Personality::Broadcaster], VALID_ROUTE_STATUSES)
            .await?;

        if broadcasters.is_empty() {
            warn!(
                "No active broadcaster to announce route change for worker {}",
                worker.worker_id
            );
            return Ok(DispatchOutcome::NoBroadcasters);
        }

        let targets = self.resolver.resolve_broadcast_targets(worker).await?;
        if targets.is_empty() {
            warn!(
                "No upstream targets hold routes to worker {}, nothing to announce",
                worker.worker_id
            );
            return Ok(DispatchOutcome::NoTargets);
        }

        let payload = BroadcastPayload {
            broadcast: BroadcastMessage {
                kind: BroadcastType::Routes,
                targets,
            },
        };

        for broadcaster in &broadcasters {
            let url = format!(
                "http://{}:{}/v1/broadcast",
                broadcaster.ip_address_v4, self.config.port
            );

            let response = self
                .client
                .put(&url)
                .json(&payload)
                .timeout(Duration::from_secs(self.config.timeout_secs))
                .send()
                .await
                .map_err(|e| {
                    ForemanError::BroadcasterCommunication(format!("PUT {} failed: {}", url, e))
                })?;

            if response.status() == reqwest::StatusCode::OK {
                info!(
                    "ROUTES broadcast for worker {} accepted by {}",
                    worker.worker_id, broadcaster.ip_address_v4
                );
                return Ok(DispatchOutcome::Delivered);
            }

            warn!(
                "Broadcaster {} answered {} to ROUTES broadcast, trying next",
                broadcaster.ip_address_v4,
                response.status()
            );
        }

        Ok(DispatchOutcome::Exhausted)
    }
}
