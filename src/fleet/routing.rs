//! Route resolution
//!
//! Walks the personality topology forwards to build the route table a worker
//! consumes, and backwards to find the workers whose tables go stale when a
//! worker changes.

use serde::{Deserialize, Serialize};

use crate::db::schemas::{Personality, RouteTarget, WorkerDoc};
use crate::fleet::registry::WorkerRegistry;
use crate::fleet::topology::{downstream_of, upstream_of, VALID_ROUTE_STATUSES};
use crate::types::Result;

/// One downstream group in a worker's route table
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Route {
    pub service_domain: Personality,
    pub targets: Vec<RouteTarget>,
}

/// Resolves route tables from the topology and the worker registry
#[derive(Clone)]
pub struct RouteResolver {
    registry: WorkerRegistry,
}

impl RouteResolver {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Route table for a worker: one group per downstream personality,
    /// downstream first, alternate second. Groups with no active workers
    /// stay in the table with an empty target list.
    pub async fn resolve_routes(&self, worker: &WorkerDoc) -> Result<Vec<Route>> {
        let mut routes = Vec::new();

        for personality in downstream_of(worker.personality) {
            let members = self
                .registry
                .workers_by_personality(&[personality], VALID_ROUTE_STATUSES)
                .await?;

            routes.push(Route {
                service_domain: personality,
                targets: members.iter().map(WorkerDoc::route_info).collect(),
            });
        }

        Ok(routes)
    }

    /// IPv4 addresses of the active workers routing to this worker. These
    /// are the addresses a broadcaster pushes refreshed routes to.
    pub async fn resolve_broadcast_targets(&self, worker: &WorkerDoc) -> Result<Vec<String>> {
        let upstreams = upstream_of(worker.personality);
        if upstreams.is_empty() {
            return Ok(Vec::new());
        }

        let members = self
            .registry
            .workers_by_personality(&upstreams, VALID_ROUTE_STATUSES)
            .await?;

        Ok(members.into_iter().map(|w| w.ip_address_v4).collect())
    }
}
