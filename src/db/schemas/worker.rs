//! Worker document schema
//!
//! Stores one document per registered fleet node, including its personality,
//! liveness status, and the host snapshot captured at registration time.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::ForemanError;

/// Collection name for workers
pub const WORKER_COLLECTION: &str = "workers";

/// Pipeline role a worker fulfils. Closed set; unknown values are rejected
/// at the parsing boundary.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    /// Pipeline head that correlates incoming events
    #[default]
    Correlation,
    /// Pipeline head that normalizes raw event payloads
    Normalization,
    /// Sink that persists processed events
    Storage,
    /// Pushes route updates into the pipeline heads
    Broadcaster,
    /// Bootstrap endpoint for unpaired nodes
    Pairing,
}

impl Personality {
    /// Lowercase wire/storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::Correlation => "correlation",
            Personality::Normalization => "normalization",
            Personality::Storage => "storage",
            Personality::Broadcaster => "broadcaster",
            Personality::Pairing => "pairing",
        }
    }

    /// Module the paired worker should load for this personality
    pub fn module_path(&self) -> &'static str {
        match self {
            Personality::Correlation => "foreman.personas.correlation",
            Personality::Normalization => "foreman.personas.normalization",
            Personality::Storage => "foreman.personas.storage",
            Personality::Broadcaster => "foreman.personas.broadcaster",
            Personality::Pairing => "foreman.personas.pairing",
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Personality {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correlation" => Ok(Personality::Correlation),
            "normalization" => Ok(Personality::Normalization),
            "storage" => Ok(Personality::Storage),
            "broadcaster" => Ok(Personality::Broadcaster),
            "pairing" => Ok(Personality::Pairing),
            other => Err(ForemanError::MalformedInput(format!(
                "unknown personality '{}'",
                other
            ))),
        }
    }
}

/// Worker liveness status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered but not yet confirmed online
    #[default]
    New,
    /// Worker has published itself as up
    Online,
    /// Marked unresponsive by the watchlist monitor
    Offline,
}

impl WorkerStatus {
    /// Lowercase wire/storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::New => "new",
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
        }
    }
}

/// 1/5/15-minute load averages
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Per-filesystem usage snapshot
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DiskUsage {
    /// Mount point or device name
    pub name: String,
    pub total_gb: f64,
    pub used_gb: f64,
}

/// Host snapshot captured by the agent at registration time
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SystemInfo {
    pub cpu_cores: i32,
    pub os_type: String,
    pub memory_mb: i64,
    pub architecture: String,
    #[serde(default)]
    pub load_average: LoadAverage,
    #[serde(default)]
    pub disk_usage: Vec<DiskUsage>,
}

/// Registration body a pairing agent submits to the coordinator
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkerRegistration {
    pub hostname: String,
    /// Callback address the coordinator can reach the worker on
    pub callback: String,
    pub ip_address_v4: String,
    pub ip_address_v6: String,
    pub personality: Personality,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default)]
    pub system_info: SystemInfo,
}

/// Route-table projection of a worker, as handed to its upstreams
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RouteTarget {
    pub worker_id: String,
    pub ip_address_v4: String,
    pub ip_address_v6: String,
    pub status: WorkerStatus,
}

/// Worker document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkerDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable worker identity (UUID), issued once at first registration
    pub worker_id: String,

    /// Shared secret for worker-originated status updates (UUID)
    pub worker_token: String,

    pub hostname: String,

    /// Callback address the coordinator can reach the worker on
    pub callback: String,

    pub ip_address_v4: String,

    pub ip_address_v6: String,

    pub personality: Personality,

    #[serde(default)]
    pub status: WorkerStatus,

    /// Host snapshot from the most recent registration
    #[serde(default)]
    pub system_info: SystemInfo,
}

impl WorkerDoc {
    /// Create a new worker document from a registration, issuing identity
    pub fn new(registration: WorkerRegistration) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            worker_id: Uuid::new_v4().to_string(),
            worker_token: Uuid::new_v4().to_string(),
            hostname: registration.hostname,
            callback: registration.callback,
            ip_address_v4: registration.ip_address_v4,
            ip_address_v6: registration.ip_address_v6,
            personality: registration.personality,
            status: registration.status,
            system_info: registration.system_info,
        }
    }

    /// Projection handed out in route tables
    pub fn route_info(&self) -> RouteTarget {
        RouteTarget {
            worker_id: self.worker_id.clone(),
            ip_address_v4: self.ip_address_v4.clone(),
            ip_address_v6: self.ip_address_v6.clone(),
            status: self.status,
        }
    }

    /// Module the paired worker should load
    pub fn personality_module(&self) -> &'static str {
        self.personality.module_path()
    }
}

impl IntoIndexes for WorkerDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on worker_id
            (
                doc! { "worker_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("worker_id_unique".to_string())
                        .build(),
                ),
            ),
            // One document per (hostname, personality); re-registration upserts
            (
                doc! { "hostname": 1, "personality": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("hostname_personality_unique".to_string())
                        .build(),
                ),
            ),
            // Route resolution and broadcaster lookup hot path
            (
                doc! { "personality": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("personality_status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for WorkerDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
