//! Store seams for workers and the failure watchlist
//!
//! Coordinator components speak to storage through these traits so the same
//! logic runs against MongoDB in production and an in-memory store in dev
//! mode and tests.

use std::collections::HashMap;

use bson::{doc, DateTime};
use tokio::sync::RwLock;

use crate::db::schemas::{
    Personality, WatchlistDoc, WorkerDoc, WorkerRegistration, WorkerStatus, WATCHLIST_COLLECTION,
    WORKER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::ForemanError;

/// Worker document store
#[async_trait::async_trait]
pub trait WorkerStore: Send + Sync {
    /// Look up a worker by its issued id
    async fn find_by_worker_id(&self, worker_id: &str)
        -> Result<Option<WorkerDoc>, ForemanError>;

    /// Look up the registration slot for a (hostname, personality) pair
    async fn find_by_host_personality(
        &self,
        hostname: &str,
        personality: Personality,
    ) -> Result<Option<WorkerDoc>, ForemanError>;

    /// Insert a freshly registered worker
    async fn insert(&self, worker: WorkerDoc) -> Result<(), ForemanError>;

    /// Refresh the mutable registration fields of an existing worker
    async fn refresh_registration(
        &self,
        worker_id: &str,
        registration: &WorkerRegistration,
    ) -> Result<(), ForemanError>;

    /// Set worker status; returns false when nothing changed
    async fn set_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<bool, ForemanError>;

    /// Workers matching any of the given personalities and statuses
    async fn find_by_personalities(
        &self,
        personalities: &[Personality],
        statuses: &[WorkerStatus],
    ) -> Result<Vec<WorkerDoc>, ForemanError>;
}

/// Watchlist entry store
#[async_trait::async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Drop every entry with last_changed older than the cutoff; returns the
    /// number removed
    async fn delete_older_than(&self, cutoff: DateTime) -> Result<u64, ForemanError>;

    /// Entry for a worker, if any
    async fn find(&self, worker_id: &str) -> Result<Option<WatchlistDoc>, ForemanError>;

    /// Insert a fresh entry
    async fn insert(&self, entry: WatchlistDoc) -> Result<(), ForemanError>;

    /// Record another failure report: new count plus a fresh last_changed
    async fn bump(&self, worker_id: &str, watch_count: i32) -> Result<(), ForemanError>;
}

// =============================================================================
// MongoDB-backed stores
// =============================================================================

/// Worker store backed by MongoDB
pub struct MongoWorkerStore {
    collection: MongoCollection<WorkerDoc>,
}

impl MongoWorkerStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self, ForemanError> {
        let collection = mongo.collection::<WorkerDoc>(WORKER_COLLECTION).await?;
        Ok(Self { collection })
    }
}

#[async_trait::async_trait]
impl WorkerStore for MongoWorkerStore {
    async fn find_by_worker_id(
        &self,
        worker_id: &str,
    ) -> Result<Option<WorkerDoc>, ForemanError> {
        self.collection.find_one(doc! { "worker_id": worker_id }).await
    }

    async fn find_by_host_personality(
        &self,
        hostname: &str,
        personality: Personality,
    ) -> Result<Option<WorkerDoc>, ForemanError> {
        self.collection
            .find_one(doc! { "hostname": hostname, "personality": personality.as_str() })
            .await
    }

    async fn insert(&self, worker: WorkerDoc) -> Result<(), ForemanError> {
        self.collection.insert_one(worker).await?;
        Ok(())
    }

    async fn refresh_registration(
        &self,
        worker_id: &str,
        registration: &WorkerRegistration,
    ) -> Result<(), ForemanError> {
        let system_info = bson::to_bson(&registration.system_info)
            .map_err(|e| ForemanError::Storage(format!("Failed to encode system info: {}", e)))?;

        self.collection
            .update_one(
                doc! { "worker_id": worker_id },
                doc! {
                    "$set": {
                        "callback": &registration.callback,
                        "ip_address_v4": &registration.ip_address_v4,
                        "ip_address_v6": &registration.ip_address_v6,
                        "status": registration.status.as_str(),
                        "system_info": system_info,
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;

        Ok(())
    }

    async fn set_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<bool, ForemanError> {
        let result = self
            .collection
            .update_one(
                doc! { "worker_id": worker_id },
                doc! {
                    "$set": {
                        "status": status.as_str(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;

        Ok(result.modified_count > 0)
    }

    async fn find_by_personalities(
        &self,
        personalities: &[Personality],
        statuses: &[WorkerStatus],
    ) -> Result<Vec<WorkerDoc>, ForemanError> {
        let personalities: Vec<&str> = personalities.iter().map(|p| p.as_str()).collect();
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        self.collection
            .find_many(doc! {
                "personality": { "$in": personalities },
                "status": { "$in": statuses },
            })
            .await
    }
}

/// Watchlist store backed by MongoDB
pub struct MongoWatchlistStore {
    collection: MongoCollection<WatchlistDoc>,
}

impl MongoWatchlistStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self, ForemanError> {
        let collection = mongo.collection::<WatchlistDoc>(WATCHLIST_COLLECTION).await?;
        Ok(Self { collection })
    }
}

#[async_trait::async_trait]
impl WatchlistStore for MongoWatchlistStore {
    async fn delete_older_than(&self, cutoff: DateTime) -> Result<u64, ForemanError> {
        self.collection
            .delete_many(doc! { "last_changed": { "$lt": cutoff } })
            .await
    }

    async fn find(&self, worker_id: &str) -> Result<Option<WatchlistDoc>, ForemanError> {
        self.collection.find_one(doc! { "worker_id": worker_id }).await
    }

    async fn insert(&self, entry: WatchlistDoc) -> Result<(), ForemanError> {
        self.collection.insert_one(entry).await?;
        Ok(())
    }

    async fn bump(&self, worker_id: &str, watch_count: i32) -> Result<(), ForemanError> {
        self.collection
            .update_one(
                doc! { "worker_id": worker_id },
                doc! {
                    "$set": {
                        "watch_count": watch_count,
                        "last_changed": DateTime::now(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;

        Ok(())
    }
}

// =============================================================================
// In-memory stores (dev mode and tests)
// =============================================================================

/// Worker store held in memory. Iteration order is registration order, which
/// keeps broadcaster fallback deterministic.
#[derive(Default)]
pub struct MemoryWorkerStore {
    workers: RwLock<Vec<WorkerDoc>>,
}

impl MemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn find_by_worker_id(
        &self,
        worker_id: &str,
    ) -> Result<Option<WorkerDoc>, ForemanError> {
        let workers = self.workers.read().await;
        Ok(workers.iter().find(|w| w.worker_id == worker_id).cloned())
    }

    async fn find_by_host_personality(
        &self,
        hostname: &str,
        personality: Personality,
    ) -> Result<Option<WorkerDoc>, ForemanError> {
        let workers = self.workers.read().await;
        Ok(workers
            .iter()
            .find(|w| w.hostname == hostname && w.personality == personality)
            .cloned())
    }

    async fn insert(&self, worker: WorkerDoc) -> Result<(), ForemanError> {
        let mut workers = self.workers.write().await;
        workers.push(worker);
        Ok(())
    }

    async fn refresh_registration(
        &self,
        worker_id: &str,
        registration: &WorkerRegistration,
    ) -> Result<(), ForemanError> {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.iter_mut().find(|w| w.worker_id == worker_id) {
            worker.callback = registration.callback.clone();
            worker.ip_address_v4 = registration.ip_address_v4.clone();
            worker.ip_address_v6 = registration.ip_address_v6.clone();
            worker.status = registration.status;
            worker.system_info = registration.system_info.clone();
            worker.metadata.touch();
        }
        Ok(())
    }

    async fn set_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<bool, ForemanError> {
        let mut workers = self.workers.write().await;
        match workers.iter_mut().find(|w| w.worker_id == worker_id) {
            Some(worker) if worker.status != status => {
                worker.status = status;
                worker.metadata.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_personalities(
        &self,
        personalities: &[Personality],
        statuses: &[WorkerStatus],
    ) -> Result<Vec<WorkerDoc>, ForemanError> {
        let workers = self.workers.read().await;
        Ok(workers
            .iter()
            .filter(|w| personalities.contains(&w.personality) && statuses.contains(&w.status))
            .cloned()
            .collect())
    }
}

/// Watchlist store held in memory
#[derive(Default)]
pub struct MemoryWatchlistStore {
    entries: RwLock<HashMap<String, WatchlistDoc>>,
}

impl MemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WatchlistStore for MemoryWatchlistStore {
    async fn delete_older_than(&self, cutoff: DateTime) -> Result<u64, ForemanError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.last_changed >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn find(&self, worker_id: &str) -> Result<Option<WatchlistDoc>, ForemanError> {
        let entries = self.entries.read().await;
        Ok(entries.get(worker_id).cloned())
    }

    async fn insert(&self, entry: WatchlistDoc) -> Result<(), ForemanError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.worker_id.clone(), entry);
        Ok(())
    }

    async fn bump(&self, worker_id: &str, watch_count: i32) -> Result<(), ForemanError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(worker_id) {
            entry.watch_count = watch_count;
            entry.last_changed = DateTime::now();
            entry.metadata.touch();
        }
        Ok(())
    }
}
