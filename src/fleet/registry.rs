//! Worker registry
//!
//! Registration, lookup, and status transitions over worker documents.
//! Identity (worker_id, worker_token) is issued once per (hostname,
//! personality) slot and survives re-registration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::schemas::{Personality, WorkerDoc, WorkerRegistration, WorkerStatus};
use crate::fleet::store::WorkerStore;
use crate::types::{ForemanError, Result};

/// Identity handed back to a successfully paired worker
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PairingResponse {
    pub personality_module: String,
    pub worker_id: String,
    pub worker_token: String,
}

/// Registry over the worker store
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn WorkerStore>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn WorkerStore>) -> Self {
        Self { store }
    }

    /// Register a new worker or refresh an existing registration.
    /// The (hostname, personality) pair identifies the slot; a re-registration
    /// refreshes addresses and status but keeps the issued identity.
    pub async fn register(&self, registration: WorkerRegistration) -> Result<PairingResponse> {
        if let Some(existing) = self
            .store
            .find_by_host_personality(&registration.hostname, registration.personality)
            .await?
        {
            self.store
                .refresh_registration(&existing.worker_id, &registration)
                .await?;

            info!(
                "Refreshed registration for worker {} ({} on {})",
                existing.worker_id, existing.personality, existing.hostname
            );

            return Ok(PairingResponse {
                personality_module: existing.personality_module().to_string(),
                worker_id: existing.worker_id,
                worker_token: existing.worker_token,
            });
        }

        let worker = WorkerDoc::new(registration);
        let response = PairingResponse {
            personality_module: worker.personality_module().to_string(),
            worker_id: worker.worker_id.clone(),
            worker_token: worker.worker_token.clone(),
        };

        info!(
            "Registered new worker {} ({} on {})",
            worker.worker_id, worker.personality, worker.hostname
        );
        self.store.insert(worker).await?;

        Ok(response)
    }

    /// Fetch a worker by id
    pub async fn find_worker(&self, worker_id: &str) -> Result<WorkerDoc> {
        self.store
            .find_by_worker_id(worker_id)
            .await?
            .ok_or_else(|| ForemanError::NotFound(format!("worker {}", worker_id)))
    }

    /// Apply a status transition. Re-applying the current status is a no-op.
    pub async fn update_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<()> {
        let changed = self.store.set_status(worker_id, status).await?;

        if changed {
            info!("Worker {} status set to {}", worker_id, status.as_str());
        } else {
            debug!("Worker {} already {}", worker_id, status.as_str());
        }

        Ok(())
    }

    /// Workers matching any of the given personalities and statuses
    pub async fn workers_by_personality(
        &self,
        personalities: &[Personality],
        statuses: &[WorkerStatus],
    ) -> Result<Vec<WorkerDoc>> {
        self.store
            .find_by_personalities(personalities, statuses)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::SystemInfo;
    use crate::fleet::store::MemoryWorkerStore;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(MemoryWorkerStore::new()))
    }

    fn registration(hostname: &str, personality: Personality) -> WorkerRegistration {
        WorkerRegistration {
            hostname: hostname.to_string(),
            callback: format!("{}:8080/v1/callback", hostname),
            ip_address_v4: "192.0.2.10".to_string(),
            ip_address_v6: "::1".to_string(),
            personality,
            status: WorkerStatus::New,
            system_info: SystemInfo::default(),
        }
    }

    #[tokio::test]
    async fn register_issues_identity_and_module() {
        let registry = registry();
        let response = registry
            .register(registration("node-1", Personality::Correlation))
            .await
            .unwrap();

        assert_eq!(response.personality_module, "foreman.personas.correlation");

        let worker = registry.find_worker(&response.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::New);
        assert_eq!(worker.worker_token, response.worker_token);
    }

    #[tokio::test]
    async fn reregistration_keeps_identity_and_resets_state() {
        let registry = registry();
        let first = registry
            .register(registration("node-1", Personality::Storage))
            .await
            .unwrap();

        registry
            .update_worker_status(&first.worker_id, WorkerStatus::Online)
            .await
            .unwrap();

        let mut again = registration("node-1", Personality::Storage);
        again.ip_address_v4 = "192.0.2.99".to_string();
        let second = registry.register(again).await.unwrap();

        assert_eq!(first.worker_id, second.worker_id);
        assert_eq!(first.worker_token, second.worker_token);

        let worker = registry.find_worker(&first.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::New);
        assert_eq!(worker.ip_address_v4, "192.0.2.99");
    }

    #[tokio::test]
    async fn same_host_different_personality_is_a_new_slot() {
        let registry = registry();
        let a = registry
            .register(registration("node-1", Personality::Correlation))
            .await
            .unwrap();
        let b = registry
            .register(registration("node-1", Personality::Broadcaster))
            .await
            .unwrap();

        assert_ne!(a.worker_id, b.worker_id);
    }

    #[tokio::test]
    async fn find_worker_misses_are_not_found() {
        let registry = registry();
        let err = registry.find_worker("nope").await.unwrap_err();
        assert!(matches!(err, ForemanError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_updates_are_idempotent() {
        let registry = registry();
        let response = registry
            .register(registration("node-2", Personality::Normalization))
            .await
            .unwrap();

        registry
            .update_worker_status(&response.worker_id, WorkerStatus::Offline)
            .await
            .unwrap();
        registry
            .update_worker_status(&response.worker_id, WorkerStatus::Offline)
            .await
            .unwrap();

        let worker = registry.find_worker(&response.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
    }
}
