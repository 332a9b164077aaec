//! Pairing handshake with the coordinator
//!
//! Walks a worker through the handshake:
//!
//! 1. Register with the coordinator and receive worker_id / worker_token
//! 2. Fetch the personalized downstream route table
//! 3. Persist the paired identity to disk and nudge the data plane
//! 4. Publish the worker as online
//!
//! Registration and route fetches retry with doubling backoff; everything
//! after a persisted identity is best effort, since the worker can finish
//! coming up from the saved file alone.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::agent::system;
use crate::db::schemas::{Personality, WorkerRegistration, WorkerStatus};
use crate::fleet::{PairingResponse, Route};
use crate::types::{ForemanError, Result};

const CONFIG_FILE: &str = "worker.json";

/// Pairing lifecycle stage
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PairingStage {
    /// Nothing attempted yet
    Start,
    /// Registering with the coordinator
    Register,
    /// Fetching the personalized route table
    FetchRoutes,
    /// Persisting identity and nudging the data plane
    ApplyConfig,
    /// Paired and announced online
    Done,
    /// Gave up after exhausting retries
    Failed { error: String },
}

/// Paired identity persisted to disk for the data plane
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkerConfig {
    pub personality: Personality,
    pub personality_module: String,
    pub worker_id: String,
    pub worker_token: String,
    pub coordinator_uri: String,
}

/// Local agent settings, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Directory the paired identity is persisted under
    pub state_dir: PathBuf,
    /// Port the agent's own API listens on; used to build the callback
    pub callback_port: u16,
    /// Local worker process to nudge after a config change
    pub data_plane_url: Option<String>,
    pub pair_max_attempts: u32,
    pub pair_backoff_secs: u64,
}

/// Who to pair with, and as what
#[derive(Debug, Clone)]
pub struct PairingTarget {
    /// Coordinator API base, including the version segment
    pub coordinator_uri: String,
    pub api_secret: String,
    pub personality: Personality,
}

/// Drives the pairing handshake and tracks its stage
pub struct PairingAgent {
    target: PairingTarget,
    settings: AgentSettings,
    client: reqwest::Client,
    stage: Arc<RwLock<PairingStage>>,
}

impl PairingAgent {
    pub fn new(target: PairingTarget, settings: AgentSettings) -> Self {
        Self {
            target,
            settings,
            client: reqwest::Client::new(),
            stage: Arc::new(RwLock::new(PairingStage::Start)),
        }
    }

    /// Current lifecycle stage
    pub async fn stage(&self) -> PairingStage {
        self.stage.read().await.clone()
    }

    async fn set_stage(&self, stage: PairingStage) {
        *self.stage.write().await = stage;
    }

    /// Path of the persisted identity file
    pub fn config_path(&self) -> PathBuf {
        self.settings.state_dir.join(CONFIG_FILE)
    }

    /// Run the full handshake, returning the persisted identity
    pub async fn pair(&self) -> Result<WorkerConfig> {
        let registration = self.build_registration();
        info!(
            "Pairing {} worker {} with coordinator {}",
            registration.personality, registration.hostname, self.target.coordinator_uri
        );

        self.set_stage(PairingStage::Register).await;
        let pairing = match self
            .retry("Registration", || self.register(&registration))
            .await
        {
            Ok(p) => p,
            Err(e) => return self.fail(e).await,
        };

        let config = WorkerConfig {
            personality: self.target.personality,
            personality_module: pairing.personality_module,
            worker_id: pairing.worker_id,
            worker_token: pairing.worker_token,
            coordinator_uri: self.target.coordinator_uri.clone(),
        };

        self.set_stage(PairingStage::FetchRoutes).await;
        let routes = match self
            .retry("Route fetch", || {
                fetch_worker_routes(&self.client, &config.coordinator_uri, &config.worker_id)
            })
            .await
        {
            Ok(r) => r,
            Err(e) => return self.fail(e).await,
        };
        info!("Received {} route group(s) from coordinator", routes.len());

        self.set_stage(PairingStage::ApplyConfig).await;
        if let Err(e) = self.persist(&config) {
            return self.fail(e).await;
        }

        if let Err(e) = self.notify_data_plane(&config).await {
            warn!("Data plane reload failed, worker will pick up config on restart: {}", e);
        }

        if let Err(e) = self.publish_status(&config, WorkerStatus::Online).await {
            warn!("Could not publish online status: {}", e);
        }

        self.set_stage(PairingStage::Done).await;
        info!(
            "Paired as worker {} ({})",
            config.worker_id, config.personality
        );
        Ok(config)
    }

    /// Load a previously persisted identity, if any
    pub fn load_saved(&self) -> Option<WorkerConfig> {
        load_saved_config(&self.settings.state_dir)
    }

    fn build_registration(&self) -> WorkerRegistration {
        let ip_v4 = system::lan_ip_v4();
        WorkerRegistration {
            hostname: system::local_hostname(),
            callback: format!("{}:{}/v1/callback", ip_v4, self.settings.callback_port),
            ip_address_v4: ip_v4,
            ip_address_v6: String::new(),
            personality: self.target.personality,
            status: WorkerStatus::New,
            system_info: system::snapshot(),
        }
    }

    async fn register(&self, registration: &WorkerRegistration) -> Result<PairingResponse> {
        let url = format!(
            "{}/pairing",
            self.target.coordinator_uri.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("X-AUTH-TOKEN", &self.target.api_secret)
            .json(&serde_json::json!({ "worker_registration": registration }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ForemanError::Pairing(format!("coordinator unreachable: {e}")))?;

        if response.status() != reqwest::StatusCode::ACCEPTED {
            return Err(ForemanError::Pairing(format!(
                "registration rejected: HTTP {}",
                response.status()
            )));
        }

        response
            .json::<PairingResponse>()
            .await
            .map_err(|e| ForemanError::Pairing(format!("invalid pairing response: {e}")))
    }

    /// Write the identity atomically so the data plane never reads a torn file
    fn persist(&self, config: &WorkerConfig) -> Result<()> {
        std::fs::create_dir_all(&self.settings.state_dir)?;

        let body = serde_json::to_string_pretty(config)
            .map_err(|e| ForemanError::Pairing(format!("could not serialize identity: {e}")))?;

        let staging = self.settings.state_dir.join(format!("{CONFIG_FILE}.tmp"));
        std::fs::write(&staging, body)?;
        std::fs::rename(&staging, self.config_path())?;
        Ok(())
    }

    async fn notify_data_plane(&self, config: &WorkerConfig) -> Result<()> {
        let Some(url) = &self.settings.data_plane_url else {
            return Ok(());
        };

        let response = self
            .client
            .put(format!("{}/v1/configuration", url.trim_end_matches('/')))
            .json(config)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ForemanError::Pairing(format!("data plane unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ForemanError::Pairing(format!(
                "data plane refused new configuration: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn publish_status(&self, config: &WorkerConfig, status: WorkerStatus) -> Result<()> {
        let url = format!(
            "{}/worker/{}/status",
            config.coordinator_uri.trim_end_matches('/'),
            config.worker_id
        );
        let response = self
            .client
            .put(&url)
            .header("X-AUTH-TOKEN", &config.worker_token)
            .json(&serde_json::json!({ "worker_status": status }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ForemanError::Pairing(format!("coordinator unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ForemanError::Pairing(format!(
                "status update rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn retry<T, Fut>(&self, what: &str, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(self.settings.pair_backoff_secs);
        let mut last_err: Option<ForemanError> = None;

        for attempt in 1..=self.settings.pair_max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        what, attempt, self.settings.pair_max_attempts, e
                    );
                    last_err = Some(e);
                    if attempt < self.settings.pair_max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ForemanError::Pairing(format!("{what} failed"))))
    }

    async fn fail(&self, err: ForemanError) -> Result<WorkerConfig> {
        error!("Pairing failed: {}", err);
        self.set_stage(PairingStage::Failed {
            error: err.to_string(),
        })
        .await;
        Err(err)
    }
}

/// Load the persisted identity from a state directory, if any
pub fn load_saved_config(state_dir: &std::path::Path) -> Option<WorkerConfig> {
    let raw = std::fs::read_to_string(state_dir.join(CONFIG_FILE)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Fetch the personalized route table for a paired worker
///
/// Shared by the handshake and the coordinator-triggered callback refresh.
pub async fn fetch_worker_routes(
    client: &reqwest::Client,
    coordinator_uri: &str,
    worker_id: &str,
) -> Result<Vec<Route>> {
    #[derive(Deserialize)]
    struct RoutesEnvelope {
        routes: Vec<Route>,
    }

    let url = format!(
        "{}/worker/{}/routes",
        coordinator_uri.trim_end_matches('/'),
        worker_id
    );
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ForemanError::Pairing(format!("coordinator unreachable: {e}")))?;

    if !response.status().is_success() {
        return Err(ForemanError::Pairing(format!(
            "route fetch rejected: HTTP {}",
            response.status()
        )));
    }

    response
        .json::<RoutesEnvelope>()
        .await
        .map(|envelope| envelope.routes)
        .map_err(|e| ForemanError::Pairing(format!("invalid route response: {e}")))
}
