//! Watchlist monitor
//!
//! Converts repeated liveness-check failures into an offline transition and
//! a route broadcast. One entry per worker accumulates failure reports;
//! entries untouched for longer than the tolerance window are swept before
//! each report is processed, so a recovered worker starts from a clean
//! count the next time it fails.

use std::sync::Arc;

use bson::DateTime;
use tracing::{debug, error, warn};

use crate::db::schemas::{WatchlistDoc, WorkerStatus};
use crate::fleet::broadcast::BroadcastDispatcher;
use crate::fleet::registry::WorkerRegistry;
use crate::fleet::store::WatchlistStore;
use crate::types::Result;

/// Monitor tuning
#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    /// Seconds an entry may sit unchanged before the sweep drops it
    pub failure_tolerance_seconds: i64,
    /// Failure-report count at which the worker is marked offline
    pub watchlist_count_threshold: i32,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            failure_tolerance_seconds: 60,
            watchlist_count_threshold: 5,
        }
    }
}

/// Failure-detection state machine over the watchlist store
pub struct WatchlistMonitor {
    store: Arc<dyn WatchlistStore>,
    registry: WorkerRegistry,
    dispatcher: BroadcastDispatcher,
    config: WatchlistConfig,
}

impl WatchlistMonitor {
    pub fn new(
        store: Arc<dyn WatchlistStore>,
        registry: WorkerRegistry,
        dispatcher: BroadcastDispatcher,
        config: WatchlistConfig,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            config,
        }
    }

    /// Handle one liveness-failure report for a worker.
    ///
    /// The Nth consecutive report carries an effective count of N; the
    /// report that lands exactly on the threshold takes the worker offline
    /// and announces the route change. The check is equality, so an entry
    /// already past the threshold never re-fires.
    pub async fn process_watchlist_item(&self, worker_id: &str) -> Result<()> {
        self.expire_stale_entries().await?;

        match self.store.find(worker_id).await? {
            None => {
                self.store
                    .insert(WatchlistDoc::new(worker_id.to_string()))
                    .await?;
                debug!("Worker {} entered the watchlist", worker_id);
            }
            Some(entry) => {
                let next_count = entry.watch_count + 1;

                if next_count == self.config.watchlist_count_threshold {
                    self.mark_offline_and_announce(worker_id).await?;
                }

                self.store.bump(worker_id, next_count).await?;
            }
        }

        Ok(())
    }

    /// Drop entries whose last report falls outside the tolerance window
    async fn expire_stale_entries(&self) -> Result<()> {
        let cutoff = DateTime::from_millis(
            chrono::Utc::now().timestamp_millis() - self.config.failure_tolerance_seconds * 1000,
        );

        let removed = self.store.delete_older_than(cutoff).await?;
        if removed > 0 {
            debug!("Expired {} stale watchlist entries", removed);
        }

        Ok(())
    }

    /// Threshold hit: take the worker offline and announce the route change.
    /// Skipped entirely when the worker is already offline. Dispatch failures
    /// of any kind are absorbed after logging so the watchlist bookkeeping
    /// always completes.
    async fn mark_offline_and_announce(&self, worker_id: &str) -> Result<()> {
        let worker = self.registry.find_worker(worker_id).await?;
        if worker.status == WorkerStatus::Offline {
            debug!("Worker {} already offline, skipping transition", worker_id);
            return Ok(());
        }

        self.registry
            .update_worker_status(worker_id, WorkerStatus::Offline)
            .await?;
        warn!(
            "Worker {} unresponsive past threshold, marked offline",
            worker_id
        );

        match self.dispatcher.dispatch(&worker).await {
            Ok(outcome) if outcome.delivered() => {}
            Ok(outcome) => {
                warn!(
                    "Route change for worker {} not delivered: {:?}",
                    worker_id, outcome
                );
            }
            Err(e) => {
                error!("Route change broadcast for worker {} failed: {}", worker_id, e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use tokio::sync::Mutex;

    use crate::db::schemas::{Personality, SystemInfo, WorkerRegistration};
    use crate::fleet::broadcast::BroadcastConfig;
    use crate::fleet::routing::RouteResolver;
    use crate::fleet::store::{MemoryWatchlistStore, MemoryWorkerStore};

    struct Fixture {
        monitor: WatchlistMonitor,
        registry: WorkerRegistry,
        watchlist: Arc<MemoryWatchlistStore>,
    }

    fn fixture(port: u16, config: WatchlistConfig) -> Fixture {
        let workers = Arc::new(MemoryWorkerStore::new());
        let watchlist = Arc::new(MemoryWatchlistStore::new());
        let registry = WorkerRegistry::new(workers);
        let resolver = RouteResolver::new(registry.clone());
        let dispatcher = BroadcastDispatcher::new(
            registry.clone(),
            resolver,
            BroadcastConfig {
                port,
                timeout_secs: 2,
            },
        );
        let monitor = WatchlistMonitor::new(watchlist.clone(), registry.clone(), dispatcher, config);

        Fixture {
            monitor,
            registry,
            watchlist,
        }
    }

    fn registration(hostname: &str, personality: Personality, ip: &str) -> WorkerRegistration {
        WorkerRegistration {
            hostname: hostname.to_string(),
            callback: format!("{}:8080/v1/callback", ip),
            ip_address_v4: ip.to_string(),
            ip_address_v6: "::1".to_string(),
            personality,
            status: WorkerStatus::New,
            system_info: SystemInfo::default(),
        }
    }

    /// Loopback broadcaster stub that answers 200 and records request bodies
    async fn spawn_broadcaster_stub() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let bodies_outer = bodies.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                let bodies = bodies_outer.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let bodies = bodies.clone();
                        async move {
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            bodies
                                .lock()
                                .await
                                .push(String::from_utf8_lossy(&body).to_string());
                            Ok::<_, std::convert::Infallible>(
                                Response::new(Full::new(Bytes::new())),
                            )
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        (port, bodies)
    }

    #[tokio::test]
    async fn fifth_report_fires_once_and_sixth_does_not_retrigger() {
        let (port, bodies) = spawn_broadcaster_stub().await;
        let fx = fixture(port, WatchlistConfig::default());

        let broadcaster = fx
            .registry
            .register(registration("br-1", Personality::Broadcaster, "127.0.0.1"))
            .await
            .unwrap();
        fx.registry
            .update_worker_status(&broadcaster.worker_id, WorkerStatus::Online)
            .await
            .unwrap();
        let victim = fx
            .registry
            .register(registration("co-1", Personality::Correlation, "10.0.0.3"))
            .await
            .unwrap();

        for _ in 0..4 {
            fx.monitor
                .process_watchlist_item(&victim.worker_id)
                .await
                .unwrap();
        }

        let worker = fx.registry.find_worker(&victim.worker_id).await.unwrap();
        assert_ne!(worker.status, WorkerStatus::Offline);
        assert!(bodies.lock().await.is_empty());

        // Fifth report crosses the threshold
        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();

        let worker = fx.registry.find_worker(&victim.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        assert_eq!(bodies.lock().await.len(), 1);
        let entry = fx.watchlist.find(&victim.worker_id).await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 5);

        // Sixth report is past the threshold and must not fire again
        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();

        assert_eq!(bodies.lock().await.len(), 1);
        let entry = fx.watchlist.find(&victim.worker_id).await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 6);
    }

    #[tokio::test]
    async fn expired_entry_is_swept_and_count_restarts() {
        let fx = fixture(1, WatchlistConfig::default());

        let mut stale = WatchlistDoc::new("worker-x".to_string());
        stale.watch_count = 4;
        stale.last_changed =
            DateTime::from_millis(chrono::Utc::now().timestamp_millis() - 120_000);
        fx.watchlist.insert(stale).await.unwrap();

        fx.monitor.process_watchlist_item("worker-x").await.unwrap();

        let entry = fx.watchlist.find("worker-x").await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 1);
    }

    #[tokio::test]
    async fn already_offline_worker_is_not_retransitioned_or_rebroadcast() {
        let (port, bodies) = spawn_broadcaster_stub().await;
        let fx = fixture(port, WatchlistConfig::default());

        let broadcaster = fx
            .registry
            .register(registration("br-1", Personality::Broadcaster, "127.0.0.1"))
            .await
            .unwrap();
        fx.registry
            .update_worker_status(&broadcaster.worker_id, WorkerStatus::Online)
            .await
            .unwrap();
        let victim = fx
            .registry
            .register(registration("co-1", Personality::Correlation, "10.0.0.3"))
            .await
            .unwrap();
        fx.registry
            .update_worker_status(&victim.worker_id, WorkerStatus::Offline)
            .await
            .unwrap();

        let mut entry = WatchlistDoc::new(victim.worker_id.clone());
        entry.watch_count = 4;
        fx.watchlist.insert(entry).await.unwrap();

        // Threshold report against an already-offline worker
        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();

        assert!(bodies.lock().await.is_empty());
        let entry = fx.watchlist.find(&victim.worker_id).await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 5);
    }

    #[tokio::test]
    async fn dispatch_conditions_never_fail_the_report() {
        // No broadcaster registered at all; threshold of 2 fires on the
        // second report and the NoBroadcasters outcome is absorbed
        let fx = fixture(
            1,
            WatchlistConfig {
                failure_tolerance_seconds: 60,
                watchlist_count_threshold: 2,
            },
        );

        let victim = fx
            .registry
            .register(registration("co-1", Personality::Correlation, "10.0.0.3"))
            .await
            .unwrap();

        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();
        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();

        let worker = fx.registry.find_worker(&victim.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        let entry = fx.watchlist.find(&victim.worker_id).await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 2);
    }

    #[tokio::test]
    async fn transport_failure_is_absorbed_and_bookkeeping_completes() {
        let fx = fixture(
            9,
            WatchlistConfig {
                failure_tolerance_seconds: 60,
                watchlist_count_threshold: 2,
            },
        );

        // Broadcaster address refuses connections outright
        let broadcaster = fx
            .registry
            .register(registration("br-1", Personality::Broadcaster, "127.1.1.1"))
            .await
            .unwrap();
        fx.registry
            .update_worker_status(&broadcaster.worker_id, WorkerStatus::Online)
            .await
            .unwrap();
        let victim = fx
            .registry
            .register(registration("co-1", Personality::Correlation, "10.0.0.3"))
            .await
            .unwrap();

        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();
        fx.monitor
            .process_watchlist_item(&victim.worker_id)
            .await
            .unwrap();

        let worker = fx.registry.find_worker(&victim.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        let entry = fx.watchlist.find(&victim.worker_id).await.unwrap().unwrap();
        assert_eq!(entry.watch_count, 2);
    }

    #[tokio::test]
    async fn end_to_end_offline_broadcast_lists_upstream_addresses() {
        let (port, bodies) = spawn_broadcaster_stub().await;
        let fx = fixture(port, WatchlistConfig::default());

        let broadcaster = fx
            .registry
            .register(registration("br-1", Personality::Broadcaster, "127.0.0.1"))
            .await
            .unwrap();
        fx.registry
            .update_worker_status(&broadcaster.worker_id, WorkerStatus::Online)
            .await
            .unwrap();
        let victim = fx
            .registry
            .register(registration("co-1", Personality::Correlation, "10.0.0.3"))
            .await
            .unwrap();

        for _ in 0..5 {
            fx.monitor
                .process_watchlist_item(&victim.worker_id)
                .await
                .unwrap();
        }

        let worker = fx.registry.find_worker(&victim.worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);

        // The payload names the upstream-of-correlation addresses, which in
        // this topology is the broadcaster itself
        let bodies = bodies.lock().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("\"ROUTES\""));
        assert!(bodies[0].contains("127.0.0.1"));
    }
}
