//! Offer expiry background worker.
//!
//! Appliances wait for the coordinator's offer callback indefinitely unless
//! an offer timeout is configured. This worker periodically removes
//! appliances that are still unplaced after that timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::appliance::ApplianceManager;

/// Worker that expires appliances stuck awaiting an offer.
pub struct OfferExpiryWorker {
    manager: Arc<ApplianceManager>,
    timeout: Duration,
    interval: Duration,
}

impl OfferExpiryWorker {
    /// Create a new expiry worker.
    pub fn new(manager: Arc<ApplianceManager>, timeout: Duration, interval: Duration) -> Self {
        Self {
            manager,
            timeout,
            interval,
        }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting offer expiry worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Offer expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Offer expiry worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single sweep. Returns the number of expired appliances.
    pub async fn sweep(&self) -> Result<usize, crate::appliance::ApplianceError> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let expired = self.manager.expire_unplaced(cutoff).await?;
        if !expired.is_empty() {
            info!(expired = expired.len(), "Offer expiry sweep complete");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliance::{ApplianceRecord, Resources};
    use crate::cluster::ClusterRegistry;
    use crate::coordinator::CoordinatorClient;
    use crate::image::{ImageRecord, ImageRegistry};
    use crate::store::{MemoryStore, Registry};
    use requester_reconcile::ApplianceStatus;

    fn record(id: &str, age: chrono::Duration) -> ApplianceRecord {
        ApplianceRecord {
            id: id.to_string(),
            image: "busybox".to_string(),
            resources: Resources {
                cpus: 0.1,
                mem: 32.0,
                disk: 0.0,
            },
            data: serde_json::Value::Null,
            cmd: None,
            args: Vec::new(),
            env: Default::default(),
            status: ApplianceStatus::Submitted,
            cluster: None,
            submitted_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_sweep_expires_old_submissions() {
        let appliances = Arc::new(MemoryStore::<ApplianceRecord>::new());
        appliances
            .insert_if_absent(&record("old", chrono::Duration::minutes(10)))
            .await
            .unwrap();
        appliances
            .insert_if_absent(&record("fresh", chrono::Duration::zero()))
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let manager = Arc::new(ApplianceManager::new(
            appliances.clone(),
            ImageRegistry::new(Arc::new(MemoryStore::<ImageRecord>::new())),
            CoordinatorClient::new(client.clone(), "http://127.0.0.1:1", "requester"),
            ClusterRegistry::new(client),
            "http://requester",
        ));

        let worker =
            OfferExpiryWorker::new(manager, Duration::from_secs(60), Duration::from_secs(1));
        assert_eq!(worker.sweep().await.unwrap(), 1);
        assert!(appliances.find_by_id("old").await.unwrap().is_none());
        assert!(appliances.find_by_id("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let client = reqwest::Client::new();
        let manager = Arc::new(ApplianceManager::new(
            Arc::new(MemoryStore::<ApplianceRecord>::new()),
            ImageRegistry::new(Arc::new(MemoryStore::<ImageRecord>::new())),
            CoordinatorClient::new(client.clone(), "http://127.0.0.1:1", "requester"),
            ClusterRegistry::new(client),
            "http://requester",
        ));
        let worker =
            OfferExpiryWorker::new(manager, Duration::from_secs(60), Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
