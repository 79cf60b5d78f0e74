//! Appliance lifecycle manager.
//!
//! The manager is responsible for:
//! - Validating and persisting submissions, then asking the coordinator for offers
//! - Accepting an offer: placing the appliance and recording the cluster binding
//! - Reconciling live task state into the appliance view on every read
//! - Deleting appliances, best effort on the backend side
//!
//! It holds no per-request state. Binding and deletion race on the same record;
//! the binding is committed with a compare-and-set and a lost race removes the
//! app that was just created.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use requester_reconcile::{derive_access_points, status_from_task_state};
use reqwest::StatusCode;
use tracing::{debug, error, info, instrument, warn};

use super::{
    ApplianceError, ApplianceRecord, ApplianceResult, ApplianceView, SubmitAppliance,
};
use crate::cluster::{ClusterAdapter, ClusterRegistry};
use crate::coordinator::CoordinatorClient;
use crate::image::{ImageError, ImageRecord, ImageRegistry};
use crate::offers::OfferSet;
use crate::store::{ApplianceStore, BindOutcome, StoreResult};

/// Whether `id` can be used as an appliance id.
///
/// Ids appear in callback paths and backend app paths.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Orchestrates appliance submission, placement, observation and deletion.
pub struct ApplianceManager {
    appliances: Arc<dyn ApplianceStore>,
    images: ImageRegistry,
    coordinator: CoordinatorClient,
    clusters: ClusterRegistry,
    public_url: String,
}

impl ApplianceManager {
    pub fn new(
        appliances: Arc<dyn ApplianceStore>,
        images: ImageRegistry,
        coordinator: CoordinatorClient,
        clusters: ClusterRegistry,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            appliances,
            images,
            coordinator,
            clusters,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Address the coordinator posts offers for `id` to.
    pub fn callback_url(&self, id: &str) -> String {
        format!("{}/appliance/{}/offer", self.public_url, id)
    }

    /// All stored appliances, without live enrichment.
    pub async fn list(&self) -> ApplianceResult<Vec<ApplianceRecord>> {
        Ok(self.appliances.list_all().await?)
    }

    /// Check the appliance store is reachable.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.appliances.health_check().await
    }

    /// Coordinator endpoint offers are requested from.
    pub fn coordinator_url(&self) -> &str {
        self.coordinator.url()
    }

    /// Submit a new appliance and request offers for it.
    #[instrument(skip(self, req), fields(appliance_id = %req.id, image = %req.image))]
    pub async fn create(&self, req: SubmitAppliance) -> ApplianceResult<ApplianceView> {
        validate_submission(&req)?;

        if self.appliances.find_by_id(&req.id).await?.is_some() {
            return Err(ApplianceError::Conflict(req.id));
        }

        let image = self.resolve_image(&req.image).await?;
        let record = ApplianceRecord::from_submission(req, &image, Utc::now());

        if !self.appliances.insert_if_absent(&record).await? {
            return Err(ApplianceError::Conflict(record.id));
        }

        let callback_url = self.callback_url(&record.id);
        let outcome = self
            .coordinator
            .request_offers(&record.id, &record.resources, &record.image, &callback_url)
            .await;

        match outcome {
            Ok(response) if response.is_success() => {
                info!(callback_url = %callback_url, "Appliance submitted, awaiting offers");
                Ok(record.into())
            }
            Ok(response) => {
                self.rollback(&record.id).await;
                Err(ApplianceError::Upstream(response))
            }
            Err(e) => {
                self.rollback(&record.id).await;
                Err(ApplianceError::Unavailable(e.to_string()))
            }
        }
    }

    /// Place an appliance using the offer under the greatest slot key.
    ///
    /// No retry and no fallback to another offer: a failed placement leaves
    /// the appliance unbound.
    #[instrument(skip(self, offers), fields(appliance_id = %id, offer_count = offers.len()))]
    pub async fn accept_offer(&self, id: &str, offers: &OfferSet) -> ApplianceResult<ApplianceView> {
        let (slot, offer) = offers
            .select()
            .ok_or_else(|| ApplianceError::Malformed("offer callback carried no offers".to_string()))?;

        let record = self.find(id).await?;
        if record.is_bound() {
            return Err(ApplianceError::AlreadyPlaced(record.id));
        }

        let image = self.resolve_image(&record.image).await?;
        let adapter = self
            .clusters
            .connect(&offer.kind, &offer.endpoint)
            .map_err(|e| ApplianceError::Malformed(e.to_string()))?;

        info!(
            slot = %slot,
            agent = %offer.agent,
            endpoint = %offer.endpoint,
            "Placing appliance"
        );

        let response = adapter
            .create_app(&record, &image, Some(&offer.agent))
            .await
            .map_err(|e| ApplianceError::Unavailable(e.to_string()))?;

        if response.status == StatusCode::CONFLICT {
            return Err(ApplianceError::Conflict(record.id));
        }
        if !response.is_success() {
            warn!(status = %response.status, "Cluster rejected placement");
            return Err(ApplianceError::Upstream(response));
        }

        let binding = adapter.binding(Some(&offer.agent));
        let outcome = match self.appliances.bind_cluster(id, &binding).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to record placement, removing placed app");
                remove_placed(adapter.as_ref(), id).await;
                return Err(e.into());
            }
        };
        match outcome {
            BindOutcome::Bound(record) => {
                info!(cluster = %binding.url, "Appliance placed");
                Ok(record.into())
            }
            BindOutcome::Missing => {
                warn!("Appliance deleted while placing, removing placed app");
                remove_placed(adapter.as_ref(), id).await;
                Err(ApplianceError::NotFound(id.to_string()))
            }
            BindOutcome::AlreadyBound => {
                warn!("Appliance placed concurrently, removing duplicate app");
                remove_placed(adapter.as_ref(), id).await;
                Err(ApplianceError::AlreadyPlaced(id.to_string()))
            }
        }
    }

    /// Load an appliance and reconcile it with the live backend state.
    ///
    /// The reconciled status is never written back.
    #[instrument(skip(self), fields(appliance_id = %id))]
    pub async fn get(&self, id: &str) -> ApplianceResult<ApplianceView> {
        let record = self.find(id).await?;
        let Some(binding) = record.cluster.clone() else {
            return Ok(record.into());
        };

        let adapter = self.clusters.for_binding(&binding)?;
        let response = match adapter.get_app(id).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!(status = %response.status, "Live status query failed");
                return Ok(record.into());
            }
            Err(e) => {
                warn!(error = %e, "Live status query failed");
                return Ok(record.into());
            }
        };

        let tasks = match adapter.live_tasks(&response.body) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Unreadable live status");
                return Ok(record.into());
            }
        };

        let Some(task) = tasks.first() else {
            debug!("No live tasks yet");
            return Ok(record.into());
        };

        let container_ports = match self.images.get(&record.image).await {
            Ok(image) => Some(image.container_ports()),
            Err(ImageError::NotFound(_)) => {
                warn!(image = %record.image, "Image gone, access points unavailable");
                None
            }
            Err(e) => return Err(image_error(e)),
        };

        let access_points = container_ports
            .map(|ports| derive_access_points(&task.host, &task.ports, &ports))
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut record = record;
        record.status = status_from_task_state(task.state.as_deref());

        Ok(ApplianceView {
            record,
            access_points,
        })
    }

    /// Delete an appliance.
    ///
    /// The record is removed first and the backend cleanup follows the
    /// binding it held at removal, so a placement committed concurrently is
    /// either cleaned up here or rejected as missing by `accept_offer`. The
    /// backend app is removed best effort.
    #[instrument(skip(self), fields(appliance_id = %id))]
    pub async fn delete(&self, id: &str) -> ApplianceResult<()> {
        let record = self
            .appliances
            .take_by_id(id)
            .await?
            .ok_or_else(|| ApplianceError::NotFound(id.to_string()))?;

        if let Some(binding) = &record.cluster {
            match self.clusters.for_binding(binding) {
                Ok(adapter) => remove_placed(adapter.as_ref(), id).await,
                Err(e) => warn!(error = %e, "Cannot reach cluster of appliance"),
            }
        }

        info!("Appliance deleted");
        Ok(())
    }

    /// Remove appliances still awaiting an offer that were submitted before
    /// `cutoff`. Returns the removed ids.
    #[instrument(skip(self))]
    pub async fn expire_unplaced(&self, cutoff: DateTime<Utc>) -> ApplianceResult<Vec<String>> {
        let mut expired = Vec::new();

        for record in self.appliances.list_all().await? {
            if record.is_bound() || record.submitted_at >= cutoff {
                continue;
            }
            // Skipped if an offer was accepted since the listing.
            if self.appliances.delete_unbound(&record.id).await? {
                info!(appliance_id = %record.id, submitted_at = %record.submitted_at, "Expired appliance awaiting offer");
                expired.push(record.id);
            }
        }

        Ok(expired)
    }

    async fn find(&self, id: &str) -> ApplianceResult<ApplianceRecord> {
        self.appliances
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplianceError::NotFound(id.to_string()))
    }

    async fn resolve_image(&self, id: &str) -> ApplianceResult<ImageRecord> {
        self.images.get(id).await.map_err(image_error)
    }

    async fn rollback(&self, id: &str) {
        match self.appliances.delete_by_id(id).await {
            Ok(_) => debug!(appliance_id = %id, "Rolled back submission"),
            Err(e) => error!(appliance_id = %id, error = %e, "Failed to roll back submission"),
        }
    }
}

fn validate_submission(req: &SubmitAppliance) -> ApplianceResult<()> {
    if !is_valid_id(&req.id) {
        return Err(ApplianceError::Malformed(
            "appliance id must be non-empty and contain only a-z, 0-9 and '-'".to_string(),
        ));
    }
    if req.image.trim().is_empty() {
        return Err(ApplianceError::Malformed("image cannot be empty".to_string()));
    }
    let invalid = req.resources.invalid_fields();
    if !invalid.is_empty() {
        return Err(ApplianceError::Malformed(format!(
            "resources must be finite and non-negative: {}",
            invalid.join(", ")
        )));
    }
    Ok(())
}

fn image_error(e: ImageError) -> ApplianceError {
    match e {
        ImageError::NotFound(id) => ApplianceError::ImageNotFound(id),
        ImageError::Store(e) => ApplianceError::Store(e),
        other => ApplianceError::Malformed(other.to_string()),
    }
}

/// Delete a placed app, treating 404 as already gone. Failures are logged only.
async fn remove_placed(adapter: &dyn ClusterAdapter, id: &str) {
    match adapter.delete_app(id).await {
        Ok(response) if response.is_success() => debug!(appliance_id = %id, "Cluster app deleted"),
        Ok(response) if response.status == StatusCode::NOT_FOUND => {
            debug!(appliance_id = %id, "Cluster app already absent")
        }
        Ok(response) => warn!(
            appliance_id = %id,
            status = %response.status,
            body = %response.body,
            "Cluster app deletion failed"
        ),
        Err(e) => warn!(appliance_id = %id, error = %e, "Cluster app deletion failed"),
    }
}
