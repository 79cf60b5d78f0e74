//! Offer coordinator client.
//!
//! Asks the external resource coordinator to find placement offers for an
//! appliance. The coordinator answers the request itself with accept/reject
//! only; offers arrive later on the callback address we hand it.

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::appliance::Resources;
use crate::upstream::UpstreamResponse;

/// Coordinator client errors.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Body of a resource request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    /// Where the coordinator posts offers back to.
    pub requester_address: String,
    pub coordinator_address: String,
    pub name: String,
    /// `cpus:<n>;mem:<n>`
    pub resources: String,
    pub docker_image: String,
    /// Fresh session token for this request.
    pub global_framework_id: String,
}

/// Render resources the way the coordinator expects them.
pub fn resource_string(resources: &Resources) -> String {
    format!("cpus:{};mem:{}", resources.cpus, resources.mem)
}

/// Client for the offer coordinator.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: reqwest::Client,
    url: String,
    name: String,
}

impl CoordinatorClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            name: name.into(),
        }
    }

    /// Coordinator endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the request body for an appliance.
    pub fn offer_request(
        &self,
        appliance_id: &str,
        resources: &Resources,
        image: &str,
        callback_url: &str,
    ) -> OfferRequest {
        OfferRequest {
            requester_address: callback_url.to_string(),
            coordinator_address: self.url.clone(),
            name: format!("{}/{}", self.name, appliance_id),
            resources: resource_string(resources),
            docker_image: image.to_string(),
            global_framework_id: Uuid::new_v4().to_string(),
        }
    }

    /// Ask the coordinator for offers.
    ///
    /// Returns the coordinator's answer as is; no offers are carried in it.
    pub async fn request_offers(
        &self,
        appliance_id: &str,
        resources: &Resources,
        image: &str,
        callback_url: &str,
    ) -> Result<UpstreamResponse, CoordinatorError> {
        let request = self.offer_request(appliance_id, resources, image, callback_url);
        debug!(
            url = %self.url,
            appliance_id = %appliance_id,
            session = %request.global_framework_id,
            "Requesting offers"
        );

        let response = self.client.post(&self.url).json(&request).send().await?;
        let response = UpstreamResponse::read(response).await?;

        if !response.is_success() {
            warn!(
                status = %response.status,
                body = %response.body,
                appliance_id = %appliance_id,
                "Coordinator rejected offer request"
            );
        }

        Ok(response)
    }
}
