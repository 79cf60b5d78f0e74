//! Bridge-networked Docker orchestrator backend (Marathon `/v2/apps` API).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClusterAdapter, ClusterError, LiveTask};
use crate::appliance::ApplianceRecord;
use crate::image::ImageRecord;
use crate::upstream::UpstreamResponse;

/// Kind tag of this backend.
pub const KIND: &str = "marathon";

const DEFAULT_PROTOCOL: &str = "tcp";

pub(super) fn connect(client: reqwest::Client, url: &str) -> Arc<dyn ClusterAdapter> {
    Arc::new(MarathonAdapter::new(client, url))
}

/// Adapter for one Marathon instance.
pub struct MarathonAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl MarathonAdapter {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn app_url(&self, id: &str) -> String {
        format!("{}/v2/apps/{}", self.base_url, id)
    }
}

/// App definition posted to `/v2/apps`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition<'a> {
    pub id: &'a str,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub cmd: &'a str,
    pub container: Container<'a>,
    pub args: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<[&'a str; 3]>>,
}

#[derive(Debug, Serialize)]
pub struct Container<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub docker: Docker<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Docker<'a> {
    pub image: &'a str,
    pub network: &'static str,
    pub port_mappings: Vec<PortMapping<'a>>,
    pub privileged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping<'a> {
    pub container_port: u16,
    pub protocol: &'a str,
    /// Zero lets the orchestrator assign a host port.
    pub host_port: u16,
}

impl<'a> AppDefinition<'a> {
    /// Translate an appliance and its image into an app definition.
    pub fn new(appliance: &'a ApplianceRecord, image: &'a ImageRecord, agent: Option<&'a str>) -> Self {
        let port_mappings = image
            .ports
            .iter()
            .map(|p| PortMapping {
                container_port: p.container_port,
                protocol: p.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL),
                host_port: p.host_port.unwrap_or(0),
            })
            .collect();

        Self {
            id: &appliance.id,
            cpus: appliance.resources.cpus,
            mem: appliance.resources.mem,
            disk: appliance.resources.disk,
            cmd: appliance.cmd.as_deref().unwrap_or(""),
            container: Container {
                kind: "DOCKER",
                docker: Docker {
                    image: &image.id,
                    network: "BRIDGE",
                    port_mappings,
                    privileged: image.privileged,
                },
            },
            args: &appliance.args,
            env: &appliance.env,
            constraints: agent.map(|agent| vec![["hostname", "CLUSTER", agent]]),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppEnvelope {
    app: AppStatus,
}

#[derive(Debug, Deserialize)]
struct AppStatus {
    #[serde(default)]
    tasks: Vec<TaskStatus>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    #[serde(default)]
    host: String,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    state: Option<String>,
}

#[async_trait]
impl ClusterAdapter for MarathonAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn url(&self) -> &str {
        &self.base_url
    }

    async fn get_app(&self, id: &str) -> Result<UpstreamResponse, ClusterError> {
        let url = self.app_url(id);
        debug!(url = %url, "Fetching app");
        let response = self.client.get(&url).send().await?;
        Ok(UpstreamResponse::read(response).await?)
    }

    async fn create_app(
        &self,
        appliance: &ApplianceRecord,
        image: &ImageRecord,
        agent: Option<&str>,
    ) -> Result<UpstreamResponse, ClusterError> {
        let url = format!("{}/v2/apps", self.base_url);
        let definition = AppDefinition::new(appliance, image, agent);
        debug!(url = %url, app_id = %appliance.id, agent = ?agent, "Creating app");
        let response = self.client.post(&url).json(&definition).send().await?;
        Ok(UpstreamResponse::read(response).await?)
    }

    async fn delete_app(&self, id: &str) -> Result<UpstreamResponse, ClusterError> {
        let url = self.app_url(id);
        debug!(url = %url, "Deleting app");
        let response = self.client.delete(&url).send().await?;
        Ok(UpstreamResponse::read(response).await?)
    }

    fn live_tasks(&self, body: &str) -> Result<Vec<LiveTask>, serde_json::Error> {
        let envelope: AppEnvelope = serde_json::from_str(body)?;
        Ok(envelope
            .app
            .tasks
            .into_iter()
            .map(|t| LiveTask {
                host: t.host,
                ports: t.ports,
                state: t.state,
            })
            .collect())
    }
}
