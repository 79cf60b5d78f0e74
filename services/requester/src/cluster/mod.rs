//! Cluster adapters.
//!
//! A cluster adapter turns an appliance and its image into a placement
//! request for one kind of backend orchestrator, and exposes get/create/delete
//! against a concrete backend instance. Adapters are picked by the kind tag
//! stored in a cluster binding through [`ClusterRegistry`].

mod marathon;

pub use marathon::MarathonAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::appliance::{ApplianceRecord, ClusterBinding};
use crate::image::ImageRecord;
use crate::upstream::UpstreamResponse;

/// Backend kind assumed when an offer does not name one.
pub const DEFAULT_KIND: &str = marathon::KIND;

/// Cluster adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No adapter is registered for the kind tag.
    #[error("unknown cluster type '{0}'")]
    UnknownKind(String),

    /// The backend could not be reached.
    #[error("cluster backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Live state of one task of a placed appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTask {
    /// Host the task runs on.
    pub host: String,

    /// Host ports assigned to the task, in declaration order.
    pub ports: Vec<u16>,

    /// Backend task state, if reported.
    pub state: Option<String>,
}

/// Capability to place, inspect and remove appliances on one backend.
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Kind tag recorded in bindings created through this adapter.
    fn kind(&self) -> &'static str;

    /// Base URL of the backend.
    fn url(&self) -> &str;

    async fn get_app(&self, id: &str) -> Result<UpstreamResponse, ClusterError>;

    /// Place `appliance`, optionally pinned to `agent`.
    async fn create_app(
        &self,
        appliance: &ApplianceRecord,
        image: &ImageRecord,
        agent: Option<&str>,
    ) -> Result<UpstreamResponse, ClusterError>;

    async fn delete_app(&self, id: &str) -> Result<UpstreamResponse, ClusterError>;

    /// Extract live tasks from a successful `get_app` body.
    fn live_tasks(&self, body: &str) -> Result<Vec<LiveTask>, serde_json::Error>;

    /// Binding recorded for an appliance placed through this adapter.
    fn binding(&self, agent: Option<&str>) -> ClusterBinding {
        ClusterBinding {
            kind: self.kind().to_string(),
            url: self.url().to_string(),
            agent: agent.map(str::to_string),
        }
    }
}

/// Constructor of an adapter for one backend base URL.
pub type AdapterFactory = fn(reqwest::Client, &str) -> Arc<dyn ClusterAdapter>;

/// Maps binding kind tags to adapter constructors.
#[derive(Clone)]
pub struct ClusterRegistry {
    client: reqwest::Client,
    factories: HashMap<&'static str, AdapterFactory>,
}

impl ClusterRegistry {
    /// Registry with every built-in backend kind.
    pub fn new(client: reqwest::Client) -> Self {
        let mut registry = Self {
            client,
            factories: HashMap::new(),
        };
        registry.register(marathon::KIND, marathon::connect);
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: AdapterFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build the adapter for `kind` at `url`.
    ///
    /// Unknown kinds fail; there is no default backend.
    pub fn connect(&self, kind: &str, url: &str) -> Result<Arc<dyn ClusterAdapter>, ClusterError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ClusterError::UnknownKind(kind.to_string()))?;
        Ok(factory(self.client.clone(), url))
    }

    pub fn for_binding(
        &self,
        binding: &ClusterBinding,
    ) -> Result<Arc<dyn ClusterAdapter>, ClusterError> {
        self.connect(&binding.kind, &binding.url)
    }
}
