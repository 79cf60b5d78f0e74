//! Image registry.
//!
//! Images are reusable workload definitions. They are immutable once
//! registered; changing one means deleting and registering it again.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::store::{Record, Registry, StoreError};

/// A container port declared by an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    #[serde(alias = "app_port")]
    pub container_port: u16,

    /// Fixed host port; absent means the orchestrator picks one.
    #[serde(default, alias = "host_port", skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

fn default_privileged() -> bool {
    true
}

/// A registered workload image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortDescriptor>,
    #[serde(default = "default_privileged", alias = "is_privileged")]
    pub privileged: bool,
}

impl Record for ImageRecord {
    const KIND: &'static str = "image";

    fn id(&self) -> &str {
        &self.id
    }
}

impl ImageRecord {
    /// Declared container ports in declaration order.
    pub fn container_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.container_port).collect()
    }
}

/// Image registry errors.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image '{0}' is not found")]
    NotFound(String),

    #[error("Image '{0}' already exists")]
    Conflict(String),

    #[error("invalid image: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Image registry service.
#[derive(Clone)]
pub struct ImageRegistry {
    store: Arc<dyn Registry<ImageRecord>>,
}

impl ImageRegistry {
    pub fn new(store: Arc<dyn Registry<ImageRecord>>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<ImageRecord>, ImageError> {
        Ok(self.store.list_all().await?)
    }

    /// Check the image store is reachable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }

    pub async fn get(&self, id: &str) -> Result<ImageRecord, ImageError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ImageError::NotFound(id.to_string()))
    }

    #[instrument(skip(self, image), fields(image_id = %image.id))]
    pub async fn add(&self, image: ImageRecord) -> Result<ImageRecord, ImageError> {
        if image.id.trim().is_empty() {
            return Err(ImageError::Malformed("image id cannot be empty".to_string()));
        }
        if image.ports.iter().any(|p| p.container_port == 0) {
            return Err(ImageError::Malformed(
                "container ports must be non-zero".to_string(),
            ));
        }

        if !self.store.insert_if_absent(&image).await? {
            return Err(ImageError::Conflict(image.id));
        }

        info!("Image registered");
        Ok(image)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), ImageError> {
        if !self.store.delete_by_id(id).await? {
            return Err(ImageError::NotFound(id.to_string()));
        }
        info!("Image deleted");
        Ok(())
    }
}
