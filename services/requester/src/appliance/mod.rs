//! Appliances: records, errors and the lifecycle manager.

mod manager;
mod model;

pub use manager::ApplianceManager;
pub use model::{ApplianceRecord, ApplianceView, ClusterBinding, Resources, SubmitAppliance};

use crate::cluster::ClusterError;
use crate::store::StoreError;
use crate::upstream::UpstreamResponse;

/// Result type for appliance operations.
pub type ApplianceResult<T> = Result<T, ApplianceError>;

/// Errors that can occur while managing appliances.
#[derive(Debug, thiserror::Error)]
pub enum ApplianceError {
    #[error("Appliance '{0}' is not found")]
    NotFound(String),

    #[error("Image '{0}' is not found")]
    ImageNotFound(String),

    #[error("Appliance '{0}' already exists")]
    Conflict(String),

    #[error("Appliance '{0}' is already placed on a cluster")]
    AlreadyPlaced(String),

    #[error("{0}")]
    Malformed(String),

    /// A coordinator or backend answered with a non-success status.
    #[error("upstream returned {}", .0.status)]
    Upstream(UpstreamResponse),

    /// A coordinator or backend could not be reached.
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
