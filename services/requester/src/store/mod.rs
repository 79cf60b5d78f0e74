//! Keyed record storage for images and appliances.
//!
//! This module provides:
//! - The registry contract (`insert_if_absent`, `find_by_id`, `delete_by_id`, `list_all`)
//! - An atomic compare-and-set for binding an appliance to a cluster
//! - An in-memory implementation and a Postgres implementation
//!
//! Every operation is atomic for a single record. Nothing spans records.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{DbConfig, PgDatabase, PgStore};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::appliance::{ApplianceRecord, ClusterBinding};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("no migrations directory found (looked in {tried})")]
    MigrationDirNotFound { tried: String },

    /// A stored body no longer matches its record type.
    #[error("stored {kind} '{id}' is corrupt: {source}")]
    Corrupt {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A record that can be kept in a registry.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Namespace of this record type inside a shared store.
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// Keyed registry of records.
#[async_trait]
pub trait Registry<T: Record>: Send + Sync {
    /// Insert `record` unless one with the same id exists.
    ///
    /// Returns `false` without touching the stored record on a duplicate.
    async fn insert_if_absent(&self, record: &T) -> StoreResult<bool>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<T>>;

    /// Returns whether a record was removed.
    async fn delete_by_id(&self, id: &str) -> StoreResult<bool>;

    /// Remove a record and return it as it was at the moment of removal.
    async fn take_by_id(&self, id: &str) -> StoreResult<Option<T>>;

    /// All records ordered by id.
    async fn list_all(&self) -> StoreResult<Vec<T>>;

    /// Check the backing storage is reachable.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Outcome of [`ApplianceStore::bind_cluster`].
#[derive(Debug, Clone, PartialEq)]
pub enum BindOutcome {
    /// The binding was recorded.
    Bound(ApplianceRecord),

    /// The appliance no longer exists.
    Missing,

    /// The appliance was already bound to a cluster.
    AlreadyBound,
}

/// Appliance registry.
#[async_trait]
pub trait ApplianceStore: Registry<ApplianceRecord> {
    /// Record a cluster binding if the appliance exists and is still unbound.
    async fn bind_cluster(&self, id: &str, binding: &ClusterBinding) -> StoreResult<BindOutcome>;

    /// Remove the appliance only if it has no cluster binding.
    async fn delete_unbound(&self, id: &str) -> StoreResult<bool>;
}
