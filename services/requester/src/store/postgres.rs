//! Postgres-backed registry.
//!
//! All record kinds share one `records` table keyed by `(kind, id)` with the
//! record body stored as JSONB. Bodies are decoded into their typed record on
//! read; a body that no longer decodes is reported, not patched up.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{ApplianceStore, BindOutcome, Record, Registry, StoreError, StoreResult};
use crate::appliance::{ApplianceRecord, ClusterBinding};

/// Pool settings for the registry database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/requester".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl DbConfig {
    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
    }
}

/// Directories searched for migrations, relative ones first so a deployed
/// binary can ship its own.
fn migration_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("migrations"),
        PathBuf::from("services/requester/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

/// Registry database handle; hands out typed stores sharing one pool.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        let pool = config
            .pool_options()
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Registry database connected"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the `records` schema from the first migrations directory found.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let dirs = migration_dirs();
        let Some(dir) = dirs.iter().find(|dir| dir.is_dir()) else {
            let tried = dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StoreError::MigrationDirNotFound { tried });
        };

        let migrator = Migrator::new(dir.clone())
            .await
            .map_err(StoreError::Migration)?;
        debug!(dir = %dir.display(), migrations = migrator.iter().count(), "Applying registry migrations");
        migrator
            .run(&self.pool)
            .await
            .map_err(StoreError::Migration)?;

        info!(dir = %dir.display(), "Registry schema up to date");
        Ok(())
    }

    /// A typed registry over this database.
    pub fn store<T: Record>(&self) -> PgStore<T> {
        PgStore {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

/// Registry of one record kind in the shared `records` table.
pub struct PgStore<T> {
    pool: PgPool,
    _record: PhantomData<fn() -> T>,
}

fn decode<T: Record>(id: String, body: serde_json::Value) -> StoreResult<T> {
    serde_json::from_value(body).map_err(|source| StoreError::Corrupt {
        kind: T::KIND,
        id,
        source,
    })
}

#[async_trait]
impl<T: Record> Registry<T> for PgStore<T> {
    async fn insert_if_absent(&self, record: &T) -> StoreResult<bool> {
        let body = serde_json::to_value(record)?;
        let result = sqlx::query(
            "INSERT INTO records (kind, id, body) VALUES ($1, $2, $3) \
             ON CONFLICT (kind, id) DO NOTHING",
        )
        .bind(T::KIND)
        .bind(record.id())
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        let body = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT body FROM records WHERE kind = $1 AND id = $2",
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        body.map(|body| decode(id.to_string(), body)).transpose()
    }

    async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE kind = $1 AND id = $2")
            .bind(T::KIND)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn take_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        let body = sqlx::query_scalar::<_, serde_json::Value>(
            "DELETE FROM records WHERE kind = $1 AND id = $2 RETURNING body",
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        body.map(|body| decode(id.to_string(), body)).transpose()
    }

    async fn list_all(&self) -> StoreResult<Vec<T>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            "SELECT id, body FROM records WHERE kind = $1 ORDER BY id",
        )
        .bind(T::KIND)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|(id, body)| decode(id, body)).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ApplianceStore for PgStore<ApplianceRecord> {
    async fn bind_cluster(&self, id: &str, binding: &ClusterBinding) -> StoreResult<BindOutcome> {
        let binding = serde_json::to_value(binding)?;
        let updated = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            UPDATE records
            SET body = jsonb_set(body, '{cluster}', $3)
            WHERE kind = $1
              AND id = $2
              AND jsonb_typeof(body->'cluster') IS DISTINCT FROM 'object'
            RETURNING body
            "#,
        )
        .bind(ApplianceRecord::KIND)
        .bind(id)
        .bind(binding)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(body) = updated {
            return Ok(BindOutcome::Bound(decode(id.to_string(), body)?));
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM records WHERE kind = $1 AND id = $2)",
        )
        .bind(ApplianceRecord::KIND)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            BindOutcome::AlreadyBound
        } else {
            BindOutcome::Missing
        })
    }

    async fn delete_unbound(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM records
            WHERE kind = $1
              AND id = $2
              AND jsonb_typeof(body->'cluster') IS DISTINCT FROM 'object'
            "#,
        )
        .bind(ApplianceRecord::KIND)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_migrations_are_a_candidate() {
        let dir = migration_dirs()
            .into_iter()
            .find(|dir| dir.is_absolute())
            .unwrap();
        assert!(dir.join("0001_records.sql").is_file());
    }
}
