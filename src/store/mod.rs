//! Connection pool, schema migrations, and the transactional write
//! primitives every collector builds its write discipline on.
//!
//! Built on `sqlx::PgPool`, since the partition and `COPY` support this
//! engine needs are Postgres-only.

pub mod article;
pub mod cursor;
pub mod probability;
pub mod vulnerability;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::Pool;

pub use crate::error::StoreError;
use crate::models::{DailyProbability, EnrichedVulnerability};

/// Pool sizing defaults.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Owns the shared connection pool. Cheaply `Clone`able (the pool is an
/// `Arc` internally); every collector holds its own clone.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Postgres>,
}

impl Store {
    /// Open a bounded connection pool and verify it with a trivial
    /// round-trip before returning. Does not run migrations; call
    /// [`Store::migrate`] separately so start-up sequencing stays
    /// explicit in `main`.
    pub async fn connect(database_url: &str, config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(database_url)
            .await
            .map_err(StoreError::classify)?;

        let store = Self { pool };
        store.health_check().await?;
        Ok(store)
    }

    /// A trivial round-trip, used both at start-up and by the health
    /// endpoint's readiness probe.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(())
    }

    /// Apply any unapplied schema migrations in lexicographic version
    /// order. Re-entrant: running it twice is a no-op because `sqlx`
    /// tracks applied versions in `_sqlx_migrations`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(StoreError::from)
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Wrap an already-open, already-migrated pool. Used by integration
    /// tests built on `#[sqlx::test]`, which hands out a pool it created
    /// and migrated itself.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// The cursor and write primitives the KEV collector depends on,
/// abstracted so its cursor-equality short-circuit can be exercised
/// against a fake in unit tests instead of a live Postgres instance.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_cursor(&self, source: &str) -> Result<Option<String>, StoreError>;
    async fn set_cursor(&self, source: &str, value: &str) -> Result<(), StoreError>;
    async fn upsert_enriched_vulnerabilities(
        &self,
        records: &[EnrichedVulnerability],
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl CatalogStore for Store {
    async fn get_cursor(&self, source: &str) -> Result<Option<String>, StoreError> {
        Store::get_cursor(self, source).await
    }

    async fn set_cursor(&self, source: &str, value: &str) -> Result<(), StoreError> {
        Store::set_cursor(self, source, value).await
    }

    async fn upsert_enriched_vulnerabilities(
        &self,
        records: &[EnrichedVulnerability],
    ) -> Result<(), StoreError> {
        Store::upsert_enriched_vulnerabilities(self, records).await
    }
}

/// The partition and write primitives the EPSS collector depends on,
/// abstracted so its idempotence gate can be exercised against a fake in
/// unit tests instead of a live Postgres instance.
#[async_trait]
pub trait ProbabilityStore: Send + Sync {
    async fn has_probabilities_for_date(&self, as_of_date: NaiveDate) -> Result<bool, StoreError>;
    async fn ensure_partition(&self, as_of_date: NaiveDate) -> Result<(), StoreError>;
    async fn bulk_append_probabilities(&self, rows: &[DailyProbability]) -> Result<(), StoreError>;
}

#[async_trait]
impl ProbabilityStore for Store {
    async fn has_probabilities_for_date(&self, as_of_date: NaiveDate) -> Result<bool, StoreError> {
        Store::has_probabilities_for_date(self, as_of_date).await
    }

    async fn ensure_partition(&self, as_of_date: NaiveDate) -> Result<(), StoreError> {
        Store::ensure_partition(self, as_of_date).await
    }

    async fn bulk_append_probabilities(&self, rows: &[DailyProbability]) -> Result<(), StoreError> {
        Store::bulk_append_probabilities(self, rows).await
    }
}
