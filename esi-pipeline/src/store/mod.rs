//! Durable store for transformed payloads.
//!
//! Writes are keyed by (source id, ingestion timestamp) and replace any row
//! with the same key, so a repeated hand-off of the same attempt is harmless.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// A payload as written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPayload {
    pub source_id: String,
    pub ingested_at: DateTime<Utc>,
    pub record_count: usize,
    pub payload: Value,
}

#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn save(&self, payload: &StoredPayload) -> Result<()>;

    /// Most recent payload stored for a source.
    async fn latest(&self, source_id: &str) -> Result<Option<StoredPayload>>;
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (creating if missing) the database and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .create_if_missing(true);

        // Every in-memory connection is its own database.
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(connect_options).await?;
        let store = Self { pool };
        store.run_migrations().await?;

        info!(
            in_memory,
            max_connections, "Payload store initialized"
        );
        Ok(store)
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Number of payloads stored for a source.
    pub async fn count(&self, source_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM ingested_payloads WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl PayloadStore for SqliteStore {
    async fn save(&self, payload: &StoredPayload) -> Result<()> {
        let body = serde_json::to_string(&payload.payload)?;
        sqlx::query(
            "INSERT OR REPLACE INTO ingested_payloads (source_id, ingested_at, record_count, payload) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&payload.source_id)
        .bind(payload.ingested_at.timestamp_millis())
        .bind(payload.record_count as i64)
        .bind(body)
        .execute(&self.pool)
        .await?;

        debug!(source_id = %payload.source_id, "Persisted payload");
        Ok(())
    }

    async fn latest(&self, source_id: &str) -> Result<Option<StoredPayload>> {
        let row = sqlx::query(
            "SELECT source_id, ingested_at, record_count, payload FROM ingested_payloads \
             WHERE source_id = ? ORDER BY ingested_at DESC LIMIT 1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let millis: i64 = row.get("ingested_at");
        let ingested_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::validation(format!("invalid stored timestamp {}", millis)))?;
        let record_count: i64 = row.get("record_count");
        let body: String = row.get("payload");

        Ok(Some(StoredPayload {
            source_id: row.get("source_id"),
            ingested_at,
            record_count: usize::try_from(record_count).unwrap_or(0),
            payload: serde_json::from_str(&body)?,
        }))
    }
}
