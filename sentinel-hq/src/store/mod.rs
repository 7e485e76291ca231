/**
 * LOG STORE - Journal idempotent des métriques reçues
 *
 * RÔLE :
 * Persistance SQLite des batches : une ligne par échantillon dans `metrics`,
 * une ligne de liveness par source dans `server_status`.
 *
 * FONCTIONNEMENT :
 * - Clé naturelle (source_id, metric_type, resource, time) : réinsérer un
 *   batch déjà reçu ne change rien (ON CONFLICT DO NOTHING)
 * - Un batch = une transaction : liveness + échantillons, tout ou rien
 * - Temps stockés en microsecondes Unix (INTEGER), précision plus fine tronquée
 * - Valeur non finie (NaN, ±inf) → échantillon ignoré, le reste du batch est écrit
 * - WAL + busy_timeout : les transactions concurrentes attendent leur tour
 *
 * UTILITÉ DANS SENTINEL :
 * 🎯 Ingest : chaque stream agent écrit ici
 * 🎯 API REST : liste des sources, derniers échantillons, état des services
 */

use crate::models::{SampleRow, ServerStatus, ServiceStatus};
use chrono::{DateTime, Utc};
use sentinel_common::{kinds, Batch, ResourceKeyResolver};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub mod migrations;


/// Rows returned by `recent_samples`
pub const RECENT_SAMPLES_LIMIT: i64 = 100;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tags json: {0}")]
    Tags(#[from] serde_json::Error),
    #[error("stored timestamp {0} out of range")]
    InvalidTimestamp(i64),
}

/// How a newer batch updates `last_seen`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Every batch overwrites, even an older one arriving late
    #[default]
    LastWriteWins,
    /// `last_seen` never moves backwards
    Monotonic,
}

impl LivenessPolicy {
    fn upsert_sql(self) -> &'static str {
        match self {
            LivenessPolicy::LastWriteWins => {
                r#"
                INSERT INTO server_status (source_id, last_seen, ip_address)
                VALUES (?, ?, ?)
                ON CONFLICT (source_id) DO UPDATE
                    SET last_seen = excluded.last_seen, ip_address = excluded.ip_address
                "#
            }
            LivenessPolicy::Monotonic => {
                r#"
                INSERT INTO server_status (source_id, last_seen, ip_address)
                VALUES (?, ?, ?)
                ON CONFLICT (source_id) DO UPDATE
                    SET last_seen = excluded.last_seen, ip_address = excluded.ip_address
                    WHERE excluded.last_seen >= server_status.last_seen
                "#
            }
        }
    }
}

pub trait LogStore: Send + Sync + 'static {
    /// Liveness upsert + every sample, in one transaction
    fn persist(
        &self,
        batch: &Batch,
        origin: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Most recently seen first
    fn list_sources(&self) -> impl Future<Output = Result<Vec<ServerStatus>, StoreError>> + Send;

    /// Newest `RECENT_SAMPLES_LIMIT` rows of one source, newest first
    fn recent_samples(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Vec<SampleRow>, StoreError>> + Send;

    /// Latest `service_status` per service, ordered by service name
    fn latest_resource_states(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Vec<ServiceStatus>, StoreError>> + Send;
}

#[derive(Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
    policy: LivenessPolicy,
    resolver: ResourceKeyResolver,
}

impl SqliteLogStore {
    #[instrument(skip_all)]
    pub async fn open(path: impl AsRef<Path>, policy: LivenessPolicy) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening log store at {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, policy).await
    }

    /// Single-connection in-memory database (tests)
    pub async fn open_in_memory(policy: LivenessPolicy) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // la base disparaît avec sa connexion
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, policy).await
    }

    async fn with_pool(pool: SqlitePool, policy: LivenessPolicy) -> Result<Self, StoreError> {
        migrations::run(&pool).await?;
        Ok(Self {
            pool,
            policy,
            resolver: ResourceKeyResolver::default(),
        })
    }

    /// Replaces the resource key precedence (default: service, then path)
    pub fn with_resolver(mut self, resolver: ResourceKeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Storage resolution: whole microseconds
pub fn to_micros(time: &DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or(StoreError::InvalidTimestamp(micros))
}

fn sample_row(row: &SqliteRow) -> Result<SampleRow, StoreError> {
    let tags: String = row.try_get("tags")?;
    Ok(SampleRow {
        time: from_micros(row.try_get("time")?)?,
        source_id: row.try_get("source_id")?,
        metric_type: row.try_get("metric_type")?,
        resource: row.try_get("resource")?,
        value: row.try_get("value")?,
        tags: serde_json::from_str(&tags)?,
    })
}

impl LogStore for SqliteLogStore {
    #[instrument(skip(self, batch), fields(source_id = %batch.source_id, samples = batch.len()))]
    async fn persist(&self, batch: &Batch, origin: &str) -> Result<(), StoreError> {
        let time = to_micros(&batch.collected_at);
        let mut tx = self.pool.begin().await?;

        sqlx::query(self.policy.upsert_sql())
            .bind(&batch.source_id)
            .bind(time)
            .bind(origin)
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for sample in &batch.samples {
            if !sample.value.is_finite() {
                warn!("Skipping {} sample with value {}", sample.metric_type, sample.value);
                continue;
            }
            let resource = self.resolver.resolve(&sample.tags);
            let tags = serde_json::to_string(&sample.tags)?;

            let result = sqlx::query(
                r#"
                INSERT INTO metrics (time, source_id, metric_type, resource, value, tags)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (source_id, metric_type, resource, time) DO NOTHING
                "#,
            )
            .bind(time)
            .bind(&batch.source_id)
            .bind(&sample.metric_type)
            .bind(resource)
            .bind(sample.value)
            .bind(tags)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("Stored {} of {} samples", inserted, batch.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sources(&self) -> Result<Vec<ServerStatus>, StoreError> {
        let rows = sqlx::query(
            "SELECT source_id, last_seen, ip_address FROM server_status ORDER BY last_seen DESC, source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ServerStatus, StoreError> {
                let ip_address: Option<String> = row.try_get("ip_address")?;
                Ok(ServerStatus {
                    source_id: row.try_get("source_id")?,
                    last_seen: from_micros(row.try_get("last_seen")?)?,
                    ip_address: ip_address.filter(|ip| !ip.is_empty()),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn recent_samples(&self, source_id: &str) -> Result<Vec<SampleRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT time, source_id, metric_type, resource, value, tags
            FROM metrics
            WHERE source_id = ?
            ORDER BY time DESC, metric_type, resource
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(RECENT_SAMPLES_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sample_row).collect()
    }

    #[instrument(skip(self))]
    async fn latest_resource_states(&self, source_id: &str) -> Result<Vec<ServiceStatus>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT resource, value, time FROM (
                SELECT resource, value, time,
                       ROW_NUMBER() OVER (PARTITION BY resource ORDER BY time DESC) AS rn
                FROM metrics
                WHERE source_id = ? AND metric_type = ? AND resource != ''
            )
            WHERE rn = 1
            ORDER BY resource
            "#,
        )
        .bind(source_id)
        .bind(kinds::SERVICE_STATUS)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ServiceStatus, StoreError> {
                Ok(ServiceStatus {
                    service_name: row.try_get("resource")?,
                    status: row.try_get("value")?,
                    last_seen: from_micros(row.try_get("time")?)?,
                })
            })
            .collect()
    }
}
