//! Versioned schema migrations, tracked in `schema_version`.

use super::StoreError;
use sqlx::SqlitePool;
use tracing::{info, instrument};

const SCHEMA_VERSION: i64 = 2;

fn failed(e: sqlx::Error) -> StoreError {
    StoreError::MigrationFailed { reason: e.to_string() }
}

#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    let current_version = current_version(pool).await?;
    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    Ok(())
}

pub async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(failed)?;
    Ok(version.unwrap_or(0))
}

async fn set_version(pool: &SqlitePool, version: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM schema_version")
        .execute(pool)
        .await
        .map_err(failed)?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(failed)?;
    Ok(())
}

/// Metrics log + liveness table
#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> Result<(), StoreError> {
    info!("Running migration to schema version 1");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            time        INTEGER NOT NULL,
            source_id   TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            resource    TEXT NOT NULL DEFAULT '',
            value       REAL NOT NULL,
            tags        TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (source_id, metric_type, resource, time)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS server_status (
            source_id  TEXT PRIMARY KEY,
            last_seen  INTEGER NOT NULL,
            ip_address TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    set_version(pool, 1).await
}

/// `recent_samples` reads by source, newest first
#[instrument(skip(pool))]
async fn migrate_to_v2(pool: &SqlitePool) -> Result<(), StoreError> {
    info!("Running migration to schema version 2");

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_source_time ON metrics(source_id, time DESC)")
        .execute(pool)
        .await
        .map_err(failed)?;

    set_version(pool, 2).await
}
