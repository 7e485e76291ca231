//! Sentinel HQ
//!
//! - `ingest`: gRPC `StreamMetrics` service, one ingestor per agent stream
//! - `store`: idempotent SQLite log of samples + per-source liveness
//! - `http`: read-only REST API over the store
//! - `health`: ingest counters served on `/health`

pub mod config;
pub mod health;
pub mod http;
pub mod ingest;
pub mod models;
pub mod store;

pub use config::HqConfig;
pub use health::HealthTracker;
pub use ingest::{Ingestor, TelemetryService};
pub use store::{LivenessPolicy, LogStore, SqliteLogStore, StoreError};
