use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HqHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub streams_open: u64,
    pub batches_received: u64,
    pub batches_persisted: u64,
    pub batches_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    streams_open: AtomicU64,
    batches_received: AtomicU64,
    batches_persisted: AtomicU64,
    batches_failed: AtomicU64,
}

/// Ingest counters shared by every stream and the `/health` route
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    last_batch_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

/// Counts one open stream until dropped
pub struct OpenStream {
    counters: Arc<Counters>,
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.counters.streams_open.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            last_batch_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stream_opened(&self) -> OpenStream {
        self.counters.streams_open.fetch_add(1, Ordering::Relaxed);
        OpenStream {
            counters: self.counters.clone(),
        }
    }

    pub fn batch_received(&self) {
        self.counters.batches_received.fetch_add(1, Ordering::Relaxed);
        *self.last_batch_at.lock() = Some(Utc::now());
    }

    pub fn batch_persisted(&self) {
        self.counters.batches_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_failed(&self) {
        self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> HqHealth {
        HqHealth {
            status: "ok".to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            streams_open: self.counters.streams_open.load(Ordering::Relaxed),
            batches_received: self.counters.batches_received.load(Ordering::Relaxed),
            batches_persisted: self.counters.batches_persisted.load(Ordering::Relaxed),
            batches_failed: self.counters.batches_failed.load(Ordering::Relaxed),
            last_batch_at: *self.last_batch_at.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_stream_guard() {
        let health = HealthTracker::new();
        let first = health.stream_opened();
        let second = health.stream_opened();
        assert_eq!(health.get_health().streams_open, 2);

        drop(first);
        assert_eq!(health.get_health().streams_open, 1);
        drop(second);
        assert_eq!(health.get_health().streams_open, 0);
    }

    #[test]
    fn test_batch_counters() {
        let health = HealthTracker::new();
        assert!(health.get_health().last_batch_at.is_none());

        health.batch_received();
        health.batch_persisted();
        health.batch_received();
        health.batch_failed();

        let snapshot = health.get_health();
        assert_eq!(snapshot.status, "ok");
        assert_eq!(snapshot.batches_received, 2);
        assert_eq!(snapshot.batches_persisted, 1);
        assert_eq!(snapshot.batches_failed, 1);
        assert!(snapshot.last_batch_at.is_some());
    }
}
