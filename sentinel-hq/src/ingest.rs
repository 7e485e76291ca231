/**
 * INGEST - Réception des streams de métriques des agents
 *
 * RÔLE :
 * Implémentation du service gRPC `Telemetry.StreamMetrics`. Un ingestor par
 * stream accepté : il lit les batches dans l'ordre et les écrit dans le store.
 *
 * FONCTIONNEMENT :
 * - Adresse du pair lue une fois à l'ouverture ("unknown" si indisponible)
 * - Batch reçu → conversion + persist ; un échec est loggé et compté, le
 *   stream continue (pas de retry)
 * - Fin de stream → Ack { success: true, "Stream closed successfully" }
 * - Erreur transport → le stream s'arrête, les batches déjà écrits restent
 * - Arrêt du serveur → Status::unavailable, l'agent se reconnecte plus tard
 *   (l'arrêt gracieux de tonic attend la fin de chaque stream ouvert)
 */

use crate::health::HealthTracker;
use crate::store::LogStore;
use sentinel_common::pb::telemetry_server::{Telemetry, TelemetryServer};
use sentinel_common::{pb, Batch};
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

pub const ACK_MESSAGE: &str = "Stream closed successfully";
pub const UNKNOWN_ORIGIN: &str = "unknown";

pub const SHUTDOWN_MESSAGE: &str = "HQ shutting down";

pub struct Ingestor<S> {
    store: Arc<S>,
    health: HealthTracker,
    shutdown: CancellationToken,
}

impl<S: LogStore> Ingestor<S> {
    pub fn new(store: Arc<S>, health: HealthTracker) -> Self {
        Self {
            store,
            health,
            shutdown: CancellationToken::new(),
        }
    }

    /// Open streams end with `Unavailable` once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Drains one stream. Batches are persisted strictly in receipt order.
    pub async fn run<St>(&self, mut stream: St, origin: &str) -> Result<pb::Ack, Status>
    where
        St: Stream<Item = Result<pb::MetricBatch, Status>> + Unpin,
    {
        let _open = self.health.stream_opened();
        info!("Stream opened from {}", origin);

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Closing stream from {}: shutting down", origin);
                    return Err(Status::unavailable(SHUTDOWN_MESSAGE));
                }
                message = stream.next() => message,
            };
            let Some(message) = message else { break };

            let wire = match message {
                Ok(wire) => wire,
                Err(status) => {
                    warn!("Error receiving stream from {}: {}", origin, status);
                    return Err(status);
                }
            };
            self.health.batch_received();

            let batch = match Batch::try_from(wire) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Dropping batch from {}: {}", origin, e);
                    self.health.batch_failed();
                    continue;
                }
            };

            match self.store.persist(&batch, origin).await {
                Ok(()) => {
                    self.health.batch_persisted();
                    debug!("Received & saved {} metrics from {}", batch.len(), batch.source_id);
                }
                Err(e) => {
                    error!("Error saving batch from {}: {}", batch.source_id, e);
                    self.health.batch_failed();
                }
            }
        }

        info!("Stream from {} closed", origin);
        Ok(pb::Ack {
            success: true,
            message: ACK_MESSAGE.to_string(),
        })
    }
}

/// gRPC face of the ingestor
pub struct TelemetryService<S> {
    ingestor: Arc<Ingestor<S>>,
}

impl<S: LogStore> TelemetryService<S> {
    pub fn new(ingestor: Ingestor<S>) -> Self {
        Self {
            ingestor: Arc::new(ingestor),
        }
    }

    pub fn into_server(self) -> TelemetryServer<Self> {
        TelemetryServer::new(self)
    }
}

#[tonic::async_trait]
impl<S: LogStore> Telemetry for TelemetryService<S> {
    async fn stream_metrics(
        &self,
        request: Request<Streaming<pb::MetricBatch>>,
    ) -> Result<Response<pb::Ack>, Status> {
        let origin = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string());

        let ack = self.ingestor.run(request.into_inner(), &origin).await?;
        Ok(Response::new(ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SampleRow, ServerStatus, ServiceStatus};
    use crate::store::{LivenessPolicy, SqliteLogStore, StoreError};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use sentinel_common::{kinds, MetricSample, Tags};

    fn wire_batch(source_id: &str, minute: u32) -> pb::MetricBatch {
        let mut batch = Batch::new(source_id, Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap());
        batch.push(MetricSample::new(kinds::CPU_USAGE, 10.0 + minute as f64).with_tags(Tags::new().with_unit("percent")));
        batch.into()
    }

    /// Records calls, fails every source named "bad"
    #[derive(Default)]
    struct Recording {
        persisted: Mutex<Vec<(String, String)>>,
    }

    impl LogStore for Recording {
        async fn persist(&self, batch: &Batch, origin: &str) -> Result<(), StoreError> {
            if batch.source_id == "bad" {
                return Err(StoreError::MigrationFailed { reason: "disk full".into() });
            }
            self.persisted
                .lock()
                .push((batch.source_id.clone(), origin.to_string()));
            Ok(())
        }

        async fn list_sources(&self) -> Result<Vec<ServerStatus>, StoreError> {
            Ok(Vec::new())
        }

        async fn recent_samples(&self, _source_id: &str) -> Result<Vec<SampleRow>, StoreError> {
            Ok(Vec::new())
        }

        async fn latest_resource_states(&self, _source_id: &str) -> Result<Vec<ServiceStatus>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_acks() {
        let store = Arc::new(SqliteLogStore::open_in_memory(LivenessPolicy::default()).await.unwrap());
        let health = HealthTracker::new();
        let ingestor = Ingestor::new(store.clone(), health.clone());

        let stream = tokio_stream::iter(vec![Ok(wire_batch("web-01", 0)), Ok(wire_batch("web-01", 1))]);
        let ack = ingestor.run(stream, "10.0.0.5:40000").await.unwrap();

        assert!(ack.success);
        assert_eq!(ack.message, "Stream closed successfully");
        assert_eq!(store.recent_samples("web-01").await.unwrap().len(), 2);

        let sources = store.list_sources().await.unwrap();
        assert_eq!(sources[0].ip_address.as_deref(), Some("10.0.0.5:40000"));

        let snapshot = health.get_health();
        assert_eq!(snapshot.batches_received, 2);
        assert_eq!(snapshot.batches_persisted, 2);
        assert_eq!(snapshot.streams_open, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_end_stream() {
        let store = Arc::new(Recording::default());
        let health = HealthTracker::new();
        let ingestor = Ingestor::new(store.clone(), health.clone());

        let stream = tokio_stream::iter(vec![
            Ok(wire_batch("web-01", 0)),
            Ok(wire_batch("bad", 1)),
            Ok(wire_batch("web-01", 2)),
        ]);
        let ack = ingestor.run(stream, UNKNOWN_ORIGIN).await.unwrap();

        assert!(ack.success);
        let persisted = store.persisted.lock().clone();
        assert_eq!(
            persisted,
            vec![
                ("web-01".to_string(), "unknown".to_string()),
                ("web-01".to_string(), "unknown".to_string())
            ]
        );
        assert_eq!(health.get_health().batches_failed, 1);
    }

    #[tokio::test]
    async fn test_batch_without_timestamp_is_skipped() {
        let store = Arc::new(Recording::default());
        let health = HealthTracker::new();
        let ingestor = Ingestor::new(store.clone(), health.clone());

        let mut broken = wire_batch("web-01", 0);
        broken.collected_at = None;
        let stream = tokio_stream::iter(vec![Ok(broken), Ok(wire_batch("web-01", 1))]);
        ingestor.run(stream, UNKNOWN_ORIGIN).await.unwrap();

        assert_eq!(store.persisted.lock().len(), 1);
        assert_eq!(health.get_health().batches_failed, 1);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream_and_keeps_prior_batches() {
        let store = Arc::new(Recording::default());
        let health = HealthTracker::new();
        let ingestor = Ingestor::new(store.clone(), health.clone());

        let stream = tokio_stream::iter(vec![
            Ok(wire_batch("web-01", 0)),
            Err(Status::cancelled("agent went away")),
            Ok(wire_batch("web-01", 1)),
        ]);
        let status = ingestor.run(stream, UNKNOWN_ORIGIN).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::Cancelled);
        assert_eq!(store.persisted.lock().len(), 1);
        assert_eq!(health.get_health().streams_open, 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_stream() {
        let store = Arc::new(Recording::default());
        let health = HealthTracker::new();
        let shutdown = CancellationToken::new();
        let ingestor = Ingestor::new(store.clone(), health.clone()).with_shutdown(shutdown.clone());

        // first batch, then an agent that stays connected without sending
        let stream = tokio_stream::iter(vec![Ok(wire_batch("web-01", 0))]).chain(tokio_stream::pending());
        let run = tokio::spawn(async move { ingestor.run(stream, UNKNOWN_ORIGIN).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(health.get_health().streams_open, 1);
        shutdown.cancel();

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert_eq!(store.persisted.lock().len(), 1);
        assert_eq!(health.get_health().streams_open, 0);
    }
}
