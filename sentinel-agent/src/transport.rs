//! Outbound telemetry stream
//!
//! `Transport::open` = connect + start one client stream. The returned sink
//! owns the connection: dropping it releases everything. `close` ends the
//! stream cleanly and waits for HQ's acknowledgement.

use sentinel_common::pb::telemetry_client::TelemetryClient;
use sentinel_common::{pb, Batch};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Endpoint;
use tracing::debug;

/// Batches buffered between the sender and the HTTP/2 stream
const STREAM_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid HQ endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("stream failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("stream closed by HQ")]
    StreamClosed,
    #[error("stream task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait Transport: Send {
    type Sink: BatchSink;

    fn open(&mut self) -> impl Future<Output = Result<Self::Sink, TransportError>> + Send;
}

pub trait BatchSink: Send {
    fn send(&mut self, batch: Batch) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(self) -> impl Future<Output = Result<pb::Ack, TransportError>> + Send;
}

/// tonic client stream to HQ's `StreamMetrics`
pub struct GrpcTransport {
    endpoint: String,
    connect_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
        }
    }
}

impl Transport for GrpcTransport {
    type Sink = GrpcSink;

    async fn open(&mut self) -> Result<GrpcSink, TransportError> {
        let channel = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|_| TransportError::InvalidEndpoint(self.endpoint.clone()))?
            .connect_timeout(self.connect_timeout)
            .connect()
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let mut client = TelemetryClient::new(channel);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        // the call resolves only once the request stream ends (or fails)
        let call = tokio::spawn(async move {
            client
                .stream_metrics(ReceiverStream::new(rx))
                .await
                .map(tonic::Response::into_inner)
        });
        debug!("Opened StreamMetrics on {}", self.endpoint);

        Ok(GrpcSink { tx, call: Some(call) })
    }
}

pub struct GrpcSink {
    tx: mpsc::Sender<pb::MetricBatch>,
    call: Option<JoinHandle<Result<pb::Ack, tonic::Status>>>,
}

impl GrpcSink {
    /// Why the call ended. The request stream is gone once the call returns.
    async fn failure(&mut self) -> TransportError {
        match self.call.take() {
            Some(call) => match call.await {
                Ok(Err(status)) => TransportError::Rpc(status),
                Ok(Ok(_)) => TransportError::StreamClosed,
                Err(e) => TransportError::Task(e),
            },
            None => TransportError::StreamClosed,
        }
    }
}

impl BatchSink for GrpcSink {
    async fn send(&mut self, batch: Batch) -> Result<(), TransportError> {
        if self.call.is_none() {
            return Err(TransportError::StreamClosed);
        }
        match self.tx.send(batch.into()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.failure().await),
        }
    }

    async fn close(self) -> Result<pb::Ack, TransportError> {
        let GrpcSink { tx, call } = self;
        // end of stream
        drop(tx);
        match call {
            Some(call) => Ok(call.await??),
            None => Err(TransportError::StreamClosed),
        }
    }
}
