//! Agent sender against an in-process HQ stub

use sentinel_agent::metrics::{SampleError, Sampler};
use sentinel_agent::{BatchAssembler, BatchSink, GrpcTransport, Sender, SenderSettings, Transport, TransportError};
use sentinel_common::pb::telemetry_server::{Telemetry, TelemetryServer};
use sentinel_common::{pb, MetricSample, Tags};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone, Default)]
struct Recorder {
    batches: Arc<Mutex<Vec<pb::MetricBatch>>>,
    closed: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl Telemetry for Recorder {
    async fn stream_metrics(
        &self,
        request: Request<Streaming<pb::MetricBatch>>,
    ) -> Result<Response<pb::Ack>, Status> {
        let mut stream = request.into_inner();
        while let Some(batch) = stream.message().await? {
            self.batches.lock().unwrap().push(batch);
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(pb::Ack {
            success: true,
            message: "Stream closed successfully".into(),
        }))
    }
}

struct Disk;

impl Sampler for Disk {
    fn name(&self) -> &str {
        "disk"
    }

    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError> {
        Ok(vec![MetricSample::new("disk_used_percent", 42.5)
            .with_tags(Tags::new().with_unit("percent").with_path("/"))])
    }
}

async fn start_hq(recorder: Recorder) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(TelemetryServer::new(recorder))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    addr
}

fn fast_settings() -> SenderSettings {
    SenderSettings {
        interval: Duration::from_millis(100),
        retry_delay: Duration::from_millis(100),
        close_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_batches_reach_hq_and_stream_closes_cleanly() {
    let recorder = Recorder::default();
    let addr = start_hq(recorder.clone()).await;

    let transport = GrpcTransport::new(format!("http://{}", addr), Duration::from_secs(2));
    let assembler = BatchAssembler::new("web-01").with_sampler(Disk);
    let sender = Sender::new(transport, assembler, fast_settings());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(sender.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while recorder.batches.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("HQ never received three batches");

    cancel.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.streams_opened, 1);
    assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);

    let batches = recorder.batches.lock().unwrap().clone();
    assert_eq!(batches.len() as u64, stats.batches_sent);
    for batch in &batches {
        assert_eq!(batch.source_id, "web-01");
        assert!(batch.collected_at.is_some());
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].r#type, "disk_used_percent");
        assert_eq!(batch.samples[0].tags.get("path").map(String::as_str), Some("/"));
    }
}

#[tokio::test]
async fn test_grpc_sink_close_returns_ack() {
    let recorder = Recorder::default();
    let addr = start_hq(recorder.clone()).await;

    let mut transport = GrpcTransport::new(format!("http://{}", addr), Duration::from_secs(2));
    let mut sink = transport.open().await.unwrap();
    let mut assembler = BatchAssembler::new("db-02").with_sampler(Disk);
    sink.send(assembler.collect()).await.unwrap();
    sink.send(assembler.collect()).await.unwrap();

    let ack = sink.close().await.unwrap();
    assert!(ack.success);
    assert_eq!(ack.message, "Stream closed successfully");
    assert_eq!(recorder.batches.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_connect_refused() {
    // grab a free port, then release it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = GrpcTransport::new(format!("http://{}", addr), Duration::from_secs(1));
    let err = transport.open().await.err().expect("connect should fail");
    assert!(matches!(err, TransportError::Connect { .. }));
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let mut transport = GrpcTransport::new("not a uri", Duration::from_secs(1));
    let err = transport.open().await.err().expect("endpoint should be rejected");
    assert!(matches!(err, TransportError::InvalidEndpoint(_)));
}
