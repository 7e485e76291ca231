//! Sentinel Agent - host health telemetry
//!
//! Samples CPU, memory, disks and monitored services on a fixed period and
//! streams the batches to Sentinel HQ over one long-lived gRPC stream,
//! reconnecting with a fixed delay whenever the stream breaks.

pub mod collector;
pub mod config;
pub mod metrics;
pub mod sender;
pub mod transport;

pub use collector::BatchAssembler;
pub use config::AgentConfig;
pub use sender::{Sender, SenderSettings, SenderState, SenderStats};
pub use transport::{BatchSink, GrpcTransport, Transport, TransportError};
