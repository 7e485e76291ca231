//! Sentinel shared protocol and data model
//!
//! Used by both ends of the telemetry pipeline:
//! - `proto`: gRPC definitions generated from `proto/sentinel/v1/telemetry.proto`
//! - `model`: batches, samples and typed tags as the agent and HQ see them
//! - `resource`: resource key derivation used by the HQ natural key
//! - `convert`: wire <-> domain conversions

pub mod convert;
pub mod model;
pub mod resource;

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("sentinel.v1");
    }
}

pub use convert::ConversionError;
pub use model::{kinds, Batch, MetricSample, Tags};
pub use proto::v1 as pb;
pub use resource::ResourceKeyResolver;
