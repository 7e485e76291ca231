//! Wire <-> domain conversions

use crate::model::{Batch, MetricSample, Tags};
use crate::pb;
use chrono::{DateTime, Utc};
use prost_types::Timestamp;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("batch from '{0}' has no collected_at timestamp")]
    MissingTimestamp(String),
    #[error("timestamp out of range: {seconds}s {nanos}ns")]
    InvalidTimestamp { seconds: i64, nanos: i32 },
}

pub fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

pub fn timestamp_to_datetime(ts: &Timestamp) -> Result<DateTime<Utc>, ConversionError> {
    let invalid = || ConversionError::InvalidTimestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };
    let nanos = u32::try_from(ts.nanos).map_err(|_| invalid())?;
    DateTime::from_timestamp(ts.seconds, nanos).ok_or_else(invalid)
}

impl From<MetricSample> for pb::Metric {
    fn from(sample: MetricSample) -> Self {
        pb::Metric {
            r#type: sample.metric_type,
            value: sample.value,
            tags: sample.tags.into(),
        }
    }
}

impl From<pb::Metric> for MetricSample {
    fn from(metric: pb::Metric) -> Self {
        MetricSample {
            metric_type: metric.r#type,
            value: metric.value,
            tags: Tags::from(metric.tags),
        }
    }
}

impl From<Batch> for pb::MetricBatch {
    fn from(batch: Batch) -> Self {
        pb::MetricBatch {
            source_id: batch.source_id,
            collected_at: Some(datetime_to_timestamp(batch.collected_at)),
            samples: batch.samples.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<pb::MetricBatch> for Batch {
    type Error = ConversionError;

    fn try_from(batch: pb::MetricBatch) -> Result<Self, Self::Error> {
        let collected_at = match &batch.collected_at {
            Some(ts) => timestamp_to_datetime(ts)?,
            None => return Err(ConversionError::MissingTimestamp(batch.source_id)),
        };
        Ok(Batch {
            source_id: batch.source_id,
            collected_at,
            samples: batch.samples.into_iter().map(Into::into).collect(),
        })
    }
}
