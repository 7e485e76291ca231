use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the metrics log, as served by `GET /metrics/{source_id}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SampleRow {
    pub time: DateTime<Utc>,
    pub source_id: String,
    pub metric_type: String,
    pub resource: String,
    pub value: f64,
    pub tags: serde_json::Value,
}

/// Liveness record of one source
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerStatus {
    pub source_id: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Latest `service_status` reading of one service
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceStatus {
    pub service_name: String,
    pub status: f64,
    pub last_seen: DateTime<Utc>,
}
