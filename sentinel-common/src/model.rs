//! Telemetry data model
//!
//! A `Batch` is one collection tick from one host: every sample in it shares
//! the batch's `collected_at`. Tags keep typed access to the names the
//! pipeline relies on (unit, path, service, pid) while preserving any other
//! key/value pair untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Metric type names emitted by the agent samplers
pub mod kinds {
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const MEMORY_USED_PERCENT: &str = "memory_used_percent";
    pub const MEMORY_FREE_MB: &str = "memory_free_mb";
    pub const MEMORY_TOTAL_MB: &str = "memory_total_mb";
    pub const MEMORY_AVAILABLE_MB: &str = "memory_available_mb";
    pub const DISK_FREE_GB: &str = "disk_free_gb";
    pub const DISK_USED_PERCENT: &str = "disk_used_percent";
    pub const SERVICE_CPU: &str = "service_cpu";
    pub const SERVICE_MEMORY_MB: &str = "service_memory_mb";
    /// 1 = at least one matching process is running, 0 = none found
    pub const SERVICE_STATUS: &str = "service_status";
}

pub const TAG_UNIT: &str = "unit";
pub const TAG_PATH: &str = "path";
pub const TAG_SERVICE: &str = "service";
pub const TAG_PID: &str = "pid";

/// Dimensional context of a sample.
///
/// Serializes as a flat string map, exactly like the wire representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Tags {
    pub unit: Option<String>,
    pub path: Option<String>,
    pub service: Option<String>,
    pub pid: Option<u32>,
    /// Tags with no typed field (and a `pid` that is not a canonical number)
    pub extra: BTreeMap<String, String>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Builder form of [`Tags::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Routes a raw key/value pair to its typed field, or to `extra`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            TAG_UNIT => self.unit = Some(value),
            TAG_PATH => self.path = Some(value),
            TAG_SERVICE => self.service = Some(value),
            // only a canonical pid is typed, anything else stays raw
            TAG_PID => match value.parse::<u32>() {
                Ok(pid) if pid.to_string() == value => self.pid = Some(pid),
                _ => {
                    self.extra.insert(key, value);
                }
            },
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    /// Looks a tag up by its raw name, typed fields included
    pub fn get(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            TAG_UNIT => self.unit.as_deref().map(Cow::Borrowed),
            TAG_PATH => self.path.as_deref().map(Cow::Borrowed),
            TAG_SERVICE => self.service.as_deref().map(Cow::Borrowed),
            TAG_PID => match self.pid {
                Some(pid) => Some(Cow::Owned(pid.to_string())),
                None => self.extra.get(name).map(|v| Cow::Borrowed(v.as_str())),
            },
            _ => self.extra.get(name).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    pub fn len(&self) -> usize {
        self.unit.is_some() as usize
            + self.path.is_some() as usize
            + self.service.is_some() as usize
            + self.pid.is_some() as usize
            + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat map view, keys sorted
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        if let Some(unit) = &self.unit {
            map.insert(TAG_UNIT.to_string(), unit.clone());
        }
        if let Some(path) = &self.path {
            map.insert(TAG_PATH.to_string(), path.clone());
        }
        if let Some(service) = &self.service {
            map.insert(TAG_SERVICE.to_string(), service.clone());
        }
        if let Some(pid) = self.pid {
            map.insert(TAG_PID.to_string(), pid.to_string());
        }
        map
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<HashMap<String, String>> for Tags {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Tags> for BTreeMap<String, String> {
    fn from(tags: Tags) -> Self {
        tags.to_map()
    }
}

impl From<Tags> for HashMap<String, String> {
    fn from(tags: Tags) -> Self {
        tags.to_map().into_iter().collect()
    }
}

/// One sampled quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

impl MetricSample {
    pub fn new(metric_type: impl Into<String>, value: f64) -> Self {
        Self {
            metric_type: metric_type.into(),
            value,
            tags: Tags::default(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// All samples of one collection tick for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub source_id: String,
    pub collected_at: DateTime<Utc>,
    pub samples: Vec<MetricSample>,
}

impl Batch {
    pub fn new(source_id: impl Into<String>, collected_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            collected_at,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_are_typed() {
        let tags: Tags = [("unit", "percent"), ("pid", "4242"), ("core", "3")]
            .into_iter()
            .collect();

        assert_eq!(tags.unit.as_deref(), Some("percent"));
        assert_eq!(tags.pid, Some(4242));
        assert_eq!(tags.extra.get("core").map(String::as_str), Some("3"));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_non_numeric_pid_kept_verbatim() {
        let tags = Tags::new().with("pid", "\u{1f4a5}");

        assert_eq!(tags.pid, None);
        assert_eq!(tags.get("pid").as_deref(), Some("\u{1f4a5}"));
        assert_eq!(tags.to_map().get("pid").map(String::as_str), Some("\u{1f4a5}"));
    }

    #[test]
    fn test_non_canonical_pid_round_trips() {
        for raw in ["0042", "+7", " 9"] {
            let tags = Tags::new().with("pid", raw).with_service("nginx");

            assert_eq!(tags.pid, None, "{raw}");
            assert_eq!(tags.get("pid").as_deref(), Some(raw));
            assert_eq!(tags.to_map().get("pid").map(String::as_str), Some(raw));
        }
    }

    #[test]
    fn test_tags_json_is_flat_string_map() {
        let tags = Tags::new().with_service("postgres").with_pid(17);
        let json = serde_json::to_value(&tags).unwrap();

        assert_eq!(json, serde_json::json!({"service": "postgres", "pid": "17"}));

        let back: Tags = serde_json::from_value(json).unwrap();
        assert_eq!(back, tags);
    }

    #[test]
    fn test_empty_tags() {
        let tags = Tags::new();
        assert!(tags.is_empty());
        assert!(tags.get("service").is_none());
        assert!(tags.to_map().is_empty());
    }
}
