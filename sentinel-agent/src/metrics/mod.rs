//! System metrics sampling for Sentinel agents
//!
//! Each sampler produces the samples of one concern for one collection tick:
//! - CPU usage
//! - Memory usage statistics
//! - Disk usage per configured mount point
//! - Monitored services (see `services`)
//!
//! Samplers keep their `sysinfo` handles between ticks so CPU percentages are
//! measured over the whole collection interval.

pub mod services;

use sentinel_common::{kinds, MetricSample, Tags};
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};
use tracing::debug;

pub use services::{ProcessHandle, ServiceMatcher, ServiceSampler};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("{0} information unavailable")]
    Unavailable(&'static str),
    #[error("no disk mounted at {0}")]
    DiskNotFound(String),
}

/// One source of samples, polled once per collection tick
pub trait Sampler: Send {
    fn name(&self) -> &str;

    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError>;
}

/// Two decimals, like the values shown on the dashboard
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Global CPU usage
pub struct CpuSampler {
    sys: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        // first reading is the baseline for the next tick
        sys.refresh_cpu_usage();
        Self { sys }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    fn name(&self) -> &str {
        "cpu"
    }

    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError> {
        self.sys.refresh_cpu_usage();
        if self.sys.cpus().is_empty() {
            return Err(SampleError::Unavailable("cpu"));
        }

        let percent = self.sys.global_cpu_info().cpu_usage() as f64;
        Ok(vec![MetricSample::new(kinds::CPU_USAGE, round2(percent))
            .with_tags(Tags::new().with_unit("percent"))])
    }
}

/// Memory usage metrics
pub struct MemorySampler {
    sys: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MemorySampler {
    fn name(&self) -> &str {
        "memory"
    }

    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError> {
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        if total == 0 {
            return Err(SampleError::Unavailable("memory"));
        }
        let available = self.sys.available_memory();
        let free = self.sys.free_memory();
        let used_percent = (total.saturating_sub(available)) as f64 / total as f64 * 100.0;

        let mb = || Tags::new().with_unit("mb");
        Ok(vec![
            MetricSample::new(kinds::MEMORY_USED_PERCENT, round2(used_percent))
                .with_tags(Tags::new().with_unit("percent")),
            MetricSample::new(kinds::MEMORY_FREE_MB, free as f64 / MB).with_tags(mb()),
            MetricSample::new(kinds::MEMORY_TOTAL_MB, total as f64 / MB).with_tags(mb()),
            MetricSample::new(kinds::MEMORY_AVAILABLE_MB, available as f64 / MB).with_tags(mb()),
        ])
    }
}

/// Disk usage for a set of mount points
pub struct DiskSampler {
    disks: Disks,
    paths: Vec<PathBuf>,
}

impl DiskSampler {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            disks: Disks::new_with_refreshed_list(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn usage(&self, path: &Path) -> Result<Vec<MetricSample>, SampleError> {
        let disk = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == path)
            .ok_or_else(|| SampleError::DiskNotFound(path.display().to_string()))?;

        let total = disk.total_space();
        let available = disk.available_space();
        let used_percent = if total > 0 {
            total.saturating_sub(available) as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let label = path.display().to_string();
        Ok(vec![
            MetricSample::new(kinds::DISK_FREE_GB, available as f64 / GB)
                .with_tags(Tags::new().with_unit("gb").with_path(label.clone())),
            MetricSample::new(kinds::DISK_USED_PERCENT, round2(used_percent))
                .with_tags(Tags::new().with_unit("percent").with_path(label)),
        ])
    }
}

impl Sampler for DiskSampler {
    fn name(&self) -> &str {
        "disk"
    }

    /// Fails as a whole when any configured mount point is missing
    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError> {
        self.disks.refresh_list();

        let mut samples = Vec::with_capacity(self.paths.len() * 2);
        for path in &self.paths {
            samples.extend(self.usage(path)?);
        }
        debug!("Sampled {} disk(s)", self.paths.len());
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(0.004), 0.0);
        assert_eq!(round2(99.996), 100.0);
    }

    #[test]
    fn test_memory_sampler() {
        let samples = MemorySampler::new().sample().unwrap();
        let types: Vec<_> = samples.iter().map(|s| s.metric_type.as_str()).collect();

        assert_eq!(
            types,
            vec![
                kinds::MEMORY_USED_PERCENT,
                kinds::MEMORY_FREE_MB,
                kinds::MEMORY_TOTAL_MB,
                kinds::MEMORY_AVAILABLE_MB
            ]
        );
        assert!(samples[2].value > 0.0);
        assert!((0.0..=100.0).contains(&samples[0].value));
    }

    #[test]
    fn test_cpu_sampler_tags() {
        let samples = CpuSampler::new().sample().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].tags.unit.as_deref(), Some("percent"));
    }

    #[test]
    fn test_unknown_mount_point() {
        let mut sampler = DiskSampler::new(["/definitely/not/a/mount/point"]);
        let err = sampler.sample().unwrap_err();
        assert!(matches!(err, SampleError::DiskNotFound(_)));
    }
}
