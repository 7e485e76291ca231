//! Batch assembly: one call per collection tick
//!
//! The batch timestamp is taken once, before any sampler runs, and shared by
//! every sample. A failing sampler is logged and skipped; whatever the other
//! samplers produced is still sent, even if that is nothing.

use crate::config::AgentConfig;
use crate::metrics::{CpuSampler, DiskSampler, MemorySampler, Sampler, ServiceMatcher, ServiceSampler};
use chrono::Utc;
use sentinel_common::Batch;
use tracing::{debug, warn};

pub struct BatchAssembler {
    source_id: String,
    samplers: Vec<Box<dyn Sampler>>,
}

impl BatchAssembler {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            samplers: Vec::new(),
        }
    }

    /// CPU, memory, disks and configured services
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.source_id())
            .with_sampler(CpuSampler::new())
            .with_sampler(MemorySampler::new())
            .with_sampler(DiskSampler::new(config.monitoring.disk_paths.iter()))
            .with_sampler(ServiceSampler::new(ServiceMatcher::new(&config.monitoring.services)))
    }

    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.samplers.push(Box::new(sampler));
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn collect(&mut self) -> Batch {
        let mut batch = Batch::new(self.source_id.clone(), Utc::now());

        for sampler in self.samplers.iter_mut() {
            match sampler.sample() {
                Ok(samples) => batch.samples.extend(samples),
                Err(e) => warn!("Error getting {}: {}", sampler.name(), e),
            }
        }

        debug!("Collected {} metrics", batch.len());
        batch
    }
}
