//! Service monitoring by process name
//!
//! A "service" is a configured substring. A process belongs to the first
//! configured service (in configuration order) whose lowercased name is
//! contained in the lowercased process name: "postgres" matches
//! `postgres.exe` and `postgres: checkpointer`.

use super::{round2, SampleError, Sampler, MB};
use sentinel_common::{kinds, MetricSample, Tags};
use std::collections::BTreeMap;
use sysinfo::{Pid, System};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceMatcher {
    /// Lowercased, trimmed, deduplicated, in configuration order
    services: Vec<String>,
}

impl ServiceMatcher {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for service in services {
            let service = service.as_ref().trim().to_lowercase();
            if !service.is_empty() && !normalized.contains(&service) {
                normalized.push(service);
            }
        }
        Self { services: normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Service a process name belongs to, if any
    pub fn match_name(&self, process_name: &str) -> Option<&str> {
        let lower = process_name.to_lowercase();
        self.services
            .iter()
            .find(|service| lower.contains(service.as_str()))
            .map(String::as_str)
    }

    /// Groups processes by service. Every configured service gets an entry,
    /// empty when nothing matched.
    pub fn match_processes<I>(&self, processes: I) -> BTreeMap<String, Vec<ProcessHandle>>
    where
        I: IntoIterator<Item = ProcessHandle>,
    {
        let mut matched: BTreeMap<String, Vec<ProcessHandle>> = self
            .services
            .iter()
            .map(|s| (s.clone(), Vec::new()))
            .collect();

        for process in processes {
            if let Some(service) = self.match_name(&process.name) {
                if let Some(handles) = matched.get_mut(service) {
                    handles.push(process);
                }
            }
        }
        matched
    }
}

/// Per-process CPU / memory / status of monitored services
pub struct ServiceSampler {
    sys: System,
    matcher: ServiceMatcher,
}

impl ServiceSampler {
    pub fn new(matcher: ServiceMatcher) -> Self {
        let mut sys = System::new();
        sys.refresh_processes();
        Self { sys, matcher }
    }
}

impl Sampler for ServiceSampler {
    fn name(&self) -> &str {
        "services"
    }

    fn sample(&mut self) -> Result<Vec<MetricSample>, SampleError> {
        if self.matcher.is_empty() {
            return Ok(Vec::new());
        }

        self.sys.refresh_processes();
        let processes = self.sys.processes();
        if processes.is_empty() {
            return Err(SampleError::Unavailable("process list"));
        }

        let handles = processes.iter().map(|(pid, process)| ProcessHandle {
            pid: pid.as_u32(),
            name: process.name().to_string(),
        });
        let matched = self.matcher.match_processes(handles);

        let mut samples = Vec::new();
        for (service, handles) in matched {
            if handles.is_empty() {
                samples.push(
                    MetricSample::new(kinds::SERVICE_STATUS, 0.0)
                        .with_tags(Tags::new().with_service(service.clone())),
                );
                continue;
            }

            // HQ keys rows on (service, time), pid excluded: only the first
            // process of a service is stored, the others collide and are dropped
            for handle in handles {
                let Some(process) = processes.get(&Pid::from_u32(handle.pid)) else {
                    continue;
                };
                samples.push(
                    MetricSample::new(kinds::SERVICE_CPU, round2(process.cpu_usage() as f64))
                        .with_tags(Tags::new().with_service(service.clone()).with_pid(handle.pid)),
                );
                samples.push(
                    MetricSample::new(kinds::SERVICE_MEMORY_MB, process.memory() as f64 / MB)
                        .with_tags(Tags::new().with_service(service.clone())),
                );
                samples.push(
                    MetricSample::new(kinds::SERVICE_STATUS, 1.0)
                        .with_tags(Tags::new().with_service(service.clone())),
                );
            }
        }
        Ok(samples)
    }
}
