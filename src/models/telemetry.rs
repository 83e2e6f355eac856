// Telemetry models: decoded usage snapshots, derived samples and output records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// One self-contained stats record. Carries both the current and the previous
/// cumulative CPU counters, so no other record is needed to derive metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u32,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub networks: BTreeMap<String, InterfaceCounters>,
}

/// Summed byte totals across the engine's disk consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskAggregate {
    pub images: u64,
    pub containers: u64,
    pub volumes: u64,
    pub build_cache: u64,
}

impl DiskAggregate {
    pub fn total(&self) -> u64 {
        self.images
            .saturating_add(self.containers)
            .saturating_add(self.volumes)
            .saturating_add(self.build_cache)
    }
}

/// Raw result of a disk usage query: one optional size per resource.
#[derive(Debug, Clone, Default)]
pub struct DiskUsageReport {
    pub images: Vec<Option<i64>>,
    pub containers: Vec<Option<i64>>,
    pub volumes: Vec<Option<i64>>,
    pub build_cache: Vec<Option<i64>>,
}

impl DiskUsageReport {
    /// Sum each list, counting only entries that report a positive size.
    pub fn aggregate(&self) -> DiskAggregate {
        fn positive_sum(sizes: &[Option<i64>]) -> u64 {
            sizes
                .iter()
                .filter_map(|s| *s)
                .filter(|s| *s > 0)
                .fold(0u64, |acc, s| acc.saturating_add(s as u64))
        }
        DiskAggregate {
            images: positive_sum(&self.images),
            containers: positive_sum(&self.containers),
            volumes: positive_sum(&self.volumes),
            build_cache: positive_sum(&self.build_cache),
        }
    }
}

/// Metrics for one tick, paired with the session's current disk aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedSample {
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub disk: DiskAggregate,
}

/// Line record written to the output channel, one per sample or session failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsOutput {
    pub container_id: String,
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub net_rx: u64,
    pub net_tx: u64,
    pub disk_images: u64,
    pub disk_containers: u64,
    pub disk_volumes: u64,
    pub disk_build_cache: u64,
    pub disk_total: u64,
}

impl StatsOutput {
    pub fn sample(container_id: &str, s: &DerivedSample) -> Self {
        Self {
            container_id: container_id.to_string(),
            cpu_percent: s.cpu_percent,
            mem_usage: s.mem_usage,
            mem_limit: s.mem_limit,
            mem_percent: s.mem_percent,
            error: None,
            net_rx: s.net_rx,
            net_tx: s.net_tx,
            disk_images: s.disk.images,
            disk_containers: s.disk.containers,
            disk_volumes: s.disk.volumes,
            disk_build_cache: s.disk.build_cache,
            disk_total: s.disk.total(),
        }
    }

    pub fn error(container_id: &str, message: impl Into<String>) -> Self {
        Self {
            container_id: container_id.to_string(),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Image build status; serializes to lowercase JSON (e.g. "building").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Building,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildProgress {
    pub image: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildProgress {
    pub fn new(image: &str, status: BuildStatus) -> Self {
        Self {
            image: image.to_string(),
            status,
            progress: None,
            error: None,
        }
    }
}
