// Map raw Docker API responses (stats, system df) into telemetry models.

use crate::error::TelemetryError;
use crate::models::{DiskUsageReport, InterfaceCounters, UsageSnapshot};
use bollard::models::{BuildInfo, ContainerStatsResponse, SystemDataUsageResponse};
use serde_json::Value;

/// Flatten a Docker stats response into a snapshot. Missing sections read as 0,
/// as they do on the first record of a stream.
pub(crate) fn to_snapshot(s: &ContainerStatsResponse) -> UsageSnapshot {
    let cpu_stats = s.cpu_stats.as_ref();
    let precpu_stats = s.precpu_stats.as_ref();

    let total_usage = |c: Option<&bollard::models::ContainerCpuStats>| {
        c.and_then(|c| c.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0)
    };

    let networks = s
        .networks
        .as_ref()
        .map(|n| {
            n.iter()
                .map(|(name, v)| {
                    (
                        name.clone(),
                        InterfaceCounters {
                            rx_bytes: v.rx_bytes.unwrap_or(0),
                            tx_bytes: v.tx_bytes.unwrap_or(0),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    UsageSnapshot {
        cpu_total: total_usage(cpu_stats),
        precpu_total: total_usage(precpu_stats),
        system_cpu: cpu_stats.and_then(|c| c.system_cpu_usage).unwrap_or(0),
        presystem_cpu: precpu_stats.and_then(|c| c.system_cpu_usage).unwrap_or(0),
        online_cpus: cpu_stats.and_then(|c| c.online_cpus).unwrap_or(0),
        mem_usage: s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0),
        mem_limit: s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0),
        networks,
    }
}

/// Malformed payloads are decode failures; everything else is transport.
pub(crate) fn stream_error(e: bollard::errors::Error) -> TelemetryError {
    use bollard::errors::Error;
    match e {
        Error::JsonDataError { .. } | Error::JsonSerdeError { .. } => {
            TelemetryError::Decode(e.to_string())
        }
        other => TelemetryError::Transport(other.to_string()),
    }
}

/// What one engine build message means for the caller.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BuildEvent {
    Progress(String),
    Failed(String),
    Quiet,
}

pub(crate) fn build_event(info: BuildInfo) -> BuildEvent {
    if let Some(message) = info.error_detail.and_then(|d| d.message) {
        return BuildEvent::Failed(message);
    }
    match info.stream.as_deref().map(str::trim) {
        Some(line) if !line.is_empty() => BuildEvent::Progress(line.to_string()),
        _ => BuildEvent::Quiet,
    }
}

/// Per-resource sizes from a `system df` response. Verbose responses list
/// items; otherwise the section total stands in as a single entry.
pub(crate) fn disk_report(usage: &SystemDataUsageResponse) -> DiskUsageReport {
    fn sizes(items: Option<&Vec<Value>>, total: Option<i64>, pointer: &str) -> Vec<Option<i64>> {
        match items {
            Some(items) => items
                .iter()
                .map(|i| i.pointer(pointer).and_then(Value::as_i64))
                .collect(),
            None => vec![total],
        }
    }

    let images = usage.image_usage.as_ref();
    let containers = usage.container_usage.as_ref();
    let volumes = usage.volume_usage.as_ref();
    let build_cache = usage.build_cache_usage.as_ref();

    DiskUsageReport {
        images: sizes(
            images.and_then(|u| u.items.as_ref()),
            images.and_then(|u| u.total_size),
            "/Size",
        ),
        containers: sizes(
            containers.and_then(|u| u.items.as_ref()),
            containers.and_then(|u| u.total_size),
            "/SizeRw",
        ),
        volumes: sizes(
            volumes.and_then(|u| u.items.as_ref()),
            volumes.and_then(|u| u.total_size),
            "/UsageData/Size",
        ),
        build_cache: sizes(
            build_cache.and_then(|u| u.items.as_ref()),
            build_cache.and_then(|u| u.total_size),
            "/Size",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        BuildCacheDiskUsage, ContainerCpuStats, ContainerCpuUsage, ContainerMemoryStats,
        ContainerNetworkStats, ContainerStatsResponse, ImagesDiskUsage, VolumesDiskUsage,
    };
    use serde_json::json;
    use std::collections::HashMap;

    fn minimal_cpu_stats(total_usage: u64, system_cpu_usage: u64) -> ContainerCpuStats {
        ContainerCpuStats {
            cpu_usage: Some(ContainerCpuUsage {
                total_usage: Some(total_usage),
                ..Default::default()
            }),
            system_cpu_usage: Some(system_cpu_usage),
            online_cpus: Some(2),
            throttling_data: None,
        }
    }

    #[test]
    fn to_snapshot_defaults_missing_sections_to_zero() {
        let s = ContainerStatsResponse {
            cpu_stats: None,
            precpu_stats: Some(minimal_cpu_stats(0, 0)),
            ..Default::default()
        };
        let out = to_snapshot(&s);
        assert_eq!(out.cpu_total, 0);
        assert_eq!(out.online_cpus, 0);
        assert!(out.networks.is_empty());
    }

    #[test]
    fn to_snapshot_carries_cpu_memory_and_networks() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100_000_000, 1_000_000_000)),
            precpu_stats: Some(minimal_cpu_stats(50_000_000, 500_000_000)),
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(256 * 1024 * 1024),
                limit: Some(512 * 1024 * 1024),
                ..Default::default()
            }),
            networks: Some({
                let mut m = HashMap::new();
                m.insert(
                    "eth0".to_string(),
                    ContainerNetworkStats {
                        rx_bytes: Some(1000),
                        tx_bytes: Some(2000),
                        ..Default::default()
                    },
                );
                m
            }),
            ..Default::default()
        };
        let out = to_snapshot(&s);
        assert_eq!(out.cpu_total, 100_000_000);
        assert_eq!(out.precpu_total, 50_000_000);
        assert_eq!(out.system_cpu, 1_000_000_000);
        assert_eq!(out.presystem_cpu, 500_000_000);
        assert_eq!(out.online_cpus, 2);
        assert_eq!(out.mem_usage, 256 * 1024 * 1024);
        assert_eq!(out.mem_limit, 512 * 1024 * 1024);
        assert_eq!(out.networks["eth0"].rx_bytes, 1000);

        let m = crate::telemetry::calculate(&out);
        assert!((m.cpu_percent - 20.0).abs() < 0.01);
        assert!((m.mem_percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn disk_report_reads_verbose_items() {
        let usage = SystemDataUsageResponse {
            image_usage: Some(ImagesDiskUsage {
                items: Some(vec![json!({"Size": 100}), json!({"Size": -1}), json!({})]),
                total_size: Some(999),
                ..Default::default()
            }),
            volume_usage: Some(VolumesDiskUsage {
                items: Some(vec![json!({"UsageData": {"Size": 42, "RefCount": 1}})]),
                ..Default::default()
            }),
            build_cache_usage: Some(BuildCacheDiskUsage {
                total_size: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = disk_report(&usage);
        assert_eq!(report.images, vec![Some(100), Some(-1), None]);
        assert_eq!(report.containers, vec![None]);
        assert_eq!(report.volumes, vec![Some(42)]);
        assert_eq!(report.build_cache, vec![Some(7)]);

        let agg = report.aggregate();
        assert_eq!(agg.images, 100);
        assert_eq!(agg.containers, 0);
        assert_eq!(agg.total(), 149);
    }

    #[test]
    fn build_event_reads_error_detail_and_trims_stream() {
        let failed = BuildInfo {
            stream: Some("Step 2/3\n".into()),
            error_detail: Some(bollard::models::ErrorDetail {
                message: Some("COPY failed: no such file".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            build_event(failed),
            BuildEvent::Failed("COPY failed: no such file".into())
        );

        let step = BuildInfo {
            stream: Some("Step 1/3 : FROM scratch\n".into()),
            ..Default::default()
        };
        assert_eq!(
            build_event(step),
            BuildEvent::Progress("Step 1/3 : FROM scratch".into())
        );

        let blank = BuildInfo {
            stream: Some("\n".into()),
            ..Default::default()
        };
        assert_eq!(build_event(blank), BuildEvent::Quiet);
        assert_eq!(build_event(BuildInfo::default()), BuildEvent::Quiet);
    }

    #[test]
    fn stream_error_classifies_json_failures_as_decode() {
        let bad = serde_json::from_str::<u64>("x").unwrap_err();
        let e = stream_error(bollard::errors::Error::JsonSerdeError { err: bad });
        assert!(matches!(e, TelemetryError::Decode(_)));

        let e = stream_error(bollard::errors::Error::RequestTimeoutError);
        assert!(matches!(e, TelemetryError::Transport(_)));
    }
}
