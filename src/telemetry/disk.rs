// Tick-gated disk usage sampling. The disk query is expensive, so one session
// refreshes it on its first tick and then once every `refresh_every` ticks.

use crate::error::DiskUsageError;
use crate::models::{DiskAggregate, DiskUsageReport};
use std::future::Future;
use tracing::{debug, warn};

/// Where disk usage comes from (the engine, or a stand-in).
pub trait DiskUsageSource {
    fn disk_usage(&self) -> impl Future<Output = Result<DiskUsageReport, DiskUsageError>> + Send;
}

/// Reports nothing; every aggregate stays zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiskUsage;

impl DiskUsageSource for NoDiskUsage {
    async fn disk_usage(&self) -> Result<DiskUsageReport, DiskUsageError> {
        Ok(DiskUsageReport::default())
    }
}

impl<T: DiskUsageSource + Sync> DiskUsageSource for &T {
    fn disk_usage(&self) -> impl Future<Output = Result<DiskUsageReport, DiskUsageError>> + Send {
        (**self).disk_usage()
    }
}

pub struct DiskSampler<S> {
    source: S,
    refresh_every: u32,
    ticks: u32,
    current: DiskAggregate,
    refreshes: u64,
}

impl<S: DiskUsageSource> DiskSampler<S> {
    pub fn new(source: S, refresh_every: u32) -> Self {
        Self {
            source,
            refresh_every: refresh_every.max(1),
            ticks: 0,
            current: DiskAggregate::default(),
            refreshes: 0,
        }
    }

    /// Account for one processed record and return the aggregate to pair with it.
    /// Refreshes on ticks 1, 1 + n, 1 + 2n, ...
    pub async fn tick(&mut self) -> DiskAggregate {
        if self.ticks == 0 {
            self.refresh().await;
        }
        self.ticks += 1;
        if self.ticks >= self.refresh_every {
            self.ticks = 0;
        }
        self.current
    }

    /// A failed query keeps the previous aggregate.
    async fn refresh(&mut self) {
        self.refreshes += 1;
        match self.source.disk_usage().await {
            Ok(report) => {
                self.current = report.aggregate();
                debug!(
                    operation = "disk_usage",
                    total = self.current.total(),
                    "disk aggregate refreshed"
                );
            }
            Err(e) => warn!(
                error = %e,
                operation = "disk_usage",
                "keeping previous disk aggregate"
            ),
        }
    }

    /// Number of disk queries issued so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Reports `calls * 100` bytes of images so each refresh is visible.
    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
    }

    impl DiskUsageSource for Counting {
        async fn disk_usage(&self) -> Result<DiskUsageReport, DiskUsageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(DiskUsageReport {
                images: vec![Some(n as i64 * 100)],
                ..Default::default()
            })
        }
    }

    struct Failing;

    impl DiskUsageSource for Failing {
        async fn disk_usage(&self) -> Result<DiskUsageReport, DiskUsageError> {
            Err(DiskUsageError("engine unreachable".into()))
        }
    }

    #[tokio::test]
    async fn refreshes_on_first_and_every_tenth_tick_after() {
        let source = Counting::default();
        let mut sampler = DiskSampler::new(&source, 10);
        let mut refreshed_on = Vec::new();
        let mut last = None;
        for tick in 1..=25 {
            let agg = sampler.tick().await;
            if last != Some(agg) {
                refreshed_on.push(tick);
            }
            last = Some(agg);
        }
        assert_eq!(refreshed_on, vec![1, 11, 21]);
        assert_eq!(sampler.refreshes(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_aggregate() {
        let mut sampler = DiskSampler::new(Failing, 2);
        for _ in 0..5 {
            assert_eq!(sampler.tick().await, DiskAggregate::default());
        }
        assert_eq!(sampler.refreshes(), 3);
    }

    #[test]
    fn report_sums_only_positive_sizes() {
        let report = DiskUsageReport {
            images: vec![Some(10), Some(-1), None, Some(5)],
            containers: vec![Some(0), Some(7)],
            volumes: vec![None],
            build_cache: vec![Some(3), Some(3)],
        };
        let agg = report.aggregate();
        assert_eq!(agg.images, 15);
        assert_eq!(agg.containers, 7);
        assert_eq!(agg.volumes, 0);
        assert_eq!(agg.build_cache, 6);
        assert_eq!(agg.total(), 28);
    }

    #[test]
    fn huge_reported_sizes_saturate() {
        let report = DiskUsageReport {
            images: vec![Some(i64::MAX), Some(i64::MAX), Some(i64::MAX)],
            containers: vec![Some(i64::MAX)],
            volumes: vec![Some(i64::MAX)],
            build_cache: vec![Some(1)],
        };
        let agg = report.aggregate();
        assert_eq!(agg.images, u64::MAX);
        assert_eq!(agg.containers, i64::MAX as u64);
        assert_eq!(agg.total(), u64::MAX);
    }
}
