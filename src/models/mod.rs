// Domain models shared by the packager and the telemetry pipeline

mod archive;
mod telemetry;

pub use archive::{ArchiveEntry, EntryKind};
pub use telemetry::{
    BuildProgress, BuildStatus, DerivedSample, DiskAggregate, DiskUsageReport, InterfaceCounters,
    StatsOutput, UsageSnapshot,
};
