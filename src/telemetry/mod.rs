// Container telemetry: stats decoding, metric derivation, disk sampling, emission

mod calculator;
mod decoder;
mod disk;
mod emitter;
mod session;

pub use calculator::{Metrics, calculate};
pub use decoder::SnapshotDecoder;
pub use disk::{DiskSampler, DiskUsageSource, NoDiskUsage};
pub use emitter::{Emitter, write_json_line};
pub use session::{SessionState, TelemetrySession};
