// Incremental decoder for a raw stats byte stream: concatenated JSON records,
// no length framing. Each record ends where its top-level object closes.

use crate::error::TelemetryError;
use crate::models::{InterfaceCounters, UsageSnapshot};
use bytes::{Buf, BytesMut};
use futures_util::Stream;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

// Engine stats record, only the fields the metrics need. Missing fields read as 0.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsRecord {
    cpu_stats: CpuStats,
    precpu_stats: CpuStats,
    memory_stats: MemoryStats,
    networks: Option<HashMap<String, NetworkCounters>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuStats {
    cpu_usage: CpuUsage,
    system_cpu_usage: u64,
    online_cpus: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuUsage {
    total_usage: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoryStats {
    usage: u64,
    limit: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkCounters {
    rx_bytes: u64,
    tx_bytes: u64,
}

impl From<StatsRecord> for UsageSnapshot {
    fn from(r: StatsRecord) -> Self {
        UsageSnapshot {
            cpu_total: r.cpu_stats.cpu_usage.total_usage,
            precpu_total: r.precpu_stats.cpu_usage.total_usage,
            system_cpu: r.cpu_stats.system_cpu_usage,
            presystem_cpu: r.precpu_stats.system_cpu_usage,
            online_cpus: r.cpu_stats.online_cpus,
            mem_usage: r.memory_stats.usage,
            mem_limit: r.memory_stats.limit,
            networks: r
                .networks
                .unwrap_or_default()
                .into_iter()
                .map(|(name, n)| {
                    (
                        name,
                        InterfaceCounters {
                            rx_bytes: n.rx_bytes,
                            tx_bytes: n.tx_bytes,
                        },
                    )
                })
                .collect(),
        }
    }
}

pub struct SnapshotDecoder<R> {
    reader: R,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> SnapshotDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Next complete record. `Ok(None)` is a clean end of stream; a record cut
    /// off by the end of the stream is a decode error.
    pub async fn next_snapshot(&mut self) -> Result<Option<UsageSnapshot>, TelemetryError> {
        loop {
            if let Some(snapshot) = self.parse_buffered()? {
                return Ok(Some(snapshot));
            }
            if self.eof {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(TelemetryError::Decode(
                    "stream ended in the middle of a record".into(),
                ));
            }
            self.buf.reserve(READ_CHUNK);
            let n = self
                .reader
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| TelemetryError::Transport(e.to_string()))?;
            if n == 0 {
                self.eof = true;
            }
        }
    }

    fn parse_buffered(&mut self) -> Result<Option<UsageSnapshot>, TelemetryError> {
        let (next, consumed) = {
            let mut records =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<StatsRecord>();
            let next = records.next();
            (next, records.byte_offset())
        };
        match next {
            Some(Ok(record)) => {
                self.buf.advance(consumed);
                Ok(Some(record.into()))
            }
            // Only whitespace buffered.
            None => {
                self.buf.clear();
                Ok(None)
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(TelemetryError::Decode(e.to_string())),
        }
    }

    /// Records as a stream; ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<UsageSnapshot, TelemetryError>> {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_snapshot().await {
                Ok(Some(snapshot)) => Some((Ok(snapshot), Some(decoder))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
