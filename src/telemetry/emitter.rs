// Line-oriented JSON output: one self-describing record per line, flushed as written

use crate::models::{DerivedSample, StatsOutput};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serialize `record` as one JSON line and flush it.
pub async fn write_json_line<W, T>(out: &mut W, record: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await
}

/// Writes a session's samples for one container, in the order given.
pub struct Emitter<W> {
    container_id: String,
    out: W,
    emitted: u64,
}

impl<W: AsyncWrite + Unpin> Emitter<W> {
    pub fn new(container_id: impl Into<String>, out: W) -> Self {
        Self {
            container_id: container_id.into(),
            out,
            emitted: 0,
        }
    }

    pub async fn emit(&mut self, sample: &DerivedSample) -> io::Result<()> {
        write_json_line(
            &mut self.out,
            &StatsOutput::sample(&self.container_id, sample),
        )
        .await?;
        self.emitted += 1;
        Ok(())
    }

    pub async fn emit_error(&mut self, message: &str) -> io::Result<()> {
        write_json_line(
            &mut self.out,
            &StatsOutput::error(&self.container_id, message),
        )
        .await
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
