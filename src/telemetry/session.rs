// One monitored container: decode -> calculate -> maybe resample disk -> emit,
// until the stats stream ends or fails.

use super::calculator::calculate;
use super::disk::{DiskSampler, DiskUsageSource};
use super::emitter::Emitter;
use crate::error::TelemetryError;
use crate::models::{DerivedSample, UsageSnapshot};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    Closed,
    Failed,
}

/// Per-container telemetry state. Owns its tick counter and cached disk
/// aggregate; nothing is shared between sessions.
pub struct TelemetrySession<S> {
    container_id: String,
    sampler: DiskSampler<S>,
    state: SessionState,
}

impl<S: DiskUsageSource> TelemetrySession<S> {
    pub fn new(container_id: impl Into<String>, disk: S, disk_refresh_ticks: u32) -> Self {
        Self {
            container_id: container_id.into(),
            sampler: DiskSampler::new(disk, disk_refresh_ticks),
            state: SessionState::Init,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn disk_refreshes(&self) -> u64 {
        self.sampler.refreshes()
    }

    /// One tick: metrics for `snapshot` plus the (possibly refreshed) disk aggregate.
    pub async fn process(&mut self, snapshot: &UsageSnapshot) -> DerivedSample {
        let metrics = calculate(snapshot);
        let disk = self.sampler.tick().await;
        DerivedSample {
            cpu_percent: metrics.cpu_percent,
            mem_usage: snapshot.mem_usage,
            mem_limit: snapshot.mem_limit,
            mem_percent: metrics.mem_percent,
            net_rx: metrics.net_rx,
            net_tx: metrics.net_tx,
            disk,
        }
    }

    /// Open the stats stream and emit one line per record to `out`.
    ///
    /// Returns the number of samples emitted once the stream ends cleanly.
    /// An open, decode or transport failure is written once as an error
    /// record and returned; samples already written stay valid.
    pub async fn run<O, St, W>(&mut self, open: O, out: W) -> Result<u64, TelemetryError>
    where
        O: Future<Output = Result<St, TelemetryError>>,
        St: Stream<Item = Result<UsageSnapshot, TelemetryError>>,
        W: AsyncWrite + Unpin,
    {
        if self.state != SessionState::Init {
            return Err(TelemetryError::Transport(format!(
                "session for {} already ran",
                self.container_id
            )));
        }
        let mut emitter = Emitter::new(self.container_id.clone(), out);

        let stream = match open.await {
            Ok(s) => s,
            Err(e) => return self.fail(&mut emitter, e).await,
        };
        let mut stream = std::pin::pin!(stream);
        self.transition(SessionState::Streaming);

        while let Some(item) = stream.next().await {
            let snapshot = match item {
                Ok(s) => s,
                Err(e) => return self.fail(&mut emitter, e).await,
            };
            let sample = self.process(&snapshot).await;
            if let Err(e) = emitter.emit(&sample).await {
                // The output channel itself is broken; nothing to report on it.
                self.transition(SessionState::Failed);
                warn!(container = %self.container_id, error = %e, "telemetry output failed");
                return Err(TelemetryError::Output(e));
            }
        }

        self.transition(SessionState::Closed);
        info!(
            container = %self.container_id,
            samples = emitter.emitted(),
            disk_refreshes = self.sampler.refreshes(),
            "stats stream ended"
        );
        Ok(emitter.emitted())
    }

    async fn fail<W: AsyncWrite + Unpin>(
        &mut self,
        emitter: &mut Emitter<W>,
        e: TelemetryError,
    ) -> Result<u64, TelemetryError> {
        self.transition(SessionState::Failed);
        warn!(container = %self.container_id, error = %e, "telemetry session failed");
        if let Err(write_err) = emitter.emit_error(&e.to_string()).await {
            debug!(error = %write_err, "could not write error record");
        }
        Err(e)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            container = %self.container_id,
            from = ?self.state,
            to = ?next,
            "telemetry session state"
        );
        self.state = next;
    }
}
