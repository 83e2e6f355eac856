// Docker engine access via bollard: stats streams, disk usage, image builds

mod stats;

use crate::build_context::{PackOptions, spawn_packager};
use crate::config::{BuildConfig, DockerConfig};
use crate::error::{DiskUsageError, PackError, TelemetryError};
use crate::models::{BuildProgress, BuildStatus, DiskUsageReport, UsageSnapshot};
use crate::telemetry::{DiskUsageSource, NoDiskUsage, TelemetrySession, write_json_line};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, DataUsageOptions, InspectContainerOptions, StatsOptions,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::stream::{BoxStream, Empty};
use stats::BuildEvent;
use futures_util::{StreamExt, TryStreamExt};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect(config: &DockerConfig) -> anyhow::Result<Self> {
        let docker = match config.socket.as_deref() {
            Some(socket) => {
                Docker::connect_with_unix(socket, config.timeout_secs, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?
                .with_timeout(Duration::from_secs(config.timeout_secs)),
        };
        Ok(Self { docker })
    }

    /// Open a streaming stats feed for `container_id`.
    ///
    /// The container is inspected first so an unknown id fails here, before
    /// any record is read.
    pub async fn open_stats<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Result<BoxStream<'a, Result<UsageSnapshot, TelemetryError>>, TelemetryError> {
        self.docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| TelemetryError::Connection {
                container: container_id.to_string(),
                message: e.to_string(),
            })?;

        let options = StatsOptions {
            stream: true,
            ..Default::default()
        };
        debug!(container = container_id, "opening stats stream");
        Ok(self
            .docker
            .stats(container_id, Some(options))
            .map(|item| {
                item.map(|s| stats::to_snapshot(&s))
                    .map_err(stats::stream_error)
            })
            .boxed())
    }

    /// Package `context`, stream it to the engine and report progress on `out`
    /// as one JSON line per engine message.
    pub async fn build_image<W>(
        &self,
        context: &Path,
        tag: &str,
        build: &BuildConfig,
        out: &mut W,
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_json_line(out, &BuildProgress::new(tag, BuildStatus::Building)).await?;

        let (archive, producer) = spawn_packager(context, PackOptions::from(build));
        let body = bollard::body_try_stream(archive.map_err(io::Error::other));
        let options = BuildImageOptionsBuilder::new()
            .dockerfile(&build.dockerfile)
            .t(tag)
            .rm(true)
            .build();

        let mut engine_error = None;
        {
            let progress = self.docker.build_image(options, None, Some(body));
            let mut progress = std::pin::pin!(progress);
            while let Some(item) = progress.next().await {
                match item {
                    Ok(info) => match stats::build_event(info) {
                        BuildEvent::Failed(message) => {
                            engine_error = Some(message);
                            break;
                        }
                        BuildEvent::Progress(line) => {
                            let mut update = BuildProgress::new(tag, BuildStatus::Building);
                            update.progress = Some(line);
                            write_json_line(out, &update).await?;
                        }
                        BuildEvent::Quiet => {}
                    },
                    Err(e) => {
                        engine_error = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        // The upload is finished or abandoned at this point; a consumer-side
        // close is only interesting if the engine reported nothing else.
        let packaging = match producer.await {
            Ok(Ok(summary)) => {
                debug!(entries = summary.entries, bytes = summary.bytes, "context uploaded");
                None
            }
            Ok(Err(PackError::ConsumerClosed)) if engine_error.is_some() => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("packaging task failed: {e}")),
        };

        match packaging.or(engine_error) {
            Some(message) => {
                warn!(image = tag, error = %message, "image build failed");
                let mut update = BuildProgress::new(tag, BuildStatus::Error);
                update.error = Some(message.clone());
                write_json_line(out, &update).await?;
                anyhow::bail!("build of {} failed: {}", tag, message)
            }
            None => {
                info!(image = tag, "image build completed");
                write_json_line(out, &BuildProgress::new(tag, BuildStatus::Completed)).await?;
                Ok(())
            }
        }
    }
}

/// Run one telemetry session for `container_id` against the configured engine,
/// writing JSON lines to `out`.
///
/// A client that cannot be built is reported like any other open failure: a
/// single error record on `out` and `TelemetryError::Connection`.
pub async fn stream_stats<W>(
    config: &DockerConfig,
    container_id: &str,
    disk_refresh_ticks: u32,
    out: W,
) -> Result<u64, TelemetryError>
where
    W: AsyncWrite + Unpin,
{
    match DockerRepo::connect(config) {
        Ok(repo) => {
            let mut session = TelemetrySession::new(container_id, &repo, disk_refresh_ticks);
            session.run(repo.open_stats(container_id), out).await
        }
        Err(e) => {
            warn!(container = container_id, error = %e, "cannot reach docker engine");
            let mut session = TelemetrySession::new(container_id, NoDiskUsage, disk_refresh_ticks);
            let open = async {
                Err::<Empty<Result<UsageSnapshot, TelemetryError>>, _>(
                    TelemetryError::Connection {
                        container: container_id.to_string(),
                        message: e.to_string(),
                    },
                )
            };
            session.run(open, out).await
        }
    }
}

impl DiskUsageSource for DockerRepo {
    async fn disk_usage(&self) -> Result<DiskUsageReport, DiskUsageError> {
        let options = DataUsageOptions {
            verbose: true,
            ..Default::default()
        };
        let usage = self
            .docker
            .df(Some(options))
            .await
            .map_err(|e| DiskUsageError(e.to_string()))?;
        Ok(stats::disk_report(&usage))
    }
}
