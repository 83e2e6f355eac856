use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use easydocker::build_context::{PackOptions, spawn_packager};
use easydocker::config::AppConfig;
use easydocker::docker_repo::{DockerRepo, stream_stats};
use easydocker::telemetry::{DiskUsageSource, NoDiskUsage, SnapshotDecoder, TelemetrySession};
use easydocker::version;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[derive(Parser)]
#[command(name = version::NAME, version = version::VERSION, about = "Build images from streamed contexts and watch container usage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package a directory and build an image from it
    Build {
        context: PathBuf,
        #[arg(short, long)]
        tag: String,
    },
    /// Stream usage samples for a running container as JSON lines
    Stream { container: String },
    /// Replay a recorded stats stream ("-" for stdin) through a telemetry session
    Replay {
        path: String,
        #[arg(long, default_value = "replay")]
        container: String,
        /// Leave disk totals at zero instead of asking the engine
        #[arg(long)]
        no_disk: bool,
    },
    /// Write the build context archive to a file or stdout
    Pack {
        context: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app_config = AppConfig::load()?;
    tracing::debug!(name = version::NAME, version = version::VERSION, "starting");

    match cli.command {
        Command::Build { context, tag } => {
            let repo = DockerRepo::connect(&app_config.docker)?;
            let mut out = tokio::io::stdout();
            repo.build_image(&context, &tag, &app_config.build, &mut out)
                .await?;
        }
        Command::Stream { container } => {
            let ticks = app_config.telemetry.disk_refresh_ticks;
            stream_stats(&app_config.docker, &container, ticks, tokio::io::stdout()).await?;
        }
        Command::Replay {
            path,
            container,
            no_disk,
        } => {
            let input: Box<dyn AsyncRead + Unpin + Send> = if path == "-" {
                Box::new(tokio::io::stdin())
            } else {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path))?;
                Box::new(file)
            };
            let ticks = app_config.telemetry.disk_refresh_ticks;
            let engine = if no_disk {
                None
            } else {
                match DockerRepo::connect(&app_config.docker) {
                    Ok(repo) => Some(repo),
                    Err(e) => {
                        tracing::warn!(error = %e, "engine unavailable, disk totals stay zero");
                        None
                    }
                }
            };
            match engine {
                Some(repo) => replay(&container, input, &repo, ticks).await?,
                None => replay(&container, input, NoDiskUsage, ticks).await?,
            }
        }
        Command::Pack { context, output } => {
            let (archive, producer) =
                spawn_packager(context, PackOptions::from(&app_config.build));
            let written = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    archive.write_to(&mut file).await
                }
                None => archive.write_to(&mut tokio::io::stdout()).await,
            };
            let written = written?;
            let summary = producer.await.context("packaging task failed")??;
            tracing::info!(entries = summary.entries, bytes = written, "archive written");
        }
    }

    Ok(())
}

async fn replay<R, S>(container: &str, input: R, disk: S, ticks: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
    S: DiskUsageSource,
{
    let mut session = TelemetrySession::new(container, disk, ticks);
    let records = SnapshotDecoder::new(input).into_stream();
    session
        .run(async { Ok(records) }, tokio::io::stdout())
        .await?;
    Ok(())
}
