use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "easydocker.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    /// Unix socket of the engine; local defaults (DOCKER_HOST or /var/run/docker.sock) when unset.
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default = "default_docker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_docker_timeout_secs() -> u64 {
    120
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: default_docker_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Archive chunks in flight between the packager and the upload.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How long the packager waits on a consumer that stopped reading.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default = "default_exclude_prefix")]
    pub exclude_prefix: char,
}

fn default_channel_capacity() -> usize {
    16
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_write_timeout_secs() -> u64 {
    300
}

fn default_dockerfile() -> String {
    "Dockerfile".into()
}

fn default_exclude_prefix() -> char {
    '.'
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            chunk_size: default_chunk_size(),
            write_timeout_secs: default_write_timeout_secs(),
            dockerfile: default_dockerfile(),
            exclude_prefix: default_exclude_prefix(),
        }
    }
}

impl BuildConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Ticks between disk usage refreshes.
    #[serde(default = "default_disk_refresh_ticks")]
    pub disk_refresh_ticks: u32,
}

fn default_disk_refresh_ticks() -> u32 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            disk_refresh_ticks: default_disk_refresh_ticks(),
        }
    }
}

impl AppConfig {
    /// Load from `$CONFIG_FILE`, else `easydocker.toml` if present, else defaults.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::load_from_path(&path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_path(DEFAULT_CONFIG_PATH)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.docker.timeout_secs > 0,
            "docker.timeout_secs must be > 0, got {}",
            self.docker.timeout_secs
        );
        anyhow::ensure!(
            self.docker.socket.as_deref() != Some(""),
            "docker.socket must be non-empty when set"
        );
        anyhow::ensure!(
            self.build.channel_capacity > 0,
            "build.channel_capacity must be > 0, got {}",
            self.build.channel_capacity
        );
        anyhow::ensure!(
            self.build.chunk_size > 0,
            "build.chunk_size must be > 0, got {}",
            self.build.chunk_size
        );
        anyhow::ensure!(
            self.build.write_timeout_secs > 0,
            "build.write_timeout_secs must be > 0, got {}",
            self.build.write_timeout_secs
        );
        anyhow::ensure!(
            !self.build.dockerfile.is_empty(),
            "build.dockerfile must be non-empty"
        );
        anyhow::ensure!(
            self.telemetry.disk_refresh_ticks > 0,
            "telemetry.disk_refresh_ticks must be > 0, got {}",
            self.telemetry.disk_refresh_ticks
        );
        Ok(())
    }
}
