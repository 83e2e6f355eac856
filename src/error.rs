// Error types for packaging and telemetry

use std::path::PathBuf;
use std::time::Duration;

/// Failure while producing a build context archive. Delivered to the archive
/// consumer as the last item of the stream.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("failed to read {}: {source}", path.display())]
    Traversal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive consumer closed the stream")]
    ConsumerClosed,
    #[error("archive consumer stalled for more than {timeout:?}")]
    Stalled { timeout: Duration },
    #[error("archive producer aborted: {0}")]
    Producer(String),
}

impl PackError {
    /// Rebuild an equivalent error for the other side of the channel.
    /// `std::io::Error` is not `Clone`, so kind and message are carried over.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            PackError::Traversal { path, source } => PackError::Traversal {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            PackError::Io(e) => PackError::Io(std::io::Error::new(e.kind(), e.to_string())),
            PackError::ConsumerClosed => PackError::ConsumerClosed,
            PackError::Stalled { timeout } => PackError::Stalled { timeout: *timeout },
            PackError::Producer(m) => PackError::Producer(m.clone()),
        }
    }
}

/// Terminal failure of a telemetry session.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to open stats stream for {container}: {message}")]
    Connection { container: String, message: String },
    #[error("failed to decode stats: {0}")]
    Decode(String),
    #[error("stats stream failed: {0}")]
    Transport(String),
    #[error("failed to write sample: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("disk usage query failed: {0}")]
pub struct DiskUsageError(pub String);
