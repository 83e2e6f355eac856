// Streams a build context as a tar archive through a bounded channel.
// A blocking producer walks and writes; the async consumer (upload or file) reads chunks.

use super::walker::{ContextWalker, ExclusionRule};
use crate::config::BuildConfig;
use crate::error::PackError;
use crate::models::{ArchiveEntry, EntryKind};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Packaging knobs, usually taken from `[build]` in the config.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub channel_capacity: usize,
    pub chunk_size: usize,
    pub write_timeout: Duration,
    pub exclusion: ExclusionRule,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self::from(&BuildConfig::default())
    }
}

impl From<&BuildConfig> for PackOptions {
    fn from(c: &BuildConfig) -> Self {
        Self {
            channel_capacity: c.channel_capacity,
            chunk_size: c.chunk_size,
            write_timeout: c.write_timeout(),
            exclusion: ExclusionRule::new(c.exclude_prefix),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// What travels over the channel: data, or the terminal signal.
enum Frame {
    Data(Bytes),
    Done,
    Failed(PackError),
}

/// Consumer side of a packaged build context.
///
/// Yields archive chunks in producer order. A packaging failure arrives as
/// the final `Err` item; a clean end is `None` after the last chunk.
pub struct ArchiveStream {
    rx: mpsc::Receiver<Frame>,
    // Terminal error the producer could not fit into a full channel.
    overflow: oneshot::Receiver<PackError>,
    finished: bool,
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes, PackError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let item = match ready!(self.rx.poll_recv(cx)) {
            Some(Frame::Data(chunk)) => return Poll::Ready(Some(Ok(chunk))),
            Some(Frame::Done) => None,
            Some(Frame::Failed(e)) => Some(Err(e)),
            // Sender gone without a terminal frame: either the error overflowed a
            // full channel, or the producer panicked or was cancelled.
            None => Some(Err(self.overflow.try_recv().unwrap_or_else(|_| {
                PackError::Producer("archive producer exited before completing the archive".into())
            }))),
        };
        self.finished = true;
        Poll::Ready(item)
    }
}

impl ArchiveStream {
    /// Copy the whole archive into `out`, returning the number of bytes written.
    pub async fn write_to<W>(mut self, out: &mut W) -> Result<u64, PackError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;

        let mut written = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}

/// Start packaging `root` on the blocking pool.
///
/// Returns the consumer stream and the producer's handle. Dropping the stream
/// makes the producer fail with [`PackError::ConsumerClosed`]; a consumer that
/// holds the stream without reading makes it fail with [`PackError::Stalled`]
/// after `write_timeout`. Must be called from within a Tokio runtime.
pub fn spawn_packager(
    root: impl Into<PathBuf>,
    options: PackOptions,
) -> (ArchiveStream, JoinHandle<Result<PackSummary, PackError>>) {
    let root = root.into();
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    let (overflow_tx, overflow) = oneshot::channel();
    let handle = Handle::current();

    let producer = tokio::task::spawn_blocking(move || {
        let span = tracing::debug_span!("pack", root = %root.display());
        let _guard = span.enter();

        let mut writer =
            ChannelWriter::new(tx, handle, options.chunk_size, options.write_timeout)
                .with_overflow(overflow_tx);
        let result = match ContextWalker::new(&root, options.exclusion) {
            Ok(walker) => write_archive(walker, writer),
            Err(e) => {
                writer.fail(e.duplicate());
                Err(e)
            }
        };
        match &result {
            Ok(summary) => info!(
                entries = summary.entries,
                bytes = summary.bytes,
                "build context packaged"
            ),
            Err(e) => warn!(error = %e, "build context packaging failed"),
        }
        result
    });

    (
        ArchiveStream {
            rx,
            overflow,
            finished: false,
        },
        producer,
    )
}

/// Write every walked entry, then the trailer, then the terminal frame.
/// On failure the error frame is sent (when the consumer is still there).
fn write_archive(walker: ContextWalker, writer: ChannelWriter) -> Result<PackSummary, PackError> {
    let mut builder = tar::Builder::new(writer);
    let entries = match append_all(&mut builder, walker) {
        Ok(n) => n,
        Err(e) => {
            builder.get_mut().fail(e.duplicate());
            return Err(e);
        }
    };
    let mut writer = builder.into_inner().map_err(PackError::Io)?;
    match writer.complete() {
        Ok(bytes) => Ok(PackSummary { entries, bytes }),
        Err(e) => {
            writer.fail(e.duplicate());
            Err(e)
        }
    }
}

fn append_all(
    builder: &mut tar::Builder<ChannelWriter>,
    walker: ContextWalker,
) -> Result<usize, PackError> {
    let mut entries = 0;
    for entry in walker {
        append_entry(builder, &entry?)?;
        entries += 1;
    }
    builder
        .finish()
        .map_err(|e| builder.get_ref().failure_or(PackError::Io(e)))?;
    Ok(entries)
}

fn append_entry(
    builder: &mut tar::Builder<ChannelWriter>,
    entry: &ArchiveEntry,
) -> Result<(), PackError> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(entry.mode);
    header.set_mtime(entry.mtime);

    // Bytes promised by the header but never read from the file.
    let mut missing = 0;
    let result = match entry.kind {
        EntryKind::Directory => {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            let name = format!("{}/", entry.relative_path);
            builder.append_data(&mut header, name, io::empty())
        }
        EntryKind::File => {
            let file = File::open(&entry.source).map_err(|source| PackError::Traversal {
                path: entry.source.clone(),
                source,
            })?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.len);
            let mut body = file.take(entry.len);
            let result = builder.append_data(&mut header, &entry.relative_path, &mut body);
            missing = body.limit();
            result
        }
    };
    debug!(path = %entry.relative_path, size = entry.len, "archive entry");

    // An I/O error here is either ours (the channel) or the file read.
    result.map_err(|e| {
        builder.get_ref().failure_or(PackError::Traversal {
            path: entry.source.clone(),
            source: e,
        })
    })?;

    // The file shrank after it was walked; the entry body is short of its header.
    if missing > 0 {
        return Err(PackError::Traversal {
            path: entry.source.clone(),
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while packaging, {missing} bytes short"),
            ),
        });
    }
    Ok(())
}

/// `io::Write` over the bounded channel. Cuts the byte stream into
/// `chunk_size` pieces; each send waits at most `timeout` for room.
struct ChannelWriter {
    tx: mpsc::Sender<Frame>,
    handle: Handle,
    buf: BytesMut,
    chunk_size: usize,
    timeout: Duration,
    sent: u64,
    failure: Option<PackError>,
    overflow: Option<oneshot::Sender<PackError>>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Frame>, handle: Handle, chunk_size: usize, timeout: Duration) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tx,
            handle,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            timeout,
            sent: 0,
            failure: None,
            overflow: None,
        }
    }

    fn with_overflow(mut self, overflow: oneshot::Sender<PackError>) -> Self {
        self.overflow = Some(overflow);
        self
    }

    fn send(&mut self, frame: Frame) -> io::Result<()> {
        if let Some(e) = &self.failure {
            return Err(io::Error::other(e.to_string()));
        }
        match self.handle.block_on(self.tx.send_timeout(frame, self.timeout)) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => {
                self.failure = Some(PackError::ConsumerClosed);
                Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive consumer closed the stream",
                ))
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.failure = Some(PackError::Stalled {
                    timeout: self.timeout,
                });
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "archive consumer stalled",
                ))
            }
        }
    }

    /// The channel failure if one happened, otherwise `fallback`.
    fn failure_or(&self, fallback: PackError) -> PackError {
        self.failure
            .as_ref()
            .map(PackError::duplicate)
            .unwrap_or(fallback)
    }

    /// Deliver `e` to the consumer, then refuse further writes (the builder's
    /// drop would write a trailer).
    ///
    /// When the channel has no room (a stalled consumer), `e` goes to the
    /// overflow slot and the consumer reads it after the buffered chunks.
    /// Only a closed consumer gets nothing.
    fn fail(&mut self, e: PackError) {
        if self.failure.is_none() && self.send(Frame::Failed(e.duplicate())).is_ok() {
            self.failure = Some(e);
            return;
        }
        if !matches!(self.failure, Some(PackError::ConsumerClosed))
            && let Some(overflow) = self.overflow.take()
        {
            let _ = overflow.send(e.duplicate());
        }
        if self.failure.is_none() {
            self.failure = Some(e);
        }
    }

    /// Flush the tail and send the completion frame.
    fn complete(&mut self) -> Result<u64, PackError> {
        self.flush().map_err(|e| self.failure_or(PackError::Io(e)))?;
        self.send(Frame::Done)
            .map_err(|e| self.failure_or(PackError::Io(e)))?;
        Ok(self.sent)
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(e) = &self.failure {
            return Err(io::Error::other(e.to_string()));
        }
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let chunk = self.buf.split_to(self.chunk_size).freeze();
            let len = chunk.len() as u64;
            self.send(Frame::Data(chunk))?;
            self.sent += len;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        let len = chunk.len() as u64;
        self.send(Frame::Data(chunk))?;
        self.sent += len;
        Ok(())
    }
}
