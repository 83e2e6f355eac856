// Build context directory walk: relative paths, metadata, excluded subtrees

use crate::error::PackError;
use crate::models::{ArchiveEntry, EntryKind};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories (other than the root) whose name starts with `prefix` are
/// left out together with everything below them.
#[derive(Debug, Clone, Copy)]
pub struct ExclusionRule {
    prefix: char,
}

impl Default for ExclusionRule {
    fn default() -> Self {
        Self { prefix: '.' }
    }
}

impl ExclusionRule {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    pub fn excludes(&self, entry: &walkdir::DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().starts_with(self.prefix)
    }
}

/// Lazy, sorted walk of a build context. Yields one entry per file or
/// directory under the root (the root itself is not yielded).
///
/// Symlinks are followed and packaged as whatever they point to. FIFOs,
/// sockets and device nodes are skipped.
pub struct ContextWalker {
    root: PathBuf,
    rule: ExclusionRule,
    inner: walkdir::IntoIter,
}

impl ContextWalker {
    pub fn new(root: impl Into<PathBuf>, rule: ExclusionRule) -> Result<Self, PackError> {
        let root = root.into();
        let meta = std::fs::metadata(&root).map_err(|source| PackError::Traversal {
            path: root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(PackError::Traversal {
                path: root,
                source: io::Error::new(
                    io::ErrorKind::NotADirectory,
                    "build context is not a directory",
                ),
            });
        }
        let inner = WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();
        Ok(Self { root, rule, inner })
    }

    fn to_entry(&self, entry: &walkdir::DirEntry) -> Result<Option<ArchiveEntry>, PackError> {
        let meta = entry.metadata().map_err(|e| walk_error(&self.root, e))?;
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            warn!(path = %entry.path().display(), "skipping special file in build context");
            return Ok(None);
        };
        let relative_path = relative_path(&self.root, entry.path())?;
        Ok(Some(ArchiveEntry {
            relative_path,
            kind,
            len: if kind == EntryKind::File { meta.len() } else { 0 },
            mode: file_mode(&meta),
            mtime: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs()),
            source: entry.path().to_path_buf(),
        }))
    }
}

impl Iterator for ContextWalker {
    type Item = Result<ArchiveEntry, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(e) => e,
                Err(e) => return Some(Err(walk_error(&self.root, e))),
            };
            if entry.depth() == 0 {
                continue;
            }
            if self.rule.excludes(&entry) {
                debug!(path = %entry.path().display(), "excluding directory from build context");
                self.inner.skip_current_dir();
                continue;
            }
            match self.to_entry(&entry) {
                Ok(Some(e)) => return Some(Ok(e)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn walk_error(root: &Path, e: walkdir::Error) -> PackError {
    let path = e
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    PackError::Traversal {
        path,
        source: io::Error::from(e),
    }
}

/// `/`-joined path of `path` below `root`.
fn relative_path(root: &Path, path: &Path) -> Result<String, PackError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| PackError::Traversal {
            path: path.to_path_buf(),
            source: io::Error::other(e),
        })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}
