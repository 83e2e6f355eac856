// Build context archive entries

use std::path::PathBuf;

/// What a walked entry turned into once symlinks were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One file or directory under the build context root.
///
/// Content is not held in memory; `source` is opened when the packager
/// copies the entry into the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path relative to the context root, `/`-separated, no leading `./`.
    pub relative_path: String,
    pub kind: EntryKind,
    /// Byte length for files, 0 for directories.
    pub len: u64,
    pub mode: u32,
    pub mtime: u64,
    pub source: PathBuf,
}
