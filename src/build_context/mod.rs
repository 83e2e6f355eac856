// Build context packaging: directory walk + streamed tar archive

mod packager;
mod walker;

pub use packager::{ArchiveStream, PackOptions, PackSummary, spawn_packager};
pub use walker::{ContextWalker, ExclusionRule};
