//! Candidate discovery and change detection for incremental indexing

mod change;
mod walker;

pub use change::{ChangeDetector, ChangeSet, ContentHasher};
pub use walker::{CandidateFile, Discovery, FileWalker};
