//! Unified diff parsing and the hunk model

mod from_files;
mod mutate;
mod parse;
mod types;

pub use from_files::{DEFAULT_CONTEXT_LINES, diff_file_versions, diff_files};
pub use mutate::{HunkDecision, resolve_hunk};
pub use parse::{parse_patch, parse_patch_series};
pub use types::{
    ChangeCounts, ChangeKind, ChangeLineGroup, FileContents, FileHunkSet, Hunk, ParsedPatch,
};
