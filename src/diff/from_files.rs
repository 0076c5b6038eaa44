//! Build a hunk set from two file versions.
//!
//! Sets built here carry full contents, which makes them eligible for
//! accept/reject.

use similar::{ChangeTag, TextDiff};

use super::parse::{GroupBuilder, LineOrigin};
use super::types::{ChangeKind, FileContents, FileHunkSet, Hunk};
use crate::text::split_lines;

/// Context lines kept around each change, as `git diff` does.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Diff two versions of the same file.
#[must_use]
pub fn diff_files(name: &str, old: &str, new: &str) -> FileHunkSet {
    diff_file_versions(name, name, old, new, DEFAULT_CONTEXT_LINES)
}

/// Diff two versions of a file, possibly under different names.
///
/// Differing names produce a rename; identical contents under a new name
/// are a pure rename with no hunks.
#[must_use]
pub fn diff_file_versions(
    old_name: &str,
    new_name: &str,
    old: &str,
    new: &str,
    context_lines: usize,
) -> FileHunkSet {
    let diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();

    for ops in diff.grouped_ops(context_lines) {
        let (Some(first), Some(last)) = (ops.first(), ops.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut builder = GroupBuilder::default();
        for op in &ops {
            for change in diff.iter_changes(op) {
                let origin = match change.tag() {
                    ChangeTag::Equal => LineOrigin::Context,
                    ChangeTag::Delete => LineOrigin::Deletion,
                    ChangeTag::Insert => LineOrigin::Addition,
                };
                let text = change.value();
                let text = text.strip_suffix('\n').unwrap_or(text);
                builder.push(origin, text.strip_suffix('\r').unwrap_or(text));
                if change.missing_newline() {
                    builder.mark_no_newline();
                }
            }
        }

        hunks.push(Hunk::new(
            git_start(old_range.start, old_range.len()),
            git_start(new_range.start, new_range.len()),
            None,
            builder.groups,
        ));
    }

    let kind = if old_name == new_name {
        ChangeKind::Changed
    } else if hunks.is_empty() {
        ChangeKind::RenamedPure {
            from: old_name.to_string(),
        }
    } else {
        ChangeKind::RenamedChanged {
            from: old_name.to_string(),
        }
    };

    FileHunkSet::new(new_name, kind, hunks).with_contents(FileContents {
        deletion_lines: split_lines(old).lines,
        addition_lines: split_lines(new).lines,
    })
}

/// 1-based git start for a 0-based range; an empty range keeps its index.
fn git_start(index: usize, len: usize) -> u32 {
    let start = if len == 0 { index } else { index + 1 };
    u32::try_from(start).unwrap_or(u32::MAX)
}
