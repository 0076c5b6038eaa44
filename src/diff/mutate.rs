//! Accept/reject: collapse one hunk to a single side and re-offset the rest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{ChangeLineGroup, FileContents, FileHunkSet, Hunk};
use crate::error::MutationError;

/// Which side of a hunk survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HunkDecision {
    /// Keep the added lines.
    Accept,
    /// Keep the deleted lines.
    Reject,
}

/// Collapse hunk `index` into context holding the winning side's lines.
///
/// Returns a new set; `set` is untouched. Hunks before `index` are shared
/// with the input, later hunks are re-offset copies sharing their groups.
///
/// Later hunks move both `deletion_start` and `addition_start` by the net
/// line delta, so their displayed numbers count from the resolved file.
/// `deletion_line_index` and `addition_line_index` stay physical offsets
/// into [`FileContents`]: only the side whose lines were spliced moves.
/// After an accept, a later hunk's `addition_start` therefore no longer
/// equals `addition_line_index + 1`.
///
/// # Errors
///
/// Returns [`MutationError`] when `set` carries no full file contents, when
/// `index` is out of range, or when the contents do not cover the hunk.
pub fn resolve_hunk(
    set: &FileHunkSet,
    index: usize,
    decision: HunkDecision,
) -> Result<FileHunkSet, MutationError> {
    let Some(contents) = set.contents.as_ref() else {
        return Err(MutationError::MissingContents {
            name: set.name.clone(),
        });
    };
    let target = set
        .hunks
        .get(index)
        .ok_or_else(|| MutationError::HunkOutOfRange {
            name: set.name.clone(),
            index,
            len: set.hunks.len(),
        })?;

    let winning: Vec<String> = match decision {
        HunkDecision::Accept => target.addition_lines().map(ToString::to_string).collect(),
        HunkDecision::Reject => target.deletion_lines().map(ToString::to_string).collect(),
    };
    let winning_no_newline = trailing_no_newline(target, decision);
    let (losing_count, losing_index) = match decision {
        HunkDecision::Accept => (target.deletion_count as usize, target.deletion_line_index),
        HunkDecision::Reject => (target.addition_count as usize, target.addition_line_index),
    };

    let contents = splice_contents(set, contents, decision, losing_index, losing_count, &winning)?;

    let winning_count = winning.len();
    let line_delta = signed(winning_count) - signed(losing_count);
    let split_delta = signed(winning_count) - signed(target.split_row_count);
    let unified_delta = signed(winning_count) - signed(target.unified_row_count);

    let collapsed = collapse(target, decision, winning, winning_no_newline);
    debug!(
        file = %set.name,
        index,
        ?decision,
        line_delta,
        split_delta,
        unified_delta,
        "resolved hunk"
    );

    let hunks = set
        .hunks
        .iter()
        .enumerate()
        .map(|(idx, hunk)| match idx.cmp(&index) {
            std::cmp::Ordering::Less => Arc::clone(hunk),
            std::cmp::Ordering::Equal => Arc::new(collapsed.clone()),
            std::cmp::Ordering::Greater => {
                let mut shifted = Hunk::clone(hunk);
                shifted.deletion_start = shift_u32(shifted.deletion_start, line_delta);
                shifted.addition_start = shift_u32(shifted.addition_start, line_delta);
                match decision {
                    HunkDecision::Accept => {
                        shifted.deletion_line_index =
                            shift_usize(shifted.deletion_line_index, line_delta);
                    }
                    HunkDecision::Reject => {
                        shifted.addition_line_index =
                            shift_usize(shifted.addition_line_index, line_delta);
                    }
                }
                shifted.split_row_start = shift_usize(shifted.split_row_start, split_delta);
                shifted.unified_row_start = shift_usize(shifted.unified_row_start, unified_delta);
                Arc::new(shifted)
            }
        })
        .collect();

    Ok(FileHunkSet {
        name: set.name.clone(),
        change_kind: set.change_kind.clone(),
        hunks,
        contents: Some(Arc::new(contents)),
    })
}

/// Replace the losing side's region of the full contents with the winners.
fn splice_contents(
    set: &FileHunkSet,
    contents: &FileContents,
    decision: HunkDecision,
    losing_index: usize,
    losing_count: usize,
    winning: &[String],
) -> Result<FileContents, MutationError> {
    let (losing, side) = match decision {
        HunkDecision::Accept => (&contents.deletion_lines, "deletion"),
        HunkDecision::Reject => (&contents.addition_lines, "addition"),
    };
    let end = losing_index + losing_count;
    if end > losing.len() {
        return Err(MutationError::ContentsOutOfSync {
            name: set.name.clone(),
            side,
            start: losing_index,
            end,
        });
    }

    let mut spliced = Vec::with_capacity(losing.len() - losing_count + winning.len());
    spliced.extend_from_slice(&losing[..losing_index]);
    spliced.extend_from_slice(winning);
    spliced.extend_from_slice(&losing[end..]);

    Ok(match decision {
        HunkDecision::Accept => FileContents {
            deletion_lines: spliced,
            addition_lines: contents.addition_lines.clone(),
        },
        HunkDecision::Reject => FileContents {
            deletion_lines: contents.deletion_lines.clone(),
            addition_lines: spliced,
        },
    })
}

fn collapse(target: &Hunk, decision: HunkDecision, winning: Vec<String>, no_newline: bool) -> Hunk {
    let count = winning.len();
    let mut collapsed = target.clone();

    // An empty side's start names the line before the region; moving between
    // empty and non-empty shifts it by one.
    let (losing_start, losing_count) = match decision {
        HunkDecision::Accept => (&mut collapsed.deletion_start, target.deletion_count),
        HunkDecision::Reject => (&mut collapsed.addition_start, target.addition_count),
    };
    if losing_count == 0 && count > 0 {
        *losing_start = losing_start.saturating_add(1);
    } else if losing_count > 0 && count == 0 {
        *losing_start = losing_start.saturating_sub(1);
    }

    collapsed.deletion_count = count as u32;
    collapsed.addition_count = count as u32;
    collapsed.split_row_count = count;
    collapsed.unified_row_count = count;
    collapsed.groups = if count == 0 {
        Vec::<ChangeLineGroup>::new().into()
    } else {
        vec![ChangeLineGroup::Context {
            lines: winning,
            no_newline,
        }]
        .into()
    };
    collapsed
}

/// The no-newline flag of the last non-empty group on the winning side.
fn trailing_no_newline(hunk: &Hunk, decision: HunkDecision) -> bool {
    hunk.groups
        .iter()
        .rev()
        .find_map(|group| match (group, decision) {
            (ChangeLineGroup::Context { lines, no_newline }, _) if !lines.is_empty() => {
                Some(*no_newline)
            }
            (
                ChangeLineGroup::Change {
                    additions,
                    additions_no_newline,
                    ..
                },
                HunkDecision::Accept,
            ) if !additions.is_empty() => Some(*additions_no_newline),
            (
                ChangeLineGroup::Change {
                    deletions,
                    deletions_no_newline,
                    ..
                },
                HunkDecision::Reject,
            ) if !deletions.is_empty() => Some(*deletions_no_newline),
            _ => None,
        })
        .unwrap_or(false)
}

const fn signed(value: usize) -> i64 {
    value as i64
}

fn shift_u32(value: u32, delta: i64) -> u32 {
    u32::try_from((i64::from(value) + delta).max(0)).unwrap_or(u32::MAX)
}

fn shift_usize(value: usize, delta: i64) -> usize {
    usize::try_from((signed(value) + delta).max(0)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChangeKind, diff_files};

    fn change(del: &[&str], add: &[&str]) -> ChangeLineGroup {
        ChangeLineGroup::Change {
            deletions: del.iter().map(ToString::to_string).collect(),
            additions: add.iter().map(ToString::to_string).collect(),
            deletions_no_newline: false,
            additions_no_newline: false,
        }
    }

    fn numbered(prefix: &str, count: usize) -> Vec<String> {
        (1..=count).map(|n| format!("{prefix}{n}")).collect()
    }

    /// hunk0 deletes 2 / adds 5 at line 10, hunk1 starts at addition line 20.
    fn two_hunk_set() -> FileHunkSet {
        let set = FileHunkSet::new(
            "lib.rs",
            ChangeKind::Changed,
            vec![
                Hunk::new(10, 10, None, vec![change(&["a", "b"], &["1", "2", "3", "4", "5"])]),
                Hunk::new(17, 20, None, vec![change(&["x"], &["y"])]),
            ],
        );
        set.with_contents(FileContents {
            deletion_lines: numbered("old", 30),
            addition_lines: numbered("new", 33),
        })
    }

    #[test]
    fn test_accept_shifts_later_hunks() {
        let set = two_hunk_set();
        let resolved = resolve_hunk(&set, 0, HunkDecision::Accept).expect("resolvable");

        let first = &resolved.hunks[0];
        assert!(first.is_resolved());
        assert_eq!(first.deletion_count, 5);
        assert_eq!(first.addition_count, 5);
        assert_eq!(first.addition_lines().collect::<Vec<_>>(), ["1", "2", "3", "4", "5"]);

        let second = &resolved.hunks[1];
        assert_eq!(second.addition_start, 23);
        assert_eq!(second.deletion_start, 20);
        // Only the spliced (old) contents moved.
        assert_eq!(second.deletion_line_index, set.hunks[1].deletion_line_index + 3);
        assert_eq!(second.addition_line_index, set.hunks[1].addition_line_index);

        // split: 5 rows before and after; unified: 7 rows become 5.
        assert_eq!(second.split_row_start, set.hunks[1].split_row_start);
        assert_eq!(second.unified_row_start, set.hunks[1].unified_row_start - 2);

        let contents = resolved.contents.as_ref().expect("contents");
        assert_eq!(contents.deletion_lines.len(), 33);
        assert_eq!(contents.deletion_lines[9], "1");
    }

    #[test]
    fn test_input_untouched_and_earlier_hunks_shared() {
        let set = two_hunk_set();
        let before = set.clone();
        let resolved = resolve_hunk(&set, 1, HunkDecision::Reject).expect("resolvable");
        assert_eq!(set, before);
        assert!(Arc::ptr_eq(&set.hunks[0], &resolved.hunks[0]));
        assert_eq!(resolved.hunks[1].addition_lines().collect::<Vec<_>>(), ["x"]);
    }

    #[test]
    fn test_reject_pure_insertion_empties_hunk() {
        let set = diff_files("f.txt", "a\nb\n", "a\nnew\nb\n");
        assert_eq!(set.hunks.len(), 1);
        let resolved = resolve_hunk(&set, 0, HunkDecision::Reject).expect("resolvable");
        let contents = resolved.contents.as_ref().expect("contents");
        assert_eq!(contents.addition_lines, ["a", "b"]);
        assert!(resolved.hunks[0].is_resolved());
    }

    #[test]
    fn test_errors() {
        let set = two_hunk_set();
        assert!(matches!(
            resolve_hunk(&set, 2, HunkDecision::Accept),
            Err(MutationError::HunkOutOfRange { index: 2, len: 2, .. })
        ));

        let bare = FileHunkSet {
            contents: None,
            ..set
        };
        assert!(matches!(
            resolve_hunk(&bare, 0, HunkDecision::Accept),
            Err(MutationError::MissingContents { .. })
        ));
    }
}
