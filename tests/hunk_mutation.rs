use std::sync::Arc;

use patchview::diff::{
    ChangeKind, ChangeLineGroup, FileContents, FileHunkSet, Hunk, HunkDecision, diff_files,
    resolve_hunk,
};
use patchview::error::MutationError;
use patchview::view::{DiffLayout, ViewMode};

fn change(deletions: &[&str], additions: &[&str]) -> ChangeLineGroup {
    ChangeLineGroup::Change {
        deletions: deletions.iter().map(ToString::to_string).collect(),
        additions: additions.iter().map(ToString::to_string).collect(),
        deletions_no_newline: false,
        additions_no_newline: false,
    }
}

/// Three hunks over a 30-line file: lines 10-11 become five lines, line 17
/// is edited, and line 25 is dropped.
fn three_hunks() -> FileHunkSet {
    let old: Vec<String> = (1..=30).map(|n| format!("line {n}")).collect();
    let mut new = old.clone();
    new.remove(24);
    new[16] = "line 17 edited".to_string();
    new.splice(9..11, (1..=5).map(|n| format!("fresh {n}")));

    let hunks = vec![
        Hunk::new(
            10,
            10,
            None,
            vec![change(
                &["line 10", "line 11"],
                &["fresh 1", "fresh 2", "fresh 3", "fresh 4", "fresh 5"],
            )],
        ),
        Hunk::new(17, 20, None, vec![change(&["line 17"], &["line 17 edited"])]),
        Hunk::new(25, 27, Some("fn last()".into()), vec![change(&["line 25"], &[])]),
    ];
    FileHunkSet::new("sample.txt", ChangeKind::Changed, hunks).with_contents(FileContents {
        deletion_lines: old,
        addition_lines: new,
    })
}

#[test]
fn accept_shifts_later_hunks_by_net_delta() {
    let set = three_hunks();
    assert_eq!(set.hunks[1].addition_start, 20);

    let accepted = resolve_hunk(&set, 0, HunkDecision::Accept).expect("accept");

    // Deletes 2, adds 5: net +3.
    assert_eq!(accepted.hunks[1].addition_start, 23);
    assert_eq!(accepted.hunks[1].deletion_start, 20);
    assert_eq!(accepted.hunks[2].addition_start, 30);
    assert!(accepted.hunks[0].is_resolved());
    assert_eq!(accepted.hunks[0].deletion_count, 5);
    assert_eq!(accepted.hunks[0].addition_count, 5);

    let contents = accepted.contents.as_ref().expect("contents");
    assert_eq!(contents.deletion_lines.len(), 33);
    assert_eq!(contents.deletion_lines[9], "fresh 1");
    assert_eq!(contents.deletion_lines[19], "line 17");
}

#[test]
fn line_indexes_stay_physical_offsets() {
    let set = three_hunks();
    let accepted = resolve_hunk(&set, 0, HunkDecision::Accept).expect("accept");
    let later = &accepted.hunks[1];
    let contents = accepted.contents.as_ref().expect("contents");

    // Only the spliced old side moves; the new side was never touched.
    assert_eq!(later.deletion_line_index, set.hunks[1].deletion_line_index + 3);
    assert_eq!(later.addition_line_index, set.hunks[1].addition_line_index);
    assert_eq!(contents.deletion_lines[later.deletion_line_index], "line 17");
    assert_eq!(
        contents.addition_lines[later.addition_line_index],
        "line 17 edited"
    );
    assert_ne!(later.addition_start as usize, later.addition_line_index + 1);

    let rejected = resolve_hunk(&set, 0, HunkDecision::Reject).expect("reject");
    let later = &rejected.hunks[1];
    assert_eq!(later.deletion_line_index, set.hunks[1].deletion_line_index);
    assert_eq!(later.addition_line_index, set.hunks[1].addition_line_index - 3);
    assert_eq!(
        rejected.contents.as_ref().expect("contents").addition_lines[later.addition_line_index],
        "line 17 edited"
    );
}

#[test]
fn earlier_hunks_are_shared_untouched() {
    let set = three_hunks();
    let rejected = resolve_hunk(&set, 1, HunkDecision::Reject).expect("reject");

    assert!(Arc::ptr_eq(&set.hunks[0], &rejected.hunks[0]));
    assert_eq!(rejected.hunks[2].deletion_start, 25);
    assert_eq!(rejected.hunks[2].addition_start, 27);
    assert_eq!(rejected.hunks[1].deletion_lines().collect::<Vec<_>>(), ["line 17"]);

    // The input set is not modified.
    assert!(!set.hunks[1].is_resolved());
}

#[test]
fn layout_rebuilt_after_mutation_has_fewer_rows() {
    let set = three_hunks();
    let before = DiffLayout::build(&set);
    let accepted = resolve_hunk(&set, 0, HunkDecision::Accept).expect("accept");
    let after = DiffLayout::build(&accepted);

    // Seven unified rows collapse to five context rows.
    assert_eq!(
        after.total_rows(ViewMode::Unified),
        before.total_rows(ViewMode::Unified) - 2
    );
    assert_eq!(
        after.total_rows(ViewMode::Split),
        before.total_rows(ViewMode::Split)
    );
    assert_eq!(after.total_rows(ViewMode::Unified), accepted.unified_row_total());
}

#[test]
fn mutation_requires_contents_and_a_valid_index() {
    let set = three_hunks();
    let err = resolve_hunk(&set, 3, HunkDecision::Accept).expect_err("out of range");
    assert_eq!(
        err,
        MutationError::HunkOutOfRange {
            name: "sample.txt".into(),
            index: 3,
            len: 3
        }
    );

    let bare = FileHunkSet::new("bare.txt", ChangeKind::Changed, Vec::new());
    assert!(matches!(
        resolve_hunk(&bare, 0, HunkDecision::Reject),
        Err(MutationError::MissingContents { .. })
    ));
}

#[test]
fn accepting_every_hunk_yields_the_new_file() {
    let old = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\n";
    let new = "a\nB\nc\nd\ne\nf\ng\nh\ni\nj\nK\nK2\nl\n";
    let mut set = diff_files("letters.txt", old, new);
    assert_eq!(set.hunks.len(), 2);

    for index in 0..set.hunks.len() {
        set = resolve_hunk(&set, index, HunkDecision::Accept).expect("accept");
    }
    let contents = set.contents.as_ref().expect("contents");
    assert_eq!(contents.deletion_text(), new);
    assert_eq!(contents.addition_text(), new);
    assert!(set.hunks.iter().all(|h| h.is_resolved()));
}
