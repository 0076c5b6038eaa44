//! Hunk model shared by the parser, layout engine and mutator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::text::join_lines;

/// A parsed patch: optional leading metadata plus files in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPatch {
    /// Free text preceding the first file (commit headers, message).
    pub metadata: Option<String>,
    pub files: Vec<FileHunkSet>,
}

/// How a file changed. Renames carry the previous name, so a previous name
/// exists exactly when the change is a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ChangeKind {
    Changed,
    New,
    Deleted,
    RenamedPure { from: String },
    RenamedChanged { from: String },
}

impl ChangeKind {
    #[must_use]
    pub const fn is_rename(&self) -> bool {
        matches!(self, Self::RenamedPure { .. } | Self::RenamedChanged { .. })
    }
}

/// Full old and new file contents backing a hunk set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContents {
    pub deletion_lines: Vec<String>,
    pub addition_lines: Vec<String>,
}

impl FileContents {
    /// Old-side text, newline-terminated.
    #[must_use]
    pub fn deletion_text(&self) -> String {
        join_lines(&self.deletion_lines, true)
    }

    /// New-side text, newline-terminated.
    #[must_use]
    pub fn addition_text(&self) -> String {
        join_lines(&self.addition_lines, true)
    }
}

/// All hunks of one file.
///
/// Hunks are shared behind `Arc` so a mutation can reuse untouched hunks
/// instead of cloning their lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHunkSet {
    pub name: String,
    pub change_kind: ChangeKind,
    pub hunks: Vec<Arc<Hunk>>,
    /// Present only when the set was built from both file versions.
    pub contents: Option<Arc<FileContents>>,
}

/// Added/removed line totals for a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub added: usize,
    pub removed: usize,
}

impl FileHunkSet {
    #[must_use]
    pub fn new(name: impl Into<String>, change_kind: ChangeKind, hunks: Vec<Hunk>) -> Self {
        let mut hunks = hunks;
        assign_row_offsets(&mut hunks);
        Self {
            name: name.into(),
            change_kind,
            hunks: hunks.into_iter().map(Arc::new).collect(),
            contents: None,
        }
    }

    /// Name before a rename, if this file was renamed.
    #[must_use]
    pub fn prev_name(&self) -> Option<&str> {
        match &self.change_kind {
            ChangeKind::RenamedPure { from } | ChangeKind::RenamedChanged { from } => {
                Some(from.as_str())
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn with_contents(mut self, contents: FileContents) -> Self {
        self.contents = Some(Arc::new(contents));
        self
    }

    #[must_use]
    pub fn change_counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for hunk in &self.hunks {
            for group in hunk.groups.iter() {
                if let ChangeLineGroup::Change {
                    deletions,
                    additions,
                    ..
                } = group
                {
                    counts.added += additions.len();
                    counts.removed += deletions.len();
                }
            }
        }
        counts
    }

    /// Total displayed rows in split mode, separators included.
    #[must_use]
    pub fn split_row_total(&self) -> usize {
        self.hunks
            .last()
            .map_or(0, |h| h.split_row_start + h.split_row_count)
    }

    /// Total displayed rows in unified mode, separators included.
    #[must_use]
    pub fn unified_row_total(&self) -> usize {
        self.hunks
            .last()
            .map_or(0, |h| h.unified_row_start + h.unified_row_count)
    }
}

/// A run of lines inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeLineGroup {
    /// Unchanged lines, identical on both sides.
    Context {
        lines: Vec<String>,
        /// A `\ No newline at end of file` marker followed this group.
        no_newline: bool,
    },
    /// Removed and added lines; the two lists may differ in length.
    Change {
        deletions: Vec<String>,
        additions: Vec<String>,
        deletions_no_newline: bool,
        additions_no_newline: bool,
    },
}

impl ChangeLineGroup {
    #[must_use]
    pub fn deletion_len(&self) -> usize {
        match self {
            Self::Context { lines, .. } => lines.len(),
            Self::Change { deletions, .. } => deletions.len(),
        }
    }

    #[must_use]
    pub fn addition_len(&self) -> usize {
        match self {
            Self::Context { lines, .. } => lines.len(),
            Self::Change { additions, .. } => additions.len(),
        }
    }

    /// Lines of this group as seen from the old file.
    #[must_use]
    pub fn deletion_side(&self) -> &[String] {
        match self {
            Self::Context { lines, .. } => lines,
            Self::Change { deletions, .. } => deletions,
        }
    }

    /// Lines of this group as seen from the new file.
    #[must_use]
    pub fn addition_side(&self) -> &[String] {
        match self {
            Self::Context { lines, .. } => lines,
            Self::Change { additions, .. } => additions,
        }
    }

    /// Rows this group occupies in split mode (filler included).
    #[must_use]
    pub fn split_rows(&self) -> usize {
        self.deletion_len().max(self.addition_len())
    }

    /// Rows this group occupies in unified mode.
    #[must_use]
    pub fn unified_rows(&self) -> usize {
        match self {
            Self::Context { lines, .. } => lines.len(),
            Self::Change {
                deletions,
                additions,
                ..
            } => deletions.len() + additions.len(),
        }
    }

    /// Filler rows owed to each side in split mode: `(deletions, additions)`.
    #[must_use]
    pub fn filler(&self) -> (usize, usize) {
        match self {
            Self::Context { .. } => (0, 0),
            Self::Change {
                deletions,
                additions,
                ..
            } => (
                additions.len().saturating_sub(deletions.len()),
                deletions.len().saturating_sub(additions.len()),
            ),
        }
    }

    #[must_use]
    pub const fn is_change(&self) -> bool {
        matches!(self, Self::Change { .. })
    }
}

/// One `@@` region of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first old-file line (git semantics: 0 for an empty old side).
    pub deletion_start: u32,
    pub deletion_count: u32,
    /// 1-based first new-file line (git semantics: 0 for an empty new side).
    pub addition_start: u32,
    pub addition_count: u32,
    /// Text after the closing `@@`, usually the enclosing function.
    pub caption: Option<String>,
    pub groups: Arc<[ChangeLineGroup]>,
    /// 0-based index of the first old line in [`FileContents::deletion_lines`].
    pub deletion_line_index: usize,
    /// 0-based index of the first new line in [`FileContents::addition_lines`].
    pub addition_line_index: usize,
    /// Row of the first content line in split mode.
    pub split_row_start: usize,
    pub split_row_count: usize,
    /// Row of the first content line in unified mode.
    pub unified_row_start: usize,
    pub unified_row_count: usize,
}

impl Hunk {
    /// Build a hunk from its header coordinates and groups. Row offsets are
    /// left at zero until the hunk joins a [`FileHunkSet`].
    #[must_use]
    pub fn new(
        deletion_start: u32,
        addition_start: u32,
        caption: Option<String>,
        groups: Vec<ChangeLineGroup>,
    ) -> Self {
        let deletion_count = groups.iter().map(ChangeLineGroup::deletion_len).sum::<usize>();
        let addition_count = groups.iter().map(ChangeLineGroup::addition_len).sum::<usize>();
        let split_row_count = groups.iter().map(ChangeLineGroup::split_rows).sum();
        let unified_row_count = groups.iter().map(ChangeLineGroup::unified_rows).sum();
        Self {
            deletion_start,
            deletion_count: deletion_count as u32,
            addition_start,
            addition_count: addition_count as u32,
            caption,
            groups: groups.into(),
            deletion_line_index: line_index(deletion_start, deletion_count),
            addition_line_index: line_index(addition_start, addition_count),
            split_row_start: 0,
            split_row_count,
            unified_row_start: 0,
            unified_row_count,
        }
    }

    /// Render the `@@ -d,dc +a,ac @@ caption` header line.
    #[must_use]
    pub fn header(&self) -> String {
        let mut header = format!(
            "@@ -{},{} +{},{} @@",
            self.deletion_start, self.deletion_count, self.addition_start, self.addition_count
        );
        if let Some(caption) = &self.caption {
            header.push(' ');
            header.push_str(caption);
        }
        header
    }

    /// A resolved hunk has been collapsed to context and no longer changes anything.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.groups.iter().any(ChangeLineGroup::is_change)
    }

    /// All old-side lines in order.
    pub fn deletion_lines(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.deletion_side().iter().map(String::as_str))
    }

    /// All new-side lines in order.
    pub fn addition_lines(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.addition_side().iter().map(String::as_str))
    }
}

/// Content index for a git start/count pair. An empty side's start names the
/// line *before* the region, which is also the insertion index.
pub(crate) fn line_index(start: u32, count: usize) -> usize {
    if count == 0 {
        start as usize
    } else {
        start.saturating_sub(1) as usize
    }
}

/// Recompute cached row starts. Every hunk but the first is preceded by one
/// separator row.
pub(crate) fn assign_row_offsets(hunks: &mut [Hunk]) {
    let mut split = 0usize;
    let mut unified = 0usize;
    for (idx, hunk) in hunks.iter_mut().enumerate() {
        if idx > 0 {
            split += 1;
            unified += 1;
        }
        hunk.split_row_start = split;
        hunk.unified_row_start = unified;
        split += hunk.split_row_count;
        unified += hunk.unified_row_count;
    }
}
