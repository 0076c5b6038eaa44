//! Row layout for diff and file rendering
//!
//! Sub-modules:
//! - `split`: two-column rows with filler spans
//! - `unified`: single-column rows, deletions before additions
//! - `file`: plain single-file rows
//! - `annotations`: line annotation → row anchoring
//!
//! Layouts are plain data. They are rebuilt whenever the hunk set or its
//! mutation state changes and never patched in place, except for token
//! application which only fills in styled content.

mod annotations;
mod file;
mod split;
mod unified;

use serde::{Deserialize, Serialize};

use crate::diff::{FileHunkSet, Hunk};
use crate::syntax::Token;

pub use annotations::{
    AnnotationAnchor, LineAnnotation, map_annotations, map_file_annotations,
    map_split_annotations, map_unified_annotations,
};
pub use file::{FileLayout, FileRow};
pub use split::SplitLayout;
pub use unified::UnifiedLayout;

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Diff view mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Single column, deletions then additions (default)
    #[default]
    Unified,
    /// Old on the left, new on the right
    Split,
}

/// Which file version a line or annotation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Deletions,
    Additions,
}

/// Type of diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineKind {
    Context,
    Added,
    Removed,
}

/// `(hunk, group, line)` address of a source line inside a hunk set.
///
/// `line` indexes the side's list within the group; context lines share the
/// same index on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinePosition {
    pub hunk: usize,
    pub group: usize,
    pub line: usize,
}

/// A rendered source line.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRow {
    pub kind: DiffLineKind,
    pub position: LinePosition,
    /// Line number in the old file (context and removed rows)
    pub deletion_line: Option<u32>,
    /// Line number in the new file (context and added rows)
    pub addition_line: Option<u32>,
    pub text: String,
    /// Followed by `\ No newline at end of file`
    pub no_newline: bool,
    /// Styled content; empty until highlights are applied.
    pub tokens: Vec<Token>,
}

/// What a separator between two hunks stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorKind {
    /// Unchanged lines between the hunks are hidden.
    Collapsed { hidden_lines: u32 },
    /// The hunks are adjacent.
    Plain,
}

/// Row preceding every hunk but the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatorRow {
    /// Index of the hunk that follows.
    pub hunk: usize,
    pub kind: SeparatorKind,
    /// The hunk's `@@` caption, if any.
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowContent {
    Separator(SeparatorRow),
    Line(DiffRow),
    /// Height-only placeholder keeping split columns aligned.
    Filler { span: usize },
}

/// One entry of a column, starting at visual row `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDescriptor {
    pub row: usize,
    pub content: RowContent,
}

impl RowDescriptor {
    /// Visual rows covered by this entry.
    #[must_use]
    pub const fn height(&self) -> usize {
        match self.content {
            RowContent::Filler { span } => span,
            _ => 1,
        }
    }

    #[must_use]
    pub const fn as_line(&self) -> Option<&DiffRow> {
        match &self.content {
            RowContent::Line(line) => Some(line),
            _ => None,
        }
    }
}

/// Styled lines for one hunk, indexed by offset from the hunk's start line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HunkHighlights {
    pub deletions: Vec<Vec<Token>>,
    pub additions: Vec<Vec<Token>>,
}

/// Both coordinate systems for one hunk set.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffLayout {
    pub split: SplitLayout,
    pub unified: UnifiedLayout,
}

impl DiffLayout {
    #[must_use]
    pub fn build(set: &FileHunkSet) -> Self {
        Self {
            split: SplitLayout::build(set),
            unified: UnifiedLayout::build(set),
        }
    }

    /// Row count for a view mode.
    #[must_use]
    pub const fn total_rows(&self, mode: ViewMode) -> usize {
        match mode {
            ViewMode::Split => self.split.total_rows,
            ViewMode::Unified => self.unified.total_rows,
        }
    }

    /// Fill in styled content for every row of `hunk` in both layouts.
    pub fn apply_highlights(&mut self, hunk: usize, highlights: &HunkHighlights) {
        let starts = self.unified.hunk_starts.get(hunk).copied();
        let Some(starts) = starts else {
            return;
        };
        for entry in self
            .split
            .deletions
            .iter_mut()
            .chain(self.split.additions.iter_mut())
            .chain(self.unified.rows.iter_mut())
        {
            if let RowContent::Line(line) = &mut entry.content {
                if line.position.hunk == hunk {
                    if let Some(tokens) = tokens_for(line, starts, highlights) {
                        line.tokens = tokens.to_vec();
                    }
                }
            }
        }
    }
}

fn tokens_for<'a>(
    line: &DiffRow,
    (deletion_start, addition_start): (u32, u32),
    highlights: &'a HunkHighlights,
) -> Option<&'a [Token]> {
    let from = |lines: &'a [Vec<Token>], number: Option<u32>, start: u32| {
        let offset = number?.checked_sub(start)? as usize;
        lines.get(offset).map(Vec::as_slice)
    };
    match line.kind {
        DiffLineKind::Removed => from(&highlights.deletions, line.deletion_line, deletion_start),
        DiffLineKind::Added | DiffLineKind::Context => {
            from(&highlights.additions, line.addition_line, addition_start)
        }
    }
}

// ---------------------------------------------------------------------------
// Builders shared by split and unified
// ---------------------------------------------------------------------------

/// Separator preceding hunk `index`, or `None` for the first hunk.
fn separator_for(set: &FileHunkSet, index: usize) -> Option<SeparatorRow> {
    let prev = set.hunks.get(index.checked_sub(1)?)?;
    let hunk = set.hunks.get(index)?;
    let gap = |start: u32, prev_start: u32, prev_count: u32| {
        let prev_end = prev_start.saturating_add(prev_count.saturating_sub(1));
        start.saturating_sub(prev_end.saturating_add(1))
    };
    let hidden = gap(hunk.addition_start, prev.addition_start, prev.addition_count)
        .min(gap(hunk.deletion_start, prev.deletion_start, prev.deletion_count));
    Some(SeparatorRow {
        hunk: index,
        kind: if hidden > 0 {
            SeparatorKind::Collapsed {
                hidden_lines: hidden,
            }
        } else {
            SeparatorKind::Plain
        },
        caption: hunk.caption.clone(),
    })
}

/// Unchanged lines above the first hunk.
fn leading_hidden_lines(set: &FileHunkSet) -> u32 {
    set.hunks.first().map_or(0, |hunk| {
        hunk.addition_start
            .min(hunk.deletion_start)
            .saturating_sub(1)
    })
}

/// Running old/new line counters for one hunk.
struct LineCounter {
    deletion: u32,
    addition: u32,
}

impl LineCounter {
    const fn new(hunk: &Hunk) -> Self {
        Self {
            deletion: hunk.deletion_start,
            addition: hunk.addition_start,
        }
    }

    fn context(&mut self) -> (u32, u32) {
        let numbers = (self.deletion, self.addition);
        self.deletion = self.deletion.saturating_add(1);
        self.addition = self.addition.saturating_add(1);
        numbers
    }

    fn deletion(&mut self) -> u32 {
        let number = self.deletion;
        self.deletion = self.deletion.saturating_add(1);
        number
    }

    fn addition(&mut self) -> u32 {
        let number = self.addition;
        self.addition = self.addition.saturating_add(1);
        number
    }
}
