//! Single-column layout: each change group lists its deletions, then its
//! additions.

use std::collections::HashMap;

use tracing::debug;

use super::{
    DiffLineKind, DiffRow, LineCounter, LinePosition, RowContent, RowDescriptor, Side,
    leading_hidden_lines, separator_for,
};
use crate::diff::{ChangeLineGroup, FileHunkSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedLayout {
    pub rows: Vec<RowDescriptor>,
    pub total_rows: usize,
    /// Unchanged lines above the first hunk.
    pub leading_hidden_lines: u32,
    /// `(deletion_start, addition_start)` per hunk.
    pub(super) hunk_starts: Vec<(u32, u32)>,
    lines: HashMap<(Side, u32), usize>,
    positions: HashMap<(Side, LinePosition), usize>,
}

impl UnifiedLayout {
    #[must_use]
    pub fn build(set: &FileHunkSet) -> Self {
        let mut layout = Self {
            leading_hidden_lines: leading_hidden_lines(set),
            hunk_starts: set
                .hunks
                .iter()
                .map(|h| (h.deletion_start, h.addition_start))
                .collect(),
            ..Self::default()
        };

        for (hunk_idx, hunk) in set.hunks.iter().enumerate() {
            if let Some(separator) = separator_for(set, hunk_idx) {
                layout.rows.push(RowDescriptor {
                    row: layout.rows.len(),
                    content: RowContent::Separator(separator),
                });
            }
            if layout.rows.len() != hunk.unified_row_start {
                debug!(
                    file = %set.name,
                    hunk = hunk_idx,
                    cached = hunk.unified_row_start,
                    actual = layout.rows.len(),
                    "stale unified row offset"
                );
            }

            let mut counter = LineCounter::new(hunk);
            for (group_idx, group) in hunk.groups.iter().enumerate() {
                let position = |line| LinePosition {
                    hunk: hunk_idx,
                    group: group_idx,
                    line,
                };
                match group {
                    ChangeLineGroup::Context { lines, no_newline } => {
                        for (line_idx, text) in lines.iter().enumerate() {
                            let (old, new) = counter.context();
                            layout.push(DiffRow {
                                kind: DiffLineKind::Context,
                                position: position(line_idx),
                                deletion_line: Some(old),
                                addition_line: Some(new),
                                text: text.clone(),
                                no_newline: *no_newline && line_idx + 1 == lines.len(),
                                tokens: Vec::new(),
                            });
                        }
                    }
                    ChangeLineGroup::Change {
                        deletions,
                        additions,
                        deletions_no_newline,
                        additions_no_newline,
                    } => {
                        for (line_idx, text) in deletions.iter().enumerate() {
                            layout.push(DiffRow {
                                kind: DiffLineKind::Removed,
                                position: position(line_idx),
                                deletion_line: Some(counter.deletion()),
                                addition_line: None,
                                text: text.clone(),
                                no_newline: *deletions_no_newline
                                    && line_idx + 1 == deletions.len(),
                                tokens: Vec::new(),
                            });
                        }
                        for (line_idx, text) in additions.iter().enumerate() {
                            layout.push(DiffRow {
                                kind: DiffLineKind::Added,
                                position: position(line_idx),
                                deletion_line: None,
                                addition_line: Some(counter.addition()),
                                text: text.clone(),
                                no_newline: *additions_no_newline
                                    && line_idx + 1 == additions.len(),
                                tokens: Vec::new(),
                            });
                        }
                    }
                }
            }
        }

        layout.total_rows = layout.rows.len();
        layout
    }

    fn push(&mut self, line: DiffRow) {
        let row = self.rows.len();
        if let Some(number) = line.deletion_line {
            self.lines.insert((Side::Deletions, number), row);
            self.positions.insert((Side::Deletions, line.position), row);
        }
        if let Some(number) = line.addition_line {
            self.lines.insert((Side::Additions, number), row);
            self.positions.insert((Side::Additions, line.position), row);
        }
        self.rows.push(RowDescriptor {
            row,
            content: RowContent::Line(line),
        });
    }

    /// Row showing source line `line` of `side`. Context lines answer for
    /// both sides with the same row.
    #[must_use]
    pub fn row_for_line(&self, side: Side, line: u32) -> Option<usize> {
        self.lines.get(&(side, line)).copied()
    }

    #[must_use]
    pub fn row_for_position(&self, side: Side, position: LinePosition) -> Option<usize> {
        self.positions.get(&(side, position)).copied()
    }

    #[must_use]
    pub fn row_at(&self, row: usize) -> Option<&RowDescriptor> {
        self.rows.get(row)
    }
}
