//! Two-column layout. Change groups pad the shorter side with a filler span
//! so both columns always have the same height.

use std::collections::HashMap;

use tracing::debug;

use super::{
    DiffLineKind, DiffRow, LineCounter, LinePosition, RowContent, RowDescriptor, Side,
    leading_hidden_lines, separator_for,
};
use crate::diff::{ChangeLineGroup, FileHunkSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitLayout {
    /// Left column (old file), sorted by row.
    pub deletions: Vec<RowDescriptor>,
    /// Right column (new file), sorted by row.
    pub additions: Vec<RowDescriptor>,
    pub total_rows: usize,
    /// Unchanged lines above the first hunk.
    pub leading_hidden_lines: u32,
    lines: HashMap<(Side, u32), usize>,
    positions: HashMap<(Side, LinePosition), usize>,
}

impl SplitLayout {
    #[must_use]
    pub fn build(set: &FileHunkSet) -> Self {
        let mut layout = Self {
            leading_hidden_lines: leading_hidden_lines(set),
            ..Self::default()
        };
        let mut row = 0usize;

        for (hunk_idx, hunk) in set.hunks.iter().enumerate() {
            if let Some(separator) = separator_for(set, hunk_idx) {
                layout.deletions.push(RowDescriptor {
                    row,
                    content: RowContent::Separator(separator.clone()),
                });
                layout.additions.push(RowDescriptor {
                    row,
                    content: RowContent::Separator(separator),
                });
                row += 1;
            }
            if row != hunk.split_row_start {
                debug!(
                    file = %set.name,
                    hunk = hunk_idx,
                    cached = hunk.split_row_start,
                    actual = row,
                    "stale split row offset"
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
                            let line = DiffRow {
                                kind: DiffLineKind::Context,
                                position: position(line_idx),
                                deletion_line: Some(old),
                                addition_line: Some(new),
                                text: text.clone(),
                                no_newline: *no_newline && line_idx + 1 == lines.len(),
                                tokens: Vec::new(),
                            };
                            layout.push(Side::Deletions, row, line.clone());
                            layout.push(Side::Additions, row, line);
                            row += 1;
                        }
                    }
                    ChangeLineGroup::Change {
                        deletions,
                        additions,
                        deletions_no_newline,
                        additions_no_newline,
                    } => {
                        for (line_idx, text) in deletions.iter().enumerate() {
                            let line = DiffRow {
                                kind: DiffLineKind::Removed,
                                position: position(line_idx),
                                deletion_line: Some(counter.deletion()),
                                addition_line: None,
                                text: text.clone(),
                                no_newline: *deletions_no_newline
                                    && line_idx + 1 == deletions.len(),
                                tokens: Vec::new(),
                            };
                            layout.push(Side::Deletions, row + line_idx, line);
                        }
                        for (line_idx, text) in additions.iter().enumerate() {
                            let line = DiffRow {
                                kind: DiffLineKind::Added,
                                position: position(line_idx),
                                deletion_line: None,
                                addition_line: Some(counter.addition()),
                                text: text.clone(),
                                no_newline: *additions_no_newline
                                    && line_idx + 1 == additions.len(),
                                tokens: Vec::new(),
                            };
                            layout.push(Side::Additions, row + line_idx, line);
                        }

                        let (deletion_filler, addition_filler) = group.filler();
                        if deletion_filler > 0 {
                            layout.deletions.push(RowDescriptor {
                                row: row + deletions.len(),
                                content: RowContent::Filler {
                                    span: deletion_filler,
                                },
                            });
                        }
                        if addition_filler > 0 {
                            layout.additions.push(RowDescriptor {
                                row: row + additions.len(),
                                content: RowContent::Filler {
                                    span: addition_filler,
                                },
                            });
                        }
                        row += group.split_rows();
                    }
                }
            }
        }

        layout.total_rows = row;
        layout
    }

    fn push(&mut self, side: Side, row: usize, line: DiffRow) {
        let number = match side {
            Side::Deletions => line.deletion_line,
            Side::Additions => line.addition_line,
        };
        if let Some(number) = number {
            self.lines.insert((side, number), row);
        }
        self.positions.insert((side, line.position), row);
        let column = match side {
            Side::Deletions => &mut self.deletions,
            Side::Additions => &mut self.additions,
        };
        column.push(RowDescriptor {
            row,
            content: RowContent::Line(line),
        });
    }

    /// Row showing source line `line` of `side`.
    #[must_use]
    pub fn row_for_line(&self, side: Side, line: u32) -> Option<usize> {
        self.lines.get(&(side, line)).copied()
    }

    #[must_use]
    pub fn row_for_position(&self, side: Side, position: LinePosition) -> Option<usize> {
        self.positions.get(&(side, position)).copied()
    }

    /// The left and right entries covering visual row `row`.
    #[must_use]
    pub fn row_at(&self, row: usize) -> (Option<&RowDescriptor>, Option<&RowDescriptor>) {
        (covering(&self.deletions, row), covering(&self.additions, row))
    }

    /// Sum of entry heights in one column; equals `total_rows` for both.
    #[must_use]
    pub fn column_height(&self, side: Side) -> usize {
        let column = match side {
            Side::Deletions => &self.deletions,
            Side::Additions => &self.additions,
        };
        column.iter().map(RowDescriptor::height).sum()
    }
}

fn covering(column: &[RowDescriptor], row: usize) -> Option<&RowDescriptor> {
    let idx = column.partition_point(|entry| entry.row <= row);
    let entry = column.get(idx.checked_sub(1)?)?;
    (row < entry.row + entry.height()).then_some(entry)
}
