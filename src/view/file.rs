//! Plain single-file rendering: one row per line, no sides.

use crate::syntax::Token;
use crate::text::split_lines;

#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    /// 1-based line number.
    pub line_number: u32,
    pub text: String,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileLayout {
    pub name: String,
    pub rows: Vec<FileRow>,
}

impl FileLayout {
    #[must_use]
    pub fn build(name: &str, contents: &str) -> Self {
        let rows = split_lines(contents)
            .lines
            .into_iter()
            .enumerate()
            .map(|(idx, text)| FileRow {
                line_number: u32::try_from(idx + 1).unwrap_or(u32::MAX),
                text,
                tokens: Vec::new(),
            })
            .collect();
        Self {
            name: name.to_string(),
            rows,
        }
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// Row showing 1-based line `line`.
    #[must_use]
    pub fn row_for_line(&self, line: u32) -> Option<usize> {
        let row = (line as usize).checked_sub(1)?;
        (row < self.rows.len()).then_some(row)
    }

    /// Attach highlighted lines, starting at the first row.
    pub fn apply_highlights(&mut self, lines: &[Vec<Token>]) {
        for (row, tokens) in self.rows.iter_mut().zip(lines) {
            row.tokens.clone_from(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_one_based_lines() {
        let layout = FileLayout::build("a.txt", "first\nsecond\n");
        assert_eq!(layout.total_rows(), 2);
        assert_eq!(layout.rows[1].line_number, 2);
        assert_eq!(layout.row_for_line(2), Some(1));
        assert_eq!(layout.row_for_line(0), None);
        assert_eq!(layout.row_for_line(3), None);
    }
}
