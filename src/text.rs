//! Text utilities

/// Lines of a text blob, without terminators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitText {
    pub lines: Vec<String>,
    /// Whether the final line was terminated by `\n`.
    pub trailing_newline: bool,
}

/// Split text into lines, accepting both `\n` and `\r\n` terminators.
///
/// An empty input yields no lines. A trailing newline does not produce an
/// extra empty line; it is recorded in [`SplitText::trailing_newline`].
#[must_use]
pub fn split_lines(text: &str) -> SplitText {
    if text.is_empty() {
        return SplitText::default();
    }
    let trailing_newline = text.ends_with('\n');
    let lines = text
        .lines()
        .map(ToString::to_string)
        .collect();
    SplitText {
        lines,
        trailing_newline,
    }
}

/// Join lines back into a newline-terminated blob.
#[must_use]
pub fn join_lines<S: AsRef<str>>(lines: &[S], trailing_newline: bool) -> String {
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(line.as_ref());
    }
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

/// Strip a single trailing `\r` left behind by CRLF input.
#[must_use]
pub fn trim_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_trailing_newline() {
        let split = split_lines("a\nb\n");
        assert_eq!(split.lines, vec!["a", "b"]);
        assert!(split.trailing_newline);

        let split = split_lines("a\r\nb");
        assert_eq!(split.lines, vec!["a", "b"]);
        assert!(!split.trailing_newline);
    }

    #[test]
    fn test_split_empty() {
        let split = split_lines("");
        assert!(split.lines.is_empty());
        assert!(!split.trailing_newline);
    }

    #[test]
    fn test_join_round_trips() {
        let text = "fn main() {\n}\n";
        let split = split_lines(text);
        assert_eq!(join_lines(&split.lines, split.trailing_newline), text);
    }
}
