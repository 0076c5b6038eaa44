//! Unified diff parser
//!
//! Parses git-style multi-file patches (and plain `diff -u` output) into
//! [`ParsedPatch`] values. Malformed units are logged and skipped; parsing
//! never fails as a whole.

use tracing::{debug, warn};

use super::types::{ChangeKind, ChangeLineGroup, FileHunkSet, Hunk, ParsedPatch};
use crate::text::trim_cr;

const GIT_FILE_MARKER: &str = "diff --git ";
const DEV_NULL: &str = "/dev/null";

/// Parse a patch holding at most one metadata block.
///
/// A second metadata block (for example another commit header in a patch
/// series) is logged and skipped; files after it are still parsed. Use
/// [`parse_patch_series`] to keep one [`ParsedPatch`] per commit.
#[must_use]
pub fn parse_patch(text: &str) -> ParsedPatch {
    let lines: Vec<&str> = text.lines().map(trim_cr).collect();
    let blocks = split_blocks(&lines, false);
    let mut patch = ParsedPatch::default();

    for (idx, block) in blocks.into_iter().enumerate() {
        match block {
            Block::Metadata(body) if idx == 0 => patch.metadata = metadata_text(body),
            Block::Metadata(body) => {
                warn!(
                    lines = body.len(),
                    first = body.first().copied().unwrap_or_default(),
                    "unexpected metadata block after file diffs; skipping"
                );
            }
            Block::File(body) => {
                if let Some(file) = parse_file_block(body) {
                    patch.files.push(file);
                }
            }
        }
    }

    patch
}

/// Parse a `git format-patch` series into one [`ParsedPatch`] per commit.
///
/// Input without commit headers yields a single patch. Empty input yields
/// no patches.
#[must_use]
pub fn parse_patch_series(text: &str) -> Vec<ParsedPatch> {
    let lines: Vec<&str> = text.lines().map(trim_cr).collect();
    let mut patches: Vec<ParsedPatch> = Vec::new();

    for block in split_blocks(&lines, true) {
        match block {
            Block::Metadata(body) => patches.push(ParsedPatch {
                metadata: metadata_text(body),
                files: Vec::new(),
            }),
            Block::File(body) => {
                if patches.is_empty() {
                    patches.push(ParsedPatch::default());
                }
                if let Some(file) = parse_file_block(body) {
                    if let Some(current) = patches.last_mut() {
                        current.files.push(file);
                    }
                }
            }
        }
    }

    patches
}

enum Block<'a> {
    Metadata(&'a [&'a str]),
    File(&'a [&'a str]),
}

/// Split lines into metadata and per-file blocks.
///
/// Hunk bodies are skipped by their declared counts so that content lines
/// such as `--- x` are never mistaken for file headers. With
/// `split_commits`, every commit header opens a new metadata block even
/// before any file has been seen.
fn split_blocks<'a>(lines: &'a [&'a str], split_commits: bool) -> Vec<Block<'a>> {
    let git_style = lines.iter().any(|l| l.starts_with(GIT_FILE_MARKER));
    let mut blocks = Vec::new();
    let mut start = 0usize;
    let mut current_is_file = false;
    let mut seen_file = false;
    let mut remaining = (0u32, 0u32);
    let mut idx = 0usize;

    let close = |blocks: &mut Vec<Block<'a>>, start: usize, end: usize, is_file: bool| {
        if end > start {
            let body = &lines[start..end];
            blocks.push(if is_file {
                Block::File(body)
            } else {
                Block::Metadata(body)
            });
        }
    };

    while idx < lines.len() {
        let line = lines[idx];

        if remaining != (0, 0) {
            if ends_short_hunk(line, git_style) {
                debug!(
                    line,
                    deletions = remaining.0,
                    additions = remaining.1,
                    "hunk body ended before its declared length"
                );
                remaining = (0, 0);
            } else {
                remaining = consume_body_line(line, remaining);
                idx += 1;
                continue;
            }
        }

        let starts_file = if git_style {
            line.starts_with(GIT_FILE_MARKER)
        } else {
            line.starts_with("--- ")
                && lines.get(idx + 1).is_some_and(|next| next.starts_with("+++ "))
        };
        let starts_commit = is_commit_header(line) && (seen_file || split_commits);

        if starts_file {
            close(&mut blocks, start, idx, current_is_file);
            start = idx;
            current_is_file = true;
            seen_file = true;
            // Plain diffs carry the pair of header lines; step past both.
            if !git_style {
                idx += 1;
            }
        } else if starts_commit {
            close(&mut blocks, start, idx, current_is_file);
            start = idx;
            current_is_file = false;
        } else if current_is_file && line.starts_with("@@") {
            if let Some(header) = parse_hunk_header(line) {
                remaining = (header.deletion_count, header.addition_count);
            }
        }
        idx += 1;
    }
    close(&mut blocks, start, lines.len(), current_is_file);
    blocks
}

/// A line that cannot belong to a hunk body, so the previous hunk was
/// shorter than its header claimed.
fn ends_short_hunk(line: &str, git_style: bool) -> bool {
    if git_style && line.starts_with(GIT_FILE_MARKER) {
        return true;
    }
    !matches!(
        line.as_bytes().first(),
        None | Some(b' ' | b'-' | b'+' | b'\\')
    )
}

/// Decrement remaining hunk counts for one body line.
fn consume_body_line(line: &str, (del, add): (u32, u32)) -> (u32, u32) {
    match line.as_bytes().first() {
        Some(b'-') => (del.saturating_sub(1), add),
        Some(b'+') => (del, add.saturating_sub(1)),
        Some(b'\\') => (del, add),
        // Context, including blank lines whose leading space was stripped.
        _ => (del.saturating_sub(1), add.saturating_sub(1)),
    }
}

/// `From <40 hex> ...` as written by `git format-patch`.
fn is_commit_header(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("From ") else {
        return false;
    };
    let sha = rest.split(' ').next().unwrap_or_default();
    sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

fn metadata_text(body: &[&str]) -> Option<String> {
    let text = body.join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

// ---------------------------------------------------------------------------
// File blocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FileHeader {
    git_names: Option<(String, String)>,
    old_path: Option<Option<String>>,
    new_path: Option<Option<String>>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    classifier: Option<Classifier>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Classifier {
    New,
    Deleted,
    RenamedPure,
    RenamedChanged,
}

fn parse_file_block(body: &[&str]) -> Option<FileHunkSet> {
    let header_end = body
        .iter()
        .position(|l| l.starts_with("@@"))
        .unwrap_or(body.len());
    let header = parse_file_header(&body[..header_end]);
    let hunks = parse_hunks(&body[header_end..]);

    // Rename-only and mode-only blocks have no `@@` lines and stay.
    if header_end < body.len() && hunks.is_empty() {
        warn!(
            first = body.first().copied().unwrap_or_default(),
            "every hunk in the file block was malformed; skipping file"
        );
        return None;
    }

    let Some((name, kind)) = resolve_identity(header) else {
        warn!(
            first = body.first().copied().unwrap_or_default(),
            hunks = hunks.len(),
            "file block has no recognizable file identity; skipping"
        );
        return None;
    };

    Some(FileHunkSet::new(name, kind, hunks))
}

fn parse_file_header(lines: &[&str]) -> FileHeader {
    let mut header = FileHeader::default();
    for line in lines {
        if let Some(rest) = line.strip_prefix(GIT_FILE_MARKER) {
            header.git_names = parse_git_names(rest);
            if header.git_names.is_none() {
                warn!(line, "malformed diff --git line");
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            header.old_path = Some(header_path(rest, "a/"));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            header.new_path = Some(header_path(rest, "b/"));
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            header.rename_from = Some(unquote(rest));
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            header.rename_to = Some(unquote(rest));
        } else if header.classifier.is_none() {
            header.classifier = classify(line);
        }
    }
    header
}

/// Prefix classifier for the metadata line following `diff --git`.
fn classify(line: &str) -> Option<Classifier> {
    if line.starts_with("new file mode") {
        Some(Classifier::New)
    } else if line.starts_with("deleted file mode") {
        Some(Classifier::Deleted)
    } else if line.starts_with("similarity index 100%") {
        Some(Classifier::RenamedPure)
    } else if line.starts_with("similarity index") {
        Some(Classifier::RenamedChanged)
    } else {
        None
    }
}

fn resolve_identity(header: FileHeader) -> Option<(String, ChangeKind)> {
    let (git_old, git_new) = header.git_names.unzip();
    let old_name = header
        .rename_from
        .or_else(|| header.old_path.clone().flatten())
        .or(git_old);
    let new_name = header
        .rename_to
        .or_else(|| header.new_path.clone().flatten())
        .or(git_new);

    // Plain diffs mark creation and deletion with /dev/null.
    let classifier = header.classifier.or_else(|| match (&header.old_path, &header.new_path) {
        (Some(None), Some(Some(_))) => Some(Classifier::New),
        (Some(Some(_)), Some(None)) => Some(Classifier::Deleted),
        _ => None,
    });

    let kind = match classifier {
        Some(Classifier::New) => ChangeKind::New,
        Some(Classifier::Deleted) => ChangeKind::Deleted,
        Some(Classifier::RenamedPure) => match &old_name {
            Some(from) => ChangeKind::RenamedPure { from: from.clone() },
            None => ChangeKind::Changed,
        },
        Some(Classifier::RenamedChanged) => match &old_name {
            Some(from) => ChangeKind::RenamedChanged { from: from.clone() },
            None => ChangeKind::Changed,
        },
        None => ChangeKind::Changed,
    };

    let name = match kind {
        ChangeKind::Deleted => old_name.or(new_name),
        _ => new_name.or(old_name),
    }?;
    Some((name, kind))
}

/// Split `a/<old> b/<new>`, preferring the split where both halves match.
fn parse_git_names(rest: &str) -> Option<(String, String)> {
    if rest.starts_with('"') {
        let (old, tail) = split_quoted(rest)?;
        let new = unquote(tail.trim_start());
        return Some((strip_side(&old, "a/"), strip_side(&new, "b/")));
    }

    let candidates: Vec<usize> = rest.match_indices(" b/").map(|(pos, _)| pos).collect();
    let split = candidates
        .iter()
        .copied()
        .find(|&pos| strip_side(&rest[..pos], "a/") == strip_side(&rest[pos + 1..], "b/"))
        .or_else(|| candidates.first().copied())
        .or_else(|| rest.find(' '))?;

    let old = strip_side(&rest[..split], "a/");
    let new = unquote(&rest[split + 1..]);
    let new = strip_side(&new, "b/");
    if old.is_empty() || new.is_empty() {
        return None;
    }
    Some((old, new))
}

/// Path from a `---`/`+++` line; `None` for `/dev/null`.
fn header_path(rest: &str, side_prefix: &str) -> Option<String> {
    // Plain diffs append a tab and timestamp.
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    let path = unquote(path);
    if path == DEV_NULL {
        None
    } else {
        Some(strip_side(&path, side_prefix))
    }
}

fn strip_side(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

fn unquote(text: &str) -> String {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .to_string()
}

fn split_quoted(text: &str) -> Option<(String, &str)> {
    let inner = text.strip_prefix('"')?;
    let end = inner.find('"')?;
    Some((inner[..end].to_string(), &inner[end + 1..]))
}

// ---------------------------------------------------------------------------
// Hunks
// ---------------------------------------------------------------------------

/// Parsed `@@ -d,dc +a,ac @@ caption` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HunkHeader {
    pub deletion_start: u32,
    pub deletion_count: u32,
    pub addition_start: u32,
    pub addition_count: u32,
    pub caption: Option<String>,
}

/// Parse a hunk header. A count omitted by git means 1; any empty or
/// non-numeric field rejects the header.
pub(crate) fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let rest = line.strip_prefix("@@ ")?;
    let close = rest.find(" @@")?;
    let ranges = &rest[..close];
    let caption = rest[close + 3..].trim_start_matches(' ');

    let mut parts = ranges.split(' ');
    let deletion = parts.next()?.strip_prefix('-')?;
    let addition = parts.next()?.strip_prefix('+')?;
    if parts.next().is_some() {
        return None;
    }

    let (deletion_start, deletion_count) = parse_range(deletion)?;
    let (addition_start, addition_count) = parse_range(addition)?;
    // The last line of each side must stay addressable.
    deletion_start.checked_add(deletion_count)?;
    addition_start.checked_add(addition_count)?;

    Some(HunkHeader {
        deletion_start,
        deletion_count,
        addition_start,
        addition_count,
        caption: if caption.is_empty() {
            None
        } else {
            Some(caption.to_string())
        },
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((parse_number(start)?, parse_number(count)?)),
        None => Some((parse_number(range)?, 1)),
    }
}

fn parse_number(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_hunks(lines: &[&str]) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;
        if !line.starts_with("@@") {
            debug!(line, "ignoring line outside any hunk");
            continue;
        }

        let body_end = lines[idx..]
            .iter()
            .position(|l| l.starts_with("@@"))
            .map_or(lines.len(), |pos| idx + pos);
        let body = &lines[idx..body_end];
        idx = body_end;

        let Some(header) = parse_hunk_header(line) else {
            warn!(header = line, "malformed hunk header; dropping hunk");
            continue;
        };
        hunks.push(build_hunk(line, header, body));
    }

    hunks
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum LineOrigin {
    Context,
    Deletion,
    Addition,
}

/// Coalesces consecutive same-kind lines into [`ChangeLineGroup`]s.
#[derive(Default)]
pub(super) struct GroupBuilder {
    pub(super) groups: Vec<ChangeLineGroup>,
    last: Option<LineOrigin>,
}

impl GroupBuilder {
    pub(super) fn push(&mut self, origin: LineOrigin, text: &str) {
        let text = text.to_string();
        match (origin, self.groups.last_mut()) {
            (LineOrigin::Context, Some(ChangeLineGroup::Context { lines, .. })) => lines.push(text),
            (LineOrigin::Deletion, Some(ChangeLineGroup::Change { deletions, .. })) => {
                deletions.push(text);
            }
            (LineOrigin::Addition, Some(ChangeLineGroup::Change { additions, .. })) => {
                additions.push(text);
            }
            (LineOrigin::Context, _) => self.groups.push(ChangeLineGroup::Context {
                lines: vec![text],
                no_newline: false,
            }),
            (LineOrigin::Deletion, _) => self.groups.push(ChangeLineGroup::Change {
                deletions: vec![text],
                additions: Vec::new(),
                deletions_no_newline: false,
                additions_no_newline: false,
            }),
            (LineOrigin::Addition, _) => self.groups.push(ChangeLineGroup::Change {
                deletions: Vec::new(),
                additions: vec![text],
                deletions_no_newline: false,
                additions_no_newline: false,
            }),
        }
        self.last = Some(origin);
    }

    /// Attach a `\ No newline at end of file` marker to the preceding line.
    pub(super) fn mark_no_newline(&mut self) {
        match (self.last, self.groups.last_mut()) {
            (Some(LineOrigin::Context), Some(ChangeLineGroup::Context { no_newline, .. })) => {
                *no_newline = true;
            }
            (
                Some(LineOrigin::Deletion),
                Some(ChangeLineGroup::Change {
                    deletions_no_newline,
                    ..
                }),
            ) => *deletions_no_newline = true,
            (
                Some(LineOrigin::Addition),
                Some(ChangeLineGroup::Change {
                    additions_no_newline,
                    ..
                }),
            ) => *additions_no_newline = true,
            _ => debug!("no-newline marker without a preceding line"),
        }
    }
}

fn build_hunk(raw_header: &str, header: HunkHeader, body: &[&str]) -> Hunk {
    let mut builder = GroupBuilder::default();
    let mut remaining = (header.deletion_count, header.addition_count);

    for (offset, line) in body.iter().enumerate() {
        if line.starts_with('\\') {
            builder.mark_no_newline();
            continue;
        }
        if remaining == (0, 0) {
            debug!(
                header = raw_header,
                trailing = body.len() - offset,
                "ignoring lines past the declared hunk length"
            );
            break;
        }
        let (origin, text) = match line.as_bytes().first() {
            Some(b' ') => (LineOrigin::Context, &line[1..]),
            Some(b'-') => (LineOrigin::Deletion, &line[1..]),
            Some(b'+') => (LineOrigin::Addition, &line[1..]),
            None => (LineOrigin::Context, ""),
            Some(_) => {
                warn!(header = raw_header, line, "unrecognized hunk line; ending hunk");
                break;
            }
        };
        builder.push(origin, text);
        remaining = consume_body_line(line, remaining);
    }

    let hunk = Hunk::new(
        header.deletion_start,
        header.addition_start,
        header.caption,
        builder.groups,
    );
    if hunk.deletion_count != header.deletion_count || hunk.addition_count != header.addition_count
    {
        warn!(
            header = raw_header,
            deletions = hunk.deletion_count,
            additions = hunk.addition_count,
            "hunk body disagrees with header counts; using the lines present"
        );
    }
    hunk
}
