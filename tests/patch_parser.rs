use patchview::diff::{ChangeKind, ChangeLineGroup, parse_patch};

const TWO_FILES: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,3 @@ mod tests {
 use std::io;
-fn old() {}
+fn new() {}
 fn tail() {}
diff --git a/README.md b/README.md
index 3333333..4444444 100644
--- a/README.md
+++ b/README.md
@@ -1,x +1,2 @@
 # title
+more
";

#[test]
fn file_whose_only_hunk_is_malformed_is_dropped() {
    let parsed = parse_patch(TWO_FILES);

    assert_eq!(parsed.files.len(), 1);
    let lib = &parsed.files[0];
    assert_eq!(lib.name, "src/lib.rs");
    assert_eq!(lib.hunks.len(), 1);
    assert_eq!(lib.hunks[0].caption.as_deref(), Some("mod tests {"));
}

#[test]
fn short_hunk_does_not_swallow_the_next_file() {
    let diff = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,5 +1,5 @@
-one
+ONE
diff --git a/b.txt b/b.txt
--- a/b.txt
+++ b/b.txt
@@ -1 +1 @@
-two
+TWO
";
    let parsed = parse_patch(diff);
    let files: Vec<(&str, usize)> = parsed
        .files
        .iter()
        .map(|f| (f.name.as_str(), f.hunks.len()))
        .collect();
    assert_eq!(files, [("a.txt", 1), ("b.txt", 1)]);

    let short = &parsed.files[0].hunks[0];
    assert_eq!((short.deletion_count, short.addition_count), (1, 1));
    assert_eq!(
        parsed.files[1].hunks[0].addition_lines().collect::<Vec<_>>(),
        ["TWO"]
    );
}

#[test]
fn context_breaks_change_groups() {
    let diff = "\
diff --git a/f.txt b/f.txt
--- a/f.txt
+++ b/f.txt
@@ -1,5 +1,5 @@
-a
+A
 b
-c
+C
 d
 e
";
    let parsed = parse_patch(diff);
    let groups = &parsed.files[0].hunks[0].groups;
    let kinds: Vec<bool> = groups.iter().map(ChangeLineGroup::is_change).collect();
    assert_eq!(kinds, [true, false, true, false]);
    assert_eq!(parsed.files[0].change_counts().added, 2);
    assert_eq!(parsed.files[0].change_counts().removed, 2);
}

#[test]
fn rename_only_file_has_no_hunks() {
    let diff = "\
diff --git a/old.rs b/new.rs
similarity index 100%
rename from old.rs
rename to new.rs
";
    let parsed = parse_patch(diff);
    assert_eq!(parsed.files.len(), 1);
    let file = &parsed.files[0];
    assert_eq!(file.name, "new.rs");
    assert_eq!(file.prev_name(), Some("old.rs"));
    assert_eq!(
        file.change_kind,
        ChangeKind::RenamedPure {
            from: "old.rs".into()
        }
    );
    assert!(file.hunks.is_empty());
}

#[test]
fn crlf_input_matches_lf_input() {
    let crlf = TWO_FILES.replace('\n', "\r\n");
    assert_eq!(parse_patch(&crlf), parse_patch(TWO_FILES));
}

#[test]
fn header_round_trips_through_hunk() {
    let parsed = parse_patch(TWO_FILES);
    assert_eq!(parsed.files[0].hunks[0].header(), "@@ -1,3 +1,3 @@ mod tests {");
}
