//! Anchor line annotations to layout rows.
//!
//! An annotation whose line is not shown (collapsed context, stale line
//! number) is dropped without error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{DiffLayout, FileLayout, Side, SplitLayout, UnifiedLayout, ViewMode};

/// A caller payload attached to one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAnnotation<T> {
    pub side: Side,
    pub line_number: u32,
    pub metadata: T,
}

impl<T> LineAnnotation<T> {
    pub const fn new(side: Side, line_number: u32, metadata: T) -> Self {
        Self {
            side,
            line_number,
            metadata,
        }
    }
}

/// Annotations rendered together at one row.
#[derive(Debug, PartialEq, Eq)]
pub struct AnnotationAnchor<'a, T> {
    pub row: usize,
    /// Column in split mode; `None` when the anchor spans the row.
    pub side: Option<Side>,
    pub annotations: Vec<&'a LineAnnotation<T>>,
}

/// Plain file mapping; `side` is ignored.
#[must_use]
pub fn map_file_annotations<'a, T>(
    layout: &FileLayout,
    annotations: &'a [LineAnnotation<T>],
) -> Vec<AnnotationAnchor<'a, T>> {
    let mut by_row: BTreeMap<usize, Vec<&'a LineAnnotation<T>>> = BTreeMap::new();
    for annotation in annotations {
        match layout.row_for_line(annotation.line_number) {
            Some(row) => by_row.entry(row).or_default().push(annotation),
            None => trace!(line = annotation.line_number, "orphaned file annotation"),
        }
    }
    by_row
        .into_iter()
        .map(|(row, annotations)| AnnotationAnchor {
            row,
            side: None,
            annotations,
        })
        .collect()
}

/// Split mapping: each side is its own column, so annotations on the same
/// row but different sides stay separate anchors.
#[must_use]
pub fn map_split_annotations<'a, T>(
    layout: &SplitLayout,
    annotations: &'a [LineAnnotation<T>],
) -> Vec<AnnotationAnchor<'a, T>> {
    let mut by_cell: BTreeMap<(usize, Side), Vec<&'a LineAnnotation<T>>> = BTreeMap::new();
    for annotation in annotations {
        match layout.row_for_line(annotation.side, annotation.line_number) {
            Some(row) => by_cell
                .entry((row, annotation.side))
                .or_default()
                .push(annotation),
            None => trace!(
                side = ?annotation.side,
                line = annotation.line_number,
                "orphaned split annotation"
            ),
        }
    }
    by_cell
        .into_iter()
        .map(|((row, side), annotations)| AnnotationAnchor {
            row,
            side: Some(side),
            annotations,
        })
        .collect()
}

/// Unified mapping: annotations from both sides landing on one row merge
/// into a single anchor, deletion side first.
#[must_use]
pub fn map_unified_annotations<'a, T>(
    layout: &UnifiedLayout,
    annotations: &'a [LineAnnotation<T>],
) -> Vec<AnnotationAnchor<'a, T>> {
    let mut by_row: BTreeMap<usize, (Vec<&'a LineAnnotation<T>>, Vec<&'a LineAnnotation<T>>)> =
        BTreeMap::new();
    for annotation in annotations {
        let Some(row) = layout.row_for_line(annotation.side, annotation.line_number) else {
            trace!(
                side = ?annotation.side,
                line = annotation.line_number,
                "orphaned unified annotation"
            );
            continue;
        };
        let (deletions, additions) = by_row.entry(row).or_default();
        match annotation.side {
            Side::Deletions => deletions.push(annotation),
            Side::Additions => additions.push(annotation),
        }
    }
    by_row
        .into_iter()
        .map(|(row, (mut deletions, additions))| {
            deletions.extend(additions);
            AnnotationAnchor {
                row,
                side: None,
                annotations: deletions,
            }
        })
        .collect()
}

/// Dispatch on the active view mode.
#[must_use]
pub fn map_annotations<'a, T>(
    layout: &DiffLayout,
    mode: ViewMode,
    annotations: &'a [LineAnnotation<T>],
) -> Vec<AnnotationAnchor<'a, T>> {
    match mode {
        ViewMode::Split => map_split_annotations(&layout.split, annotations),
        ViewMode::Unified => map_unified_annotations(&layout.unified, annotations),
    }
}
