//! Rendering session: owns one render target, its row tables, and the
//! highlight requests in flight for it.
//!
//! Highlight results are staged by [`Session::poll`] and applied in one pass
//! by [`Session::flush`], so the row tables are never seen half-updated.

use tracing::{debug, warn};

use crate::config::{ColorScheme, PatchviewConfig};
use crate::diff::{FileHunkSet, HunkDecision, resolve_hunk};
use crate::error::MutationError;
use crate::scheduler::{TaskScheduler, TaskTicket};
use crate::syntax::{ResourceKey, Token};
use crate::view::{
    AnnotationAnchor, DiffLayout, FileLayout, HunkHighlights, LineAnnotation, Side, ViewMode,
    map_annotations, map_file_annotations,
};

/// What a session renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// A single file, no diff.
    File { name: String, contents: String },
    /// One file's hunks.
    Patch(FileHunkSet),
}

impl RenderTarget {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } => name,
            Self::Patch(set) => &set.name,
        }
    }
}

/// Row tables for the current target.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionLayout {
    File(FileLayout),
    Diff(DiffLayout),
}

impl SessionLayout {
    fn build(target: &RenderTarget) -> Self {
        match target {
            RenderTarget::File { name, contents } => Self::File(FileLayout::build(name, contents)),
            RenderTarget::Patch(set) => Self::Diff(DiffLayout::build(set)),
        }
    }
}

/// Which lines a highlight request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HighlightScope {
    File,
    Hunk { index: usize, side: Side },
}

struct PendingHighlight {
    scope: HighlightScope,
    ticket: TaskTicket,
}

pub struct Session {
    target: RenderTarget,
    layout: SessionLayout,
    view_mode: ViewMode,
    theme: String,
    /// Bumped by every load; identifies the current target.
    generation: u64,
    pending: Vec<PendingHighlight>,
    /// Results received but not yet applied.
    staged: Vec<(HighlightScope, Vec<Vec<Token>>)>,
    /// Applied highlights per hunk, kept across mutations.
    hunk_highlights: Vec<HunkHighlights>,
    pub needs_redraw: bool,
}

impl Session {
    #[must_use]
    pub fn new(target: RenderTarget, config: &PatchviewConfig, scheme: ColorScheme) -> Self {
        let layout = SessionLayout::build(&target);
        let hunk_highlights = hunk_slots(&target);
        Self {
            target,
            layout,
            view_mode: config.default_view,
            theme: config.theme.resolve(scheme).to_string(),
            generation: 0,
            pending: Vec::new(),
            staged: Vec::new(),
            hunk_highlights,
            needs_redraw: true,
        }
    }

    #[must_use]
    pub const fn target(&self) -> &RenderTarget {
        &self.target
    }

    #[must_use]
    pub const fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    #[must_use]
    pub const fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Requests still running.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Results waiting for [`Session::flush`].
    #[must_use]
    pub fn staged_batches(&self) -> usize {
        self.staged.len()
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        if self.view_mode != mode {
            self.view_mode = mode;
            self.needs_redraw = true;
        }
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        match &self.layout {
            SessionLayout::File(layout) => layout.total_rows(),
            SessionLayout::Diff(layout) => layout.total_rows(self.view_mode),
        }
    }

    /// Replace the target. Unapplied results are dropped and in-flight
    /// requests are detached; their replies are discarded.
    pub fn load(&mut self, target: RenderTarget) {
        self.generation += 1;
        debug!(
            name = target.name(),
            generation = self.generation,
            detached = self.pending.len(),
            dropped = self.staged.len(),
            "session load"
        );
        self.pending.clear();
        self.staged.clear();
        self.layout = SessionLayout::build(&target);
        self.hunk_highlights = hunk_slots(&target);
        self.target = target;
        self.needs_redraw = true;
    }

    /// Submit tokenization for everything the target shows.
    pub fn request_highlights(&mut self, scheduler: &TaskScheduler) {
        match &self.target {
            RenderTarget::File { name, contents } => {
                let ticket = scheduler.submit(contents.clone(), ResourceKey::new(name, &self.theme));
                self.pending.push(PendingHighlight {
                    scope: HighlightScope::File,
                    ticket,
                });
            }
            RenderTarget::Patch(set) => {
                let old_name = set.prev_name().unwrap_or(&set.name);
                let mut requests = Vec::new();
                for (index, hunk) in set.hunks.iter().enumerate() {
                    if hunk.deletion_count > 0 && !hunk.is_resolved() {
                        let text = hunk.deletion_lines().collect::<Vec<_>>().join("\n");
                        requests.push((index, Side::Deletions, old_name, text));
                    }
                    if hunk.addition_count > 0 {
                        let text = hunk.addition_lines().collect::<Vec<_>>().join("\n");
                        requests.push((index, Side::Additions, set.name.as_str(), text));
                    }
                }
                for (index, side, name, text) in requests {
                    let ticket = scheduler.submit(text, ResourceKey::new(name, &self.theme));
                    self.pending.push(PendingHighlight {
                        scope: HighlightScope::Hunk { index, side },
                        ticket,
                    });
                }
            }
        }
    }

    /// Stage finished results. Returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let mut arrived = 0;
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            match pending.ticket.try_take() {
                None => still_pending.push(pending),
                Some(Ok(lines)) => {
                    self.staged.push((pending.scope, lines));
                    arrived += 1;
                }
                Some(Err(err)) => {
                    warn!(request = pending.ticket.id(), %err, "highlight request failed");
                }
            }
        }
        self.pending = still_pending;
        arrived
    }

    /// Apply every staged result in one pass. Returns the batch count.
    pub fn flush(&mut self) -> usize {
        let batches = std::mem::take(&mut self.staged);
        let applied = batches.len();
        for (scope, lines) in batches {
            match scope {
                HighlightScope::File => {
                    if let SessionLayout::File(layout) = &mut self.layout {
                        layout.apply_highlights(&lines);
                    }
                }
                HighlightScope::Hunk { index, side } => {
                    let Some(slot) = self.hunk_highlights.get_mut(index) else {
                        continue;
                    };
                    match side {
                        Side::Deletions => slot.deletions = lines,
                        Side::Additions => slot.additions = lines,
                    }
                    if let SessionLayout::Diff(layout) = &mut self.layout {
                        layout.apply_highlights(index, slot);
                    }
                }
            }
        }
        if applied > 0 {
            self.needs_redraw = true;
        }
        applied
    }

    /// Accept or reject one hunk, rebuilding the row tables.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the target is not a patch with full
    /// contents, or the index is out of range.
    pub fn resolve(&mut self, hunk: usize, decision: HunkDecision) -> Result<(), MutationError> {
        let RenderTarget::Patch(set) = &self.target else {
            return Err(MutationError::MissingContents {
                name: self.target.name().to_string(),
            });
        };
        let resolved = resolve_hunk(set, hunk, decision)?;

        // Requests for the collapsed hunk describe lines that no longer exist.
        let covers = |scope: HighlightScope| {
            matches!(scope, HighlightScope::Hunk { index, .. } if index == hunk)
        };
        self.pending.retain(|p| !covers(p.scope));
        self.staged.retain(|(scope, _)| !covers(*scope));
        if let Some(slot) = self.hunk_highlights.get_mut(hunk) {
            let winning = match decision {
                HunkDecision::Accept => std::mem::take(&mut slot.additions),
                HunkDecision::Reject => std::mem::take(&mut slot.deletions),
            };
            slot.deletions.clone_from(&winning);
            slot.additions = winning;
        }

        let mut layout = DiffLayout::build(&resolved);
        for (index, highlights) in self.hunk_highlights.iter().enumerate() {
            layout.apply_highlights(index, highlights);
        }
        self.layout = SessionLayout::Diff(layout);
        self.target = RenderTarget::Patch(resolved);
        self.needs_redraw = true;
        Ok(())
    }

    /// Anchor annotations to rows of the active layout.
    #[must_use]
    pub fn annotations<'a, T>(
        &self,
        annotations: &'a [LineAnnotation<T>],
    ) -> Vec<AnnotationAnchor<'a, T>> {
        match &self.layout {
            SessionLayout::File(layout) => map_file_annotations(layout, annotations),
            SessionLayout::Diff(layout) => map_annotations(layout, self.view_mode, annotations),
        }
    }
}

fn hunk_slots(target: &RenderTarget) -> Vec<HunkHighlights> {
    match target {
        RenderTarget::File { .. } => Vec::new(),
        RenderTarget::Patch(set) => vec![HunkHighlights::default(); set.hunks.len()],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::diff::diff_files;
    use crate::syntax::{DEFAULT_THEME, SyntectFactory};
    use crate::view::RowDescriptor;

    fn sync_scheduler() -> TaskScheduler {
        TaskScheduler::new(
            Arc::new(SyntectFactory::new()),
            &SchedulerConfig {
                pool_size: 0,
                preload: Vec::new(),
            },
        )
    }

    fn patch_session() -> Session {
        let set = diff_files(
            "main.rs",
            "fn a() {}\nfn b() {}\n",
            "fn a() {}\nfn c() {}\nfn d() {}\n",
        );
        Session::new(
            RenderTarget::Patch(set),
            &PatchviewConfig::default(),
            ColorScheme::Dark,
        )
    }

    #[test]
    fn test_highlights_apply_only_on_flush() {
        let scheduler = sync_scheduler();
        let mut session = patch_session();
        session.request_highlights(&scheduler);
        assert_eq!(session.poll(), 2);

        let SessionLayout::Diff(layout) = session.layout() else {
            panic!("patch target has a diff layout");
        };
        assert!(
            layout
                .unified
                .rows
                .iter()
                .filter_map(RowDescriptor::as_line)
                .all(|line| line.tokens.is_empty())
        );

        assert_eq!(session.flush(), 2);
        let SessionLayout::Diff(layout) = session.layout() else {
            panic!("patch target has a diff layout");
        };
        assert!(
            layout
                .unified
                .rows
                .iter()
                .filter_map(RowDescriptor::as_line)
                .any(|line| !line.tokens.is_empty())
        );
    }

    #[test]
    fn test_load_drops_staged_results() {
        let scheduler = sync_scheduler();
        let mut session = patch_session();
        session.request_highlights(&scheduler);
        session.poll();
        assert!(session.staged_batches() > 0);

        session.load(RenderTarget::File {
            name: "notes.txt".into(),
            contents: "hello\n".into(),
        });
        assert_eq!(session.staged_batches(), 0);
        assert_eq!(session.pending_requests(), 0);
        assert_eq!(session.generation(), 1);
        assert_eq!(session.flush(), 0);
    }

    #[test]
    fn test_resolve_rebuilds_layout() {
        let mut session = patch_session();
        let before = session.total_rows();
        session.resolve(0, HunkDecision::Accept).expect("resolvable");
        assert!(session.total_rows() < before);

        let mut file = Session::new(
            RenderTarget::File {
                name: "a.txt".into(),
                contents: "x\n".into(),
            },
            &PatchviewConfig::default(),
            ColorScheme::Dark,
        );
        assert!(file.resolve(0, HunkDecision::Accept).is_err());
        assert_eq!(file.theme, DEFAULT_THEME);
    }
}
