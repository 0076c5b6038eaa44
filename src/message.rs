//! Message types for the Elm Architecture

use crate::diff::HunkDecision;
use crate::session::RenderTarget;
use crate::view::ViewMode;

/// All actions a host can apply to a session
#[derive(Debug, Clone)]
pub enum Message {
    // === Target ===
    /// Replace the rendered target and request its highlights
    Load(RenderTarget),
    /// Re-request highlights for the current target
    Rehighlight,

    // === View ===
    /// Switch between split and unified
    SetViewMode(ViewMode),
    ToggleViewMode,

    // === Hunk actions ===
    /// Keep a hunk's added lines
    AcceptHunk(usize),
    /// Keep a hunk's deleted lines
    RejectHunk(usize),

    // === Frame ===
    /// Collect finished highlight results and apply them
    Frame,
}

impl Message {
    /// The hunk decision carried by this message, if any.
    #[must_use]
    pub const fn decision(&self) -> Option<(usize, HunkDecision)> {
        match self {
            Self::AcceptHunk(index) => Some((*index, HunkDecision::Accept)),
            Self::RejectHunk(index) => Some((*index, HunkDecision::Reject)),
            _ => None,
        }
    }
}
