//! State update logic (Elm Architecture)

use tracing::debug;

use crate::error::MutationError;
use crate::message::Message;
use crate::scheduler::TaskScheduler;
use crate::session::Session;
use crate::view::ViewMode;

/// Apply one message to the session.
///
/// # Errors
///
/// Returns [`MutationError`] when an accept/reject cannot be applied; the
/// session is left unchanged in that case.
pub fn update(
    session: &mut Session,
    scheduler: &TaskScheduler,
    msg: Message,
) -> Result<(), MutationError> {
    if let Some((hunk, decision)) = msg.decision() {
        session.resolve(hunk, decision)?;
        debug!(hunk, ?decision, "hunk resolved");
        return Ok(());
    }

    match msg {
        // === Target ===
        Message::Load(target) => {
            session.load(target);
            session.request_highlights(scheduler);
        }
        Message::Rehighlight => session.request_highlights(scheduler),

        // === View ===
        Message::SetViewMode(mode) => session.set_view_mode(mode),
        Message::ToggleViewMode => {
            let next = match session.view_mode() {
                ViewMode::Split => ViewMode::Unified,
                ViewMode::Unified => ViewMode::Split,
            };
            session.set_view_mode(next);
        }

        // === Frame ===
        Message::Frame => {
            session.poll();
            session.flush();
        }

        Message::AcceptHunk(_) | Message::RejectHunk(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{ColorScheme, PatchviewConfig, SchedulerConfig};
    use crate::diff::diff_files;
    use crate::session::RenderTarget;
    use crate::syntax::SyntectFactory;

    fn setup() -> (Session, TaskScheduler) {
        let scheduler = TaskScheduler::new(
            Arc::new(SyntectFactory::new()),
            &SchedulerConfig {
                pool_size: 0,
                preload: Vec::new(),
            },
        );
        let session = Session::new(
            RenderTarget::Patch(diff_files("a.rs", "let a = 1;\n", "let a = 2;\n")),
            &PatchviewConfig::default(),
            ColorScheme::Dark,
        );
        (session, scheduler)
    }

    #[test]
    fn test_toggle_view_mode() {
        let (mut session, scheduler) = setup();
        assert_eq!(session.view_mode(), ViewMode::Unified);
        update(&mut session, &scheduler, Message::ToggleViewMode).expect("update");
        assert_eq!(session.view_mode(), ViewMode::Split);
        assert_eq!(session.total_rows(), 1);
    }

    #[test]
    fn test_out_of_range_hunk_leaves_session() {
        let (mut session, scheduler) = setup();
        let rows = session.total_rows();
        let result = update(&mut session, &scheduler, Message::RejectHunk(3));
        assert!(matches!(result, Err(MutationError::HunkOutOfRange { .. })));
        assert_eq!(session.total_rows(), rows);
    }

    #[test]
    fn test_load_then_frame_applies_highlights() {
        let (mut session, scheduler) = setup();
        update(
            &mut session,
            &scheduler,
            Message::Load(RenderTarget::File {
                name: "b.rs".into(),
                contents: "fn main() {}\n".into(),
            }),
        )
        .expect("update");
        assert_eq!(session.pending_requests(), 1);
        update(&mut session, &scheduler, Message::Frame).expect("update");
        assert_eq!(session.pending_requests(), 0);
        assert_eq!(session.staged_batches(), 0);
    }
}
