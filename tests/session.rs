use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use patchview::config::{ColorScheme, PatchviewConfig, SchedulerConfig};
use patchview::diff::diff_files;
use patchview::error::TokenizeError;
use patchview::message::Message;
use patchview::scheduler::TaskScheduler;
use patchview::session::{RenderTarget, Session, SessionLayout};
use patchview::syntax::{ResourceKey, Token, TokenStyle, Tokenizer, TokenizerFactory};
use patchview::update;

/// Echoes lines as tokens. Text starting with `old` waits for the gate.
struct Gated {
    gate: Receiver<()>,
}

impl Tokenizer for Gated {
    fn load(&mut self, _key: &ResourceKey) -> Result<(), TokenizeError> {
        Ok(())
    }

    fn is_loaded(&self, _key: &ResourceKey) -> bool {
        true
    }

    fn tokenize(&mut self, text: &str, _key: &ResourceKey) -> Result<Vec<Vec<Token>>, TokenizeError> {
        if text.starts_with("old") {
            // Blocks until the sender is dropped.
            let _ = self.gate.recv();
        }
        Ok(text
            .lines()
            .map(|line| vec![Token::new(line, TokenStyle::default())])
            .collect())
    }
}

#[test]
fn load_discards_results_still_in_flight() {
    let (release, gate) = crossbeam_channel::unbounded::<()>();
    let factory = move || -> Box<dyn Tokenizer> {
        Box::new(Gated { gate: gate.clone() })
    };
    let factory: Arc<dyn TokenizerFactory> = Arc::new(factory);
    let scheduler = TaskScheduler::new(
        factory,
        &SchedulerConfig {
            pool_size: 1,
            preload: Vec::new(),
        },
    );

    let mut session = Session::new(
        RenderTarget::Patch(diff_files("old.txt", "old a\n", "old b\n")),
        &PatchviewConfig::default(),
        ColorScheme::Dark,
    );
    update(&mut session, &scheduler, Message::Rehighlight).expect("rehighlight");
    assert_eq!(session.poll(), 0);
    assert_eq!(session.pending_requests(), 2);

    let generation = session.generation();
    update(
        &mut session,
        &scheduler,
        Message::Load(RenderTarget::File {
            name: "new.txt".into(),
            contents: "new one\nnew two\n".into(),
        }),
    )
    .expect("load");
    assert_eq!(session.generation(), generation + 1);
    assert_eq!(session.pending_requests(), 1);
    assert_eq!(session.staged_batches(), 0);

    // Let the detached requests finish ahead of the new one.
    drop(release);

    let deadline = Instant::now() + Duration::from_secs(10);
    while session.pending_requests() > 0 {
        assert!(Instant::now() < deadline, "highlight never arrived");
        update(&mut session, &scheduler, Message::Frame).expect("frame");
        thread::sleep(Duration::from_millis(5));
    }
    update(&mut session, &scheduler, Message::Frame).expect("frame");
    assert_eq!(session.staged_batches(), 0);

    let SessionLayout::File(layout) = session.layout() else {
        panic!("file target has a file layout");
    };
    assert_eq!(layout.name, "new.txt");
    let shown: Vec<Vec<&str>> = layout
        .rows
        .iter()
        .map(|row| row.tokens.iter().map(|t| t.text.as_str()).collect())
        .collect();
    assert_eq!(shown, [vec!["new one"], vec!["new two"]]);
}
