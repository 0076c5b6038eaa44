use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use patchview::config::SchedulerConfig;
use patchview::error::{StreamError, TokenizeError};
use patchview::scheduler::{ManagerState, TaskScheduler};
use patchview::stream::{ChunkSource, ScrollPosition, StreamRenderer, StreamState};
use patchview::syntax::{
    DEFAULT_THEME, IncrementalTokenizer, ResourceKey, SyntectFactory, SyntectStream, Token,
    TokenEvent, TokenStyle, Tokenizer, TokenizerFactory,
};

const SOURCE: &str = "fn main() {\n    let greeting = \"hi\";\n    println!(\"{greeting}\");\n}\n";

/// Plays back one prepared event batch per chunk.
struct Script(VecDeque<Vec<TokenEvent>>);

impl IncrementalTokenizer for Script {
    fn feed(&mut self, _chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError> {
        Ok(self.0.pop_front().unwrap_or_default())
    }

    fn finish(&mut self) -> Result<Vec<TokenEvent>, TokenizeError> {
        Ok(Vec::new())
    }
}

fn tok(text: &str) -> TokenEvent {
    TokenEvent::Token(Token::new(text, TokenStyle::default()))
}

fn texts(tokens: &[Token]) -> Vec<&str> {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

#[test]
fn recall_replaces_the_tail_of_the_open_line() {
    let mut renderer = StreamRenderer::new(Script(VecDeque::from([
        vec![tok("A"), tok("B"), tok("C")],
        vec![TokenEvent::Recall(2)],
        vec![tok("D")],
    ])));
    let mut source = ChunkSource::new(["one", "two", "three"].into_iter());

    assert_eq!(renderer.pump(&mut source, 8).expect("pump"), 5);
    let outcome = renderer.flush(ScrollPosition::default()).expect("flush");
    assert_eq!(outcome.applied, 5);
    assert_eq!(outcome.committed, 0);
    assert_eq!(texts(renderer.current_line()), ["A", "D"]);
    assert_eq!(renderer.state(), StreamState::Closed);
}

#[test]
fn nothing_is_visible_before_flush() {
    let mut renderer = StreamRenderer::new(Script(VecDeque::from([vec![
        tok("x"),
        TokenEvent::Token(Token::newline()),
        tok("y"),
    ]])));
    let mut source = ChunkSource::new(std::iter::once("x\ny"));

    renderer.pump(&mut source, 1).expect("pump");
    assert_eq!(renderer.state(), StreamState::Draining);
    assert!(renderer.lines().is_empty());
    assert!(renderer.current_line().is_empty());

    let outcome = renderer.flush(ScrollPosition::default()).expect("flush");
    assert_eq!(outcome.committed, 1);
    assert_eq!(renderer.total_lines(), 2);
}

#[test]
fn follow_reflects_the_viewport_before_the_batch() {
    let events = |n: usize| -> Vec<TokenEvent> {
        (0..n)
            .flat_map(|_| [tok("l"), TokenEvent::Token(Token::newline())])
            .collect()
    };
    let mut renderer = StreamRenderer::new(Script(VecDeque::from([events(10), events(1)])));
    let mut source = ChunkSource::new(["a", "b"].into_iter());

    renderer.pump(&mut source, 1).expect("pump");
    renderer.flush(ScrollPosition::default()).expect("flush");
    assert_eq!(renderer.total_lines(), 10);

    renderer.pump(&mut source, 1).expect("pump");
    let scrolled_up = ScrollPosition {
        offset: 0,
        viewport: 5,
    };
    assert!(!renderer.flush(scrolled_up).expect("flush").follow);

    renderer.pump(&mut source, 1).expect("pump");
    let at_end = ScrollPosition {
        offset: 6,
        viewport: 5,
    };
    assert!(renderer.flush(at_end).expect("flush").follow);
    assert_eq!(renderer.pump(&mut source, 1), Err(StreamError::Closed));
}

fn rust() -> ResourceKey {
    ResourceKey::new("rs", DEFAULT_THEME)
}

fn whole_text_tokens() -> Vec<Vec<Token>> {
    SyntectFactory::new()
        .tokenizer()
        .tokenize(SOURCE, &rust())
        .expect("tokenize")
}

/// Stream `SOURCE` in 7-byte chunks and return the committed lines.
fn render_in_chunks<T: IncrementalTokenizer>(tokenizer: T) -> Vec<Vec<Token>> {
    let mut renderer = StreamRenderer::new(tokenizer);
    let chunks: Vec<String> = SOURCE
        .as_bytes()
        .chunks(7)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    let mut source = ChunkSource::new(chunks.into_iter());

    while renderer.state() != StreamState::Closed {
        renderer.pump(&mut source, 2).expect("pump");
        renderer.flush(ScrollPosition::default()).expect("flush");
    }
    assert!(renderer.current_line().is_empty());
    renderer.lines().to_vec()
}

#[test]
fn syntect_stream_matches_whole_text_tokenization() {
    let stream = SyntectFactory::new().stream(&rust()).expect("stream");
    assert_eq!(render_in_chunks(stream), whole_text_tokens());
}

#[test]
fn scheduled_stream_runs_on_a_worker() {
    let factory: Arc<dyn TokenizerFactory> = Arc::new(SyntectFactory::new());
    let config = SchedulerConfig {
        pool_size: 1,
        preload: Vec::new(),
    };
    let scheduler = TaskScheduler::new(factory, &config);

    let stream = scheduler.open_stream(rust()).expect("open");
    assert!(stream.on_worker());
    assert_eq!(scheduler.state(), ManagerState::Initialized);
    assert_eq!(render_in_chunks(stream), whole_text_tokens());
}

#[test]
fn scheduled_stream_without_workers_runs_inline() {
    let factory: Arc<dyn TokenizerFactory> = Arc::new(SyntectFactory::new());
    let config = SchedulerConfig {
        pool_size: 0,
        preload: Vec::new(),
    };
    let scheduler = TaskScheduler::new(factory, &config);

    let stream = scheduler.open_stream(rust()).expect("open");
    assert!(!stream.on_worker());
    assert_eq!(render_in_chunks(stream), whole_text_tokens());

    let unknown = scheduler.open_stream(ResourceKey::new("no-such-language", DEFAULT_THEME));
    assert!(unknown.is_err());
}

/// Panics on its third chunk.
struct Brittle {
    inner: SyntectStream,
    feeds: usize,
}

impl IncrementalTokenizer for Brittle {
    fn feed(&mut self, chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError> {
        self.feeds += 1;
        assert!(self.feeds < 3, "stream tokenizer crashed");
        self.inner.feed(chunk)
    }

    fn finish(&mut self) -> Result<Vec<TokenEvent>, TokenizeError> {
        self.inner.finish()
    }
}

/// The first stream it opens is [`Brittle`].
struct FirstStreamBreaks {
    inner: SyntectFactory,
    opened: AtomicUsize,
}

impl TokenizerFactory for FirstStreamBreaks {
    fn create(&self) -> Box<dyn Tokenizer> {
        self.inner.create()
    }

    fn create_stream(
        &self,
        key: &ResourceKey,
    ) -> Result<Box<dyn IncrementalTokenizer>, TokenizeError> {
        let inner = self.inner.stream(key)?;
        if self.opened.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Box::new(Brittle { inner, feeds: 0 }))
        } else {
            Ok(Box::new(inner))
        }
    }
}

#[test]
fn stream_replays_onto_another_worker_after_a_crash() {
    let factory = Arc::new(FirstStreamBreaks {
        inner: SyntectFactory::new(),
        opened: AtomicUsize::new(0),
    });
    let shared: Arc<dyn TokenizerFactory> = factory.clone();
    let config = SchedulerConfig {
        pool_size: 2,
        preload: Vec::new(),
    };
    let scheduler = TaskScheduler::new(shared, &config);

    let stream = scheduler.open_stream(rust()).expect("open");
    assert!(stream.on_worker());
    assert_eq!(render_in_chunks(stream), whole_text_tokens());

    assert!(factory.opened.load(Ordering::SeqCst) >= 2);
    assert_eq!(scheduler.state(), ManagerState::Initialized);
}

#[test]
fn reset_starts_over() {
    let mut renderer = StreamRenderer::new(Script(VecDeque::from([vec![tok("a")]])));
    let mut source = ChunkSource::new(std::iter::once("a"));
    renderer.pump(&mut source, 1).expect("pump");

    renderer.reset(Script(VecDeque::new()));
    assert_eq!(renderer.state(), StreamState::Idle);
    assert!(!renderer.has_pending());
    assert_eq!(renderer.total_lines(), 0);
}
