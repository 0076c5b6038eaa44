//! Live token rendering for appendable text
//!
//! ```text
//! idle → consuming → draining → consuming | closed
//! ```
//!
//! [`StreamRenderer::pump`] pulls chunks and queues tokenizer events.
//! [`StreamRenderer::flush`] applies everything queued in one pass, so a
//! reader never observes a half-applied batch.
//!
//! Drive it with [`TaskScheduler::open_stream`](crate::scheduler::TaskScheduler::open_stream)
//! to keep tokenization off the calling thread.

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::syntax::{IncrementalTokenizer, Token, TokenEvent};

/// Result of pulling from a [`TextSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    Chunk(String),
    /// Nothing available yet.
    Pending,
    /// No more text will arrive.
    Closed,
}

/// A pull-based text producer.
pub trait TextSource {
    fn pull(&mut self) -> Pull;
}

/// Adapts an iterator of chunks; exhaustion closes the source.
pub struct ChunkSource<I> {
    chunks: I,
}

impl<I> ChunkSource<I> {
    pub const fn new(chunks: I) -> Self {
        Self { chunks }
    }
}

impl<I, S> TextSource for ChunkSource<I>
where
    I: Iterator<Item = S>,
    S: Into<String>,
{
    fn pull(&mut self) -> Pull {
        self.chunks.next().map_or(Pull::Closed, |chunk| Pull::Chunk(chunk.into()))
    }
}

impl TextSource for Receiver<String> {
    fn pull(&mut self) -> Pull {
        match self.try_recv() {
            Ok(chunk) => Pull::Chunk(chunk),
            Err(TryRecvError::Empty) => Pull::Pending,
            Err(TryRecvError::Disconnected) => Pull::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Consuming,
    /// A batch is queued and waiting for [`StreamRenderer::flush`].
    Draining,
    Closed,
}

/// Viewport position at flush time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollPosition {
    /// First visible line.
    pub offset: usize,
    /// Visible line count.
    pub viewport: usize,
}

impl ScrollPosition {
    #[must_use]
    pub const fn is_at_end(&self, total_lines: usize) -> bool {
        self.offset + self.viewport >= total_lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Events applied in this pass.
    pub applied: usize,
    /// Lines committed in this pass.
    pub committed: usize,
    /// The view was at the end before the batch; keep following.
    pub follow: bool,
}

/// Drives an [`IncrementalTokenizer`] over a [`TextSource`] and keeps the
/// rendered lines.
pub struct StreamRenderer<T> {
    tokenizer: T,
    state: StreamState,
    lines: Vec<Vec<Token>>,
    /// Tokens of the line still being written.
    current: Vec<Token>,
    queued: Vec<TokenEvent>,
    source_closed: bool,
}

impl<T: IncrementalTokenizer> StreamRenderer<T> {
    pub const fn new(tokenizer: T) -> Self {
        Self {
            tokenizer,
            state: StreamState::Idle,
            lines: Vec::new(),
            current: Vec::new(),
            queued: Vec::new(),
            source_closed: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Committed lines.
    #[must_use]
    pub fn lines(&self) -> &[Vec<Token>] {
        &self.lines
    }

    /// The open line buffer.
    #[must_use]
    pub fn current_line(&self) -> &[Token] {
        &self.current
    }

    /// Displayed line count, the open line included when non-empty.
    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.lines.len() + usize::from(!self.current.is_empty())
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Pull up to `max_chunks` chunks and queue the tokenizer's events.
    ///
    /// Returns the number of events queued by this call.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the stream has closed, or the
    /// tokenizer's failure.
    pub fn pump<S: TextSource + ?Sized>(
        &mut self,
        source: &mut S,
        max_chunks: usize,
    ) -> Result<usize, StreamError> {
        if self.state == StreamState::Closed || self.source_closed {
            return Err(StreamError::Closed);
        }
        let before = self.queued.len();
        for _ in 0..max_chunks {
            match source.pull() {
                Pull::Chunk(chunk) => {
                    self.transition(StreamState::Consuming);
                    let events = self.tokenizer.feed(&chunk)?;
                    self.queued.extend(events);
                }
                Pull::Pending => break,
                Pull::Closed => {
                    let events = self.tokenizer.finish()?;
                    self.queued.extend(events);
                    self.source_closed = true;
                    break;
                }
            }
        }

        let queued = self.queued.len() - before;
        if self.has_pending() {
            self.transition(StreamState::Draining);
        } else if self.source_closed {
            self.transition(StreamState::Closed);
        }
        Ok(queued)
    }

    /// Apply the queued batch atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::RecallOverflow`] if a recall reaches past the
    /// start of the open line. Nothing from the batch is applied, the batch
    /// is discarded and the stream closes; rendered lines stay readable and
    /// [`StreamRenderer::reset`] starts over.
    pub fn flush(&mut self, scroll: ScrollPosition) -> Result<FlushOutcome, StreamError> {
        let follow = scroll.is_at_end(self.total_lines());
        let mut current = self.current.clone();
        let mut committed = Vec::new();

        for event in &self.queued {
            match event {
                TokenEvent::Token(token) if token.is_newline() => {
                    committed.push(std::mem::take(&mut current));
                }
                TokenEvent::Token(token) => current.push(token.clone()),
                TokenEvent::Recall(count) => {
                    if *count > current.len() {
                        let err = StreamError::RecallOverflow {
                            requested: *count,
                            buffered: current.len(),
                        };
                        warn!(error = %err, dropped = self.queued.len(), "closing stream");
                        self.queued.clear();
                        self.source_closed = true;
                        self.transition(StreamState::Closed);
                        return Err(err);
                    }
                    current.truncate(current.len() - count);
                }
            }
        }

        let outcome = FlushOutcome {
            applied: self.queued.len(),
            committed: committed.len(),
            follow,
        };
        self.lines.extend(committed);
        self.current = current;
        self.queued.clear();

        self.transition(if self.source_closed {
            StreamState::Closed
        } else {
            StreamState::Consuming
        });
        Ok(outcome)
    }

    /// Drop rendered lines and any unapplied batch, and start over with a
    /// fresh tokenizer.
    pub fn reset(&mut self, tokenizer: T) {
        debug!(dropped = self.queued.len(), "stream reset");
        self.tokenizer = tokenizer;
        self.lines.clear();
        self.current.clear();
        self.queued.clear();
        self.source_closed = false;
        self.state = StreamState::Idle;
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "stream state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::TokenizeError;
    use crate::syntax::TokenStyle;

    /// One scripted event batch per `feed`.
    struct Scripted(VecDeque<Vec<TokenEvent>>);

    impl IncrementalTokenizer for Scripted {
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

    #[test]
    fn test_overflow_closes_without_applying() {
        let mut renderer = StreamRenderer::new(Scripted(VecDeque::from([
            vec![tok("a"), tok("\n"), tok("b")],
            vec![TokenEvent::Recall(2)],
        ])));
        let mut source = ChunkSource::new(["x", "y"].into_iter());

        renderer.pump(&mut source, 1).expect("pump");
        renderer.flush(ScrollPosition::default()).expect("flush");
        assert_eq!(renderer.lines().len(), 1);

        renderer.pump(&mut source, 1).expect("pump");
        assert_eq!(
            renderer.flush(ScrollPosition::default()),
            Err(StreamError::RecallOverflow {
                requested: 2,
                buffered: 1
            })
        );
        assert_eq!(renderer.lines().len(), 1);
        assert_eq!(renderer.current_line().len(), 1);
        assert!(!renderer.has_pending());
        assert_eq!(renderer.state(), StreamState::Closed);
        assert_eq!(renderer.pump(&mut source, 1), Err(StreamError::Closed));

        renderer.reset(Scripted(VecDeque::from([vec![tok("c")]])));
        assert_eq!(renderer.state(), StreamState::Idle);
        assert!(renderer.lines().is_empty());
        renderer.pump(&mut source, 1).expect("pump after reset");
    }

    #[test]
    fn test_state_machine() {
        let mut renderer = StreamRenderer::new(Scripted(VecDeque::from([vec![tok("a")]])));
        assert_eq!(renderer.state(), StreamState::Idle);

        let mut source = ChunkSource::new(std::iter::once("a"));
        renderer.pump(&mut source, 1).expect("pump");
        assert_eq!(renderer.state(), StreamState::Draining);
        renderer.flush(ScrollPosition::default()).expect("flush");
        assert_eq!(renderer.state(), StreamState::Consuming);

        renderer.pump(&mut source, 1).expect("pump");
        assert_eq!(renderer.state(), StreamState::Closed);
        assert_eq!(renderer.pump(&mut source, 1), Err(StreamError::Closed));
    }

    #[test]
    fn test_channel_source() {
        let (tx, mut rx) = crossbeam_channel::unbounded::<String>();
        assert_eq!(rx.pull(), Pull::Pending);
        tx.send("chunk".into()).expect("send");
        assert_eq!(rx.pull(), Pull::Chunk("chunk".into()));
        drop(tx);
        assert_eq!(rx.pull(), Pull::Closed);
    }
}
