//! Incremental tokenization pinned to one worker.
//!
//! A stream's tokenizer state lives on the worker that opened it. If that
//! worker is lost the stream reopens on another one and replays the text fed
//! so far; once no worker is left it continues on the calling thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::{Sender, bounded};
use tracing::{debug, error, warn};

use super::worker::{StreamRequest, WorkerRequest};
use super::{Command, Shared};
use crate::error::TokenizeError;
use crate::syntax::{IncrementalTokenizer, ResourceKey, TokenEvent};

/// Worker losses tolerated before a stream moves to the calling thread.
const MAX_REOPENS: usize = 3;

type Events = Result<Vec<TokenEvent>, TokenizeError>;

enum Link {
    Worker(Sender<WorkerRequest>),
    Local(Box<dyn IncrementalTokenizer>),
}

#[derive(Clone, Copy)]
enum Step<'a> {
    Feed(&'a str),
    Finish,
}

impl Step<'_> {
    fn apply(self, tokenizer: &mut dyn IncrementalTokenizer) -> Events {
        match self {
            Self::Feed(chunk) => tokenizer.feed(chunk),
            Self::Finish => tokenizer.finish(),
        }
    }
}

/// Where a stream can be (re)opened.
struct Endpoint {
    id: u64,
    key: ResourceKey,
    shared: Arc<Shared>,
    /// `None` when the scheduler runs synchronously.
    commands: Option<Sender<Command>>,
}

impl Endpoint {
    /// A fresh link that has already consumed `history`.
    fn connect(&self, history: &str, via_pool: bool) -> Result<Link, TokenizeError> {
        if via_pool {
            if let Some(worker) = self.request_worker() {
                match self.open_on(&worker, history) {
                    Some(Ok(())) => return Ok(Link::Worker(worker)),
                    Some(Err(err)) => return Err(err),
                    None => debug!(stream = self.id, "worker lost while opening stream"),
                }
            }
        }

        debug!(stream = self.id, language = %self.key.language, "stream on calling thread");
        let started = catch_unwind(AssertUnwindSafe(|| -> Result<_, TokenizeError> {
            let mut tokenizer = self.shared.factory.create_stream(&self.key)?;
            if !history.is_empty() {
                tokenizer.feed(history)?;
            }
            Ok(tokenizer)
        }));
        match started {
            Ok(result) => result.map(Link::Local),
            Err(_) => {
                error!(stream = self.id, "stream tokenizer panicked");
                Err(TokenizeError::Failed("tokenizer panicked".into()))
            }
        }
    }

    fn request_worker(&self) -> Option<Sender<WorkerRequest>> {
        let commands = self.commands.as_ref()?;
        let (reply, rx) = bounded(1);
        commands.send(Command::OpenStream { reply }).ok()?;
        rx.recv().ok().flatten()
    }

    /// `None` if the worker went away before answering.
    fn open_on(
        &self,
        worker: &Sender<WorkerRequest>,
        history: &str,
    ) -> Option<Result<(), TokenizeError>> {
        let (reply, rx) = bounded(1);
        let request = StreamRequest::Open {
            stream_id: self.id,
            key: self.key.clone(),
            replay: history.to_string(),
            reply,
        };
        worker.send(WorkerRequest::Stream(request)).ok()?;
        rx.recv().ok()
    }
}

/// `None` if the worker went away before answering.
fn exchange(worker: &Sender<WorkerRequest>, stream_id: u64, step: Step<'_>) -> Option<Events> {
    let (reply, rx) = bounded(1);
    let request = match step {
        Step::Feed(chunk) => StreamRequest::Feed {
            stream_id,
            chunk: chunk.to_string(),
            reply,
        },
        Step::Finish => StreamRequest::Finish { stream_id, reply },
    };
    worker.send(WorkerRequest::Stream(request)).ok()?;
    rx.recv().ok()
}

/// An [`IncrementalTokenizer`] served by a
/// [`TaskScheduler`](super::TaskScheduler) worker.
///
/// Each call blocks until the worker answers. Feed it to a
/// [`StreamRenderer`](crate::stream::StreamRenderer) like any other
/// incremental tokenizer.
pub struct ScheduledStream {
    endpoint: Endpoint,
    link: Link,
    /// Text fed so far, replayed if the worker is lost.
    history: String,
}

impl ScheduledStream {
    pub(super) fn open(
        id: u64,
        key: ResourceKey,
        shared: Arc<Shared>,
        commands: Option<Sender<Command>>,
    ) -> Result<Self, TokenizeError> {
        let endpoint = Endpoint {
            id,
            key,
            shared,
            commands,
        };
        let link = endpoint.connect("", true)?;
        Ok(Self {
            endpoint,
            link,
            history: String::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.endpoint.id
    }

    /// Whether the stream currently lives on a worker thread.
    #[must_use]
    pub fn on_worker(&self) -> bool {
        matches!(self.link, Link::Worker(_))
    }

    fn run(&mut self, step: Step<'_>) -> Events {
        let mut lost = 0;
        loop {
            match &mut self.link {
                Link::Local(tokenizer) => return step.apply(tokenizer.as_mut()),
                Link::Worker(worker) => {
                    if let Some(events) = exchange(worker, self.endpoint.id, step) {
                        return events;
                    }
                    lost += 1;
                    warn!(stream = self.endpoint.id, lost, "stream worker lost; replaying");
                    self.link = self.endpoint.connect(&self.history, lost < MAX_REOPENS)?;
                }
            }
        }
    }
}

impl IncrementalTokenizer for ScheduledStream {
    fn feed(&mut self, chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError> {
        let events = self.run(Step::Feed(chunk))?;
        self.history.push_str(chunk);
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<TokenEvent>, TokenizeError> {
        self.run(Step::Finish)
    }
}

impl Drop for ScheduledStream {
    fn drop(&mut self) {
        if let Link::Worker(worker) = &self.link {
            let _ = worker.send(WorkerRequest::Stream(StreamRequest::Close {
                stream_id: self.endpoint.id,
            }));
        }
    }
}
