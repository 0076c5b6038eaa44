//! Worker threads. Each owns its tokenizer for its whole life; all
//! communication is via channels: [`WorkerRequest`] in, [`WorkerReply`] out.
//! Open streams keep their incremental tokenizers on the worker too and are
//! answered on per-request channels.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::error::TokenizeError;
use crate::syntax::{IncrementalTokenizer, ResourceKey, Token, TokenEvent, TokenizerFactory};

pub(super) enum WorkerRequest {
    /// Load a resource pair into the worker's cache.
    Warm(ResourceKey),
    Tokenize {
        request_id: u64,
        text: String,
        key: ResourceKey,
    },
    /// Answered directly to the stream's owner, not the dispatcher.
    Stream(StreamRequest),
    Shutdown,
}

pub(super) type EventsReply = Sender<Result<Vec<TokenEvent>, TokenizeError>>;

pub(super) enum StreamRequest {
    /// Create the stream's tokenizer and feed it `replay`.
    Open {
        stream_id: u64,
        key: ResourceKey,
        replay: String,
        reply: Sender<Result<(), TokenizeError>>,
    },
    Feed {
        stream_id: u64,
        chunk: String,
        reply: EventsReply,
    },
    Finish {
        stream_id: u64,
        reply: EventsReply,
    },
    Close {
        stream_id: u64,
    },
}

pub(super) enum WorkerReply {
    Warmed {
        worker: usize,
        key: ResourceKey,
        result: Result<(), TokenizeError>,
    },
    Tokens {
        worker: usize,
        request_id: u64,
        tokens: Vec<Vec<Token>>,
    },
    Error {
        worker: usize,
        request_id: u64,
        error: TokenizeError,
    },
    /// The worker panicked and has exited.
    Crashed { worker: usize },
}

/// Spawn worker `id`. The tokenizer is created on the worker thread.
pub(super) fn spawn_worker(
    id: usize,
    factory: Arc<dyn TokenizerFactory>,
    replies: Sender<WorkerReply>,
) -> std::io::Result<(Sender<WorkerRequest>, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = thread::Builder::new()
        .name(format!("patchview-worker-{id}"))
        .spawn(move || worker_loop(id, factory.as_ref(), &rx, &replies))?;
    Ok((tx, handle))
}

/// Serve requests until the request channel closes or the tokenizer panics.
fn worker_loop(
    id: usize,
    factory: &dyn TokenizerFactory,
    requests: &Receiver<WorkerRequest>,
    replies: &Sender<WorkerReply>,
) {
    let Ok(mut tokenizer) = catch_unwind(AssertUnwindSafe(|| factory.create())) else {
        error!(worker = id, "tokenizer construction panicked");
        let _ = replies.send(WorkerReply::Crashed { worker: id });
        return;
    };
    debug!(worker = id, "worker ready");
    let mut streams = HashMap::new();

    for request in requests {
        let reply = match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Stream(request) => {
                if serve_stream(factory, &mut streams, request) {
                    continue;
                }
                error!(worker = id, "stream tokenizer panicked");
                let _ = replies.send(WorkerReply::Crashed { worker: id });
                return;
            }
            WorkerRequest::Warm(key) => {
                match catch_unwind(AssertUnwindSafe(|| tokenizer.load(&key))) {
                    Ok(result) => WorkerReply::Warmed {
                        worker: id,
                        key,
                        result,
                    },
                    Err(_) => {
                        error!(worker = id, language = %key.language, "tokenizer panicked while loading");
                        let _ = replies.send(WorkerReply::Crashed { worker: id });
                        return;
                    }
                }
            }
            WorkerRequest::Tokenize {
                request_id,
                text,
                key,
            } => match catch_unwind(AssertUnwindSafe(|| tokenizer.tokenize(&text, &key))) {
                Ok(Ok(tokens)) => WorkerReply::Tokens {
                    worker: id,
                    request_id,
                    tokens,
                },
                Ok(Err(error)) => WorkerReply::Error {
                    worker: id,
                    request_id,
                    error,
                },
                Err(_) => {
                    error!(worker = id, request_id, "tokenizer panicked");
                    let _ = replies.send(WorkerReply::Crashed { worker: id });
                    return;
                }
            },
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    debug!(worker = id, "worker exiting");
}

/// Serve one stream request. `false` if the stream's tokenizer panicked.
fn serve_stream(
    factory: &dyn TokenizerFactory,
    streams: &mut HashMap<u64, Box<dyn IncrementalTokenizer>>,
    request: StreamRequest,
) -> bool {
    match request {
        StreamRequest::Open {
            stream_id,
            key,
            replay,
            reply,
        } => {
            let Ok(opened) = catch_unwind(AssertUnwindSafe(|| {
                start_stream(factory, &key, &replay)
            })) else {
                return false;
            };
            let _ = reply.send(opened.map(|tokenizer| {
                streams.insert(stream_id, tokenizer);
            }));
        }
        StreamRequest::Feed {
            stream_id,
            chunk,
            reply,
        } => return step(streams, stream_id, &reply, |t| t.feed(&chunk)),
        StreamRequest::Finish { stream_id, reply } => {
            return step(streams, stream_id, &reply, |t| t.finish());
        }
        StreamRequest::Close { stream_id } => {
            streams.remove(&stream_id);
        }
    }
    true
}

/// A stream tokenizer that has already consumed `replay`.
fn start_stream(
    factory: &dyn TokenizerFactory,
    key: &ResourceKey,
    replay: &str,
) -> Result<Box<dyn IncrementalTokenizer>, TokenizeError> {
    let mut tokenizer = factory.create_stream(key)?;
    if !replay.is_empty() {
        // Replayed events were delivered by the worker that was lost.
        tokenizer.feed(replay)?;
    }
    Ok(tokenizer)
}

fn step<F>(
    streams: &mut HashMap<u64, Box<dyn IncrementalTokenizer>>,
    stream_id: u64,
    reply: &EventsReply,
    op: F,
) -> bool
where
    F: FnOnce(&mut dyn IncrementalTokenizer) -> Result<Vec<TokenEvent>, TokenizeError>,
{
    let Some(tokenizer) = streams.get_mut(&stream_id) else {
        let _ = reply.send(Err(TokenizeError::Failed(format!(
            "stream {stream_id} is not open"
        ))));
        return true;
    };
    match catch_unwind(AssertUnwindSafe(|| op(tokenizer.as_mut()))) {
        Ok(result) => {
            let _ = reply.send(result);
            true
        }
        Err(_) => false,
    }
}
