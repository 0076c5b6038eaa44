//! Tokenization task pool
//!
//! A dispatcher thread owns the queue and the worker slots. Callers talk to
//! it through a command channel and get a [`TaskTicket`] back; workers talk
//! to it through a reply channel. No lock is held across a worker boundary.
//!
//! Pool size zero, or the loss of every worker, degrades to synchronous
//! execution on the calling thread with a fallback tokenizer.
//!
//! Incremental streams are pinned to a worker; see [`ScheduledStream`].

mod stats;
mod stream;
mod worker;

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, select, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

pub use stats::{ManagerState, WorkerTaskStats};
pub use stream::ScheduledStream;

use self::stats::StatsHub;
use self::worker::{WorkerReply, WorkerRequest, spawn_worker};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, TokenizeError};
use crate::syntax::{ResourceKey, Token, Tokenizer, TokenizerFactory};

/// Lines of tokens, or why there are none.
pub type TaskResult = Result<Vec<Vec<Token>>, SchedulerError>;

/// Handle to one submitted request. Dropping it detaches the request: the
/// worker still runs it and the reply is discarded.
#[derive(Debug)]
pub struct TaskTicket {
    id: u64,
    rx: Receiver<TaskResult>,
}

impl TaskTicket {
    fn ready(id: u64, result: TaskResult) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { id, rx }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Block until the result arrives.
    ///
    /// # Errors
    ///
    /// Returns the tokenizer's failure, or [`SchedulerError::Disposed`] if
    /// the scheduler went away first.
    pub fn wait(self) -> TaskResult {
        self.rx.recv().unwrap_or(Err(SchedulerError::Disposed))
    }

    /// Block for at most `timeout`; `None` if still running.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(SchedulerError::Disposed)),
        }
    }

    /// Non-blocking poll; `None` if still running.
    #[must_use]
    pub fn try_take(&self) -> Option<TaskResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SchedulerError::Disposed)),
        }
    }
}

struct Job {
    id: u64,
    text: String,
    key: ResourceKey,
    reply: Sender<TaskResult>,
}

enum Command {
    Submit(Job),
    /// Warm `keys` on every worker; signal `done` once all settled.
    Preload {
        keys: Vec<ResourceKey>,
        done: Sender<()>,
    },
    /// Pick a worker for a new stream; `None` when none is live.
    OpenStream {
        reply: Sender<Option<Sender<WorkerRequest>>>,
    },
    Shutdown,
}

#[derive(Default)]
struct Fallback {
    tokenizer: Option<Box<dyn Tokenizer>>,
    keys: HashSet<ResourceKey>,
}

struct Shared {
    factory: Arc<dyn TokenizerFactory>,
    stats: StatsHub,
    fallback: Mutex<Fallback>,
}

impl Shared {
    /// Tokenize on the calling thread.
    fn run_sync(&self, text: &str, key: &ResourceKey) -> TaskResult {
        let mut fallback = self.fallback.lock();
        let Fallback { tokenizer, keys } = &mut *fallback;
        let result = catch_unwind(AssertUnwindSafe(|| {
            tokenizer
                .get_or_insert_with(|| self.factory.create())
                .tokenize(text, key)
        }))
        .unwrap_or_else(|_| {
            error!(language = %key.language, "fallback tokenizer panicked");
            Err(TokenizeError::Failed("tokenizer panicked".into()))
        });
        if result.is_ok() {
            keys.insert(key.clone());
        }
        let cached = keys.len();
        drop(fallback);

        self.stats.update(|s| s.cached_resources = cached);
        result.map_err(SchedulerError::from)
    }

    fn warm_sync(&self, key: &ResourceKey) {
        let mut fallback = self.fallback.lock();
        let Fallback { tokenizer, keys } = &mut *fallback;
        let loaded = catch_unwind(AssertUnwindSafe(|| {
            tokenizer
                .get_or_insert_with(|| self.factory.create())
                .load(key)
        }));
        match loaded {
            Ok(Ok(())) => {
                keys.insert(key.clone());
            }
            Ok(Err(err)) => warn!(language = %key.language, %err, "preload failed"),
            Err(_) => error!(language = %key.language, "fallback tokenizer panicked"),
        }
        let cached = keys.len();
        drop(fallback);
        self.stats.update(|s| s.cached_resources = cached);
    }
}

struct Runtime {
    commands: Sender<Command>,
    dispatcher: JoinHandle<()>,
}

/// Runs tokenization requests on a bounded pool of worker threads.
pub struct TaskScheduler {
    pool_size: usize,
    preload: Vec<ResourceKey>,
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    #[must_use]
    pub fn new(factory: Arc<dyn TokenizerFactory>, config: &SchedulerConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            preload: config.preload.clone(),
            shared: Arc::new(Shared {
                factory,
                stats: StatsHub::default(),
                fallback: Mutex::new(Fallback::default()),
            }),
            runtime: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.shared.stats.snapshot().manager_state
    }

    #[must_use]
    pub fn stats(&self) -> WorkerTaskStats {
        self.shared.stats.snapshot()
    }

    /// Receive a snapshot every time the stats change.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<WorkerTaskStats> {
        self.shared.stats.subscribe()
    }

    /// Spawn workers and warm the preload keys on all of them. Blocks until
    /// warming settles. Calling it again is a no-op.
    pub fn initialize(&self) -> ManagerState {
        let done = {
            let mut runtime = self.runtime.lock();
            let state = self.state();
            if state != ManagerState::Uninitialized {
                return state;
            }
            self.shared
                .stats
                .update(|s| s.manager_state = ManagerState::Initializing);

            if self.pool_size == 0 {
                for key in &self.preload {
                    self.shared.warm_sync(key);
                }
                self.shared
                    .stats
                    .update(|s| s.manager_state = ManagerState::Initialized);
                debug!("scheduler running synchronously");
                return ManagerState::Initialized;
            }

            match self.start() {
                Some((started, done)) => {
                    *runtime = Some(started);
                    done
                }
                None => {
                    self.shared.stats.update(|s| {
                        s.total_workers = 0;
                        s.manager_state = ManagerState::Failed;
                    });
                    return ManagerState::Failed;
                }
            }
        };

        // The dispatcher marks the scheduler initialized before signalling.
        let _ = done.recv();
        self.state()
    }

    fn start(&self) -> Option<(Runtime, Receiver<()>)> {
        let (reply_tx, reply_rx) = unbounded();
        let workers: Vec<WorkerSlot> = (0..self.pool_size)
            .filter_map(|id| {
                match spawn_worker(id, Arc::clone(&self.shared.factory), reply_tx.clone()) {
                    Ok((tx, handle)) => Some(WorkerSlot {
                        id,
                        tx: Some(tx),
                        handle: Some(handle),
                        inflight: None,
                        served: 0,
                    }),
                    Err(err) => {
                        error!(worker = id, %err, "failed to spawn worker");
                        None
                    }
                }
            })
            .collect();
        if workers.is_empty() {
            return None;
        }
        let live = workers.len();
        self.shared.stats.update(|s| s.total_workers = live);

        let (commands, command_rx) = unbounded();
        let dispatcher = Dispatcher {
            shared: Arc::clone(&self.shared),
            workers,
            queue: VecDeque::new(),
            warm: HashSet::new(),
            warming: HashMap::new(),
            broken: HashMap::new(),
            waiters: Vec::new(),
            replies: reply_rx,
            reply_tx,
            commands: command_rx,
            failed: false,
        };
        let handle = thread::Builder::new()
            .name("patchview-dispatcher".into())
            .spawn(move || dispatcher.run());
        let dispatcher = match handle {
            Ok(handle) => handle,
            Err(err) => {
                error!(%err, "failed to spawn dispatcher");
                return None;
            }
        };

        let (done_tx, done_rx) = bounded(1);
        let _ = commands.send(Command::Preload {
            keys: self.preload.clone(),
            done: done_tx,
        });
        debug!(workers = live, "scheduler started");
        Some((
            Runtime {
                commands,
                dispatcher,
            },
            done_rx,
        ))
    }

    /// Queue `text` for tokenization. Initializes the scheduler on first use.
    pub fn submit(&self, text: impl Into<String>, key: ResourceKey) -> TaskTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = text.into();
        if self.state() == ManagerState::Uninitialized {
            self.initialize();
        }

        let commands = self.runtime.lock().as_ref().map(|r| r.commands.clone());
        let commands = match commands {
            Some(commands) if self.state() != ManagerState::Failed => commands,
            _ => return TaskTicket::ready(id, self.shared.run_sync(&text, &key)),
        };

        let (reply, rx) = bounded(1);
        let job = Job {
            id,
            text,
            key,
            reply,
        };
        match commands.send(Command::Submit(job)) {
            Ok(()) => TaskTicket { id, rx },
            Err(err) => match err.into_inner() {
                Command::Submit(job) => {
                    TaskTicket::ready(id, self.shared.run_sync(&job.text, &job.key))
                }
                _ => TaskTicket::ready(id, Err(SchedulerError::Disposed)),
            },
        }
    }

    /// Open an incremental tokenizer whose state lives on one worker.
    /// Initializes the scheduler on first use. Without live workers the
    /// stream runs on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Tokenize`] if the factory cannot stream
    /// `key`.
    pub fn open_stream(&self, key: ResourceKey) -> Result<ScheduledStream, SchedulerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.state() == ManagerState::Uninitialized {
            self.initialize();
        }
        let commands = self.runtime.lock().as_ref().map(|r| r.commands.clone());
        let stream = ScheduledStream::open(id, key, Arc::clone(&self.shared), commands)?;
        debug!(stream = id, on_worker = stream.on_worker(), "stream opened");
        Ok(stream)
    }

    /// Submit and wait.
    ///
    /// # Errors
    ///
    /// See [`TaskTicket::wait`].
    pub fn tokenize(&self, text: impl Into<String>, key: ResourceKey) -> TaskResult {
        self.submit(text, key).wait()
    }

    /// Stop all workers and drop every cached resource. Pending tickets
    /// resolve to [`SchedulerError::Disposed`]. The scheduler returns to
    /// [`ManagerState::Uninitialized`] and may be initialized again.
    pub fn dispose(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            let _ = runtime.commands.send(Command::Shutdown);
            if runtime.dispatcher.join().is_err() {
                error!("dispatcher panicked");
            }
        }
        *self.shared.fallback.lock() = Fallback::default();
        self.shared
            .stats
            .update(|s| *s = WorkerTaskStats::default());
        debug!("scheduler disposed");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct WorkerSlot {
    id: usize,
    /// `None` once the worker has failed.
    tx: Option<Sender<WorkerRequest>>,
    handle: Option<JoinHandle<()>>,
    inflight: Option<Job>,
    served: u64,
}

impl WorkerSlot {
    const fn is_alive(&self) -> bool {
        self.tx.is_some()
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    workers: Vec<WorkerSlot>,
    queue: VecDeque<Job>,
    /// Keys loaded on every live worker.
    warm: HashSet<ResourceKey>,
    /// Keys being loaded, with the workers yet to acknowledge.
    warming: HashMap<ResourceKey, HashSet<usize>>,
    /// Keys that failed to load.
    broken: HashMap<ResourceKey, TokenizeError>,
    waiters: Vec<(HashSet<ResourceKey>, Sender<()>)>,
    replies: Receiver<WorkerReply>,
    /// Keeps `replies` connected after every worker has exited.
    reply_tx: Sender<WorkerReply>,
    commands: Receiver<Command>,
    failed: bool,
}

impl Dispatcher {
    fn run(mut self) {
        let commands = self.commands.clone();
        let replies = self.replies.clone();
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Submit(job)) => self.enqueue(job),
                    Ok(Command::Preload { keys, done }) => self.preload(keys, done),
                    Ok(Command::OpenStream { reply }) => self.assign_stream(reply),
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                recv(replies) -> reply => {
                    if let Ok(reply) = reply {
                        self.on_reply(reply);
                    }
                }
            }
            self.dispatch();
            self.publish();
        }
        self.shutdown();
    }

    fn enqueue(&mut self, job: Job) {
        if self.failed {
            let result = self.shared.run_sync(&job.text, &job.key);
            let _ = job.reply.send(result);
            return;
        }
        if let Some(err) = self.broken.get(&job.key) {
            let _ = job.reply.send(Err(err.clone().into()));
            return;
        }
        if !self.warm.contains(&job.key) {
            self.start_warming(&job.key);
        }
        self.queue.push_back(job);
    }

    fn preload(&mut self, keys: Vec<ResourceKey>, done: Sender<()>) {
        let mut pending = HashSet::new();
        for key in keys {
            if self.warm.contains(&key) || self.broken.contains_key(&key) {
                continue;
            }
            self.start_warming(&key);
            pending.insert(key);
        }
        self.waiters.push((pending, done));
        self.settle_waiters(None);
    }

    /// Ask every live worker to load `key`.
    fn start_warming(&mut self, key: &ResourceKey) {
        if self.warming.contains_key(key) {
            return;
        }
        let mut pending = HashSet::new();
        let mut dead = Vec::new();
        for slot in self.workers.iter().filter(|w| w.is_alive()) {
            let sent = slot
                .tx
                .as_ref()
                .is_some_and(|tx| tx.send(WorkerRequest::Warm(key.clone())).is_ok());
            if sent {
                pending.insert(slot.id);
            } else {
                dead.push(slot.id);
            }
        }
        debug!(language = %key.language, theme = %key.theme, workers = pending.len(), "warming");
        self.warming.insert(key.clone(), pending);
        for id in dead {
            self.fail_worker(id);
        }
        self.complete_warming();
    }

    fn on_reply(&mut self, reply: WorkerReply) {
        match reply {
            WorkerReply::Warmed {
                worker,
                key,
                result: Ok(()),
            } => {
                if let Some(pending) = self.warming.get_mut(&key) {
                    pending.remove(&worker);
                }
                self.complete_warming();
            }
            WorkerReply::Warmed {
                key,
                result: Err(err),
                ..
            } => self.mark_broken(key, err),
            WorkerReply::Tokens {
                worker,
                request_id,
                tokens,
            } => {
                if let Some(job) = self.finish(worker, request_id) {
                    let _ = job.reply.send(Ok(tokens));
                }
            }
            WorkerReply::Error {
                worker,
                request_id,
                error,
            } => {
                if let Some(job) = self.finish(worker, request_id) {
                    let _ = job.reply.send(Err(error.into()));
                }
            }
            WorkerReply::Crashed { worker } => self.fail_worker(worker),
        }
    }

    /// Take the in-flight job `request_id` off `worker`.
    fn finish(&mut self, worker: usize, request_id: u64) -> Option<Job> {
        let slot = self.workers.iter_mut().find(|w| w.id == worker)?;
        if slot.inflight.as_ref().is_some_and(|job| job.id == request_id) {
            slot.served += 1;
            slot.inflight.take()
        } else {
            None
        }
    }

    /// Promote keys every live worker has acknowledged.
    fn complete_warming(&mut self) {
        let ready: Vec<ResourceKey> = self
            .warming
            .iter()
            .filter(|(_, pending)| pending.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            self.warming.remove(&key);
            debug!(language = %key.language, theme = %key.theme, "warm on all workers");
            self.warm.insert(key.clone());
            self.settle_waiters(Some(&key));
        }
    }

    fn mark_broken(&mut self, key: ResourceKey, err: TokenizeError) {
        warn!(language = %key.language, theme = %key.theme, %err, "resource failed to load");
        self.warming.remove(&key);
        let (rejected, kept): (Vec<Job>, Vec<Job>) =
            self.queue.drain(..).partition(|job| job.key == key);
        self.queue = kept.into();
        for job in rejected {
            let _ = job.reply.send(Err(err.clone().into()));
        }
        self.settle_waiters(Some(&key));
        self.broken.insert(key, err);
    }

    /// Drop `key` from preload waiters and signal those with nothing left.
    fn settle_waiters(&mut self, key: Option<&ResourceKey>) {
        let mut completed = Vec::new();
        self.waiters.retain_mut(|(pending, done)| {
            if let Some(key) = key {
                pending.remove(key);
            }
            if pending.is_empty() {
                completed.push(done.clone());
                false
            } else {
                true
            }
        });
        if completed.is_empty() {
            return;
        }
        self.shared.stats.update(|s| {
            if s.manager_state == ManagerState::Initializing {
                s.manager_state = ManagerState::Initialized;
            }
        });
        for done in completed {
            let _ = done.send(());
        }
    }

    /// Mark `worker` failed and requeue what it was running.
    fn fail_worker(&mut self, worker: usize) {
        let Some(slot) = self.workers.iter_mut().find(|w| w.id == worker) else {
            return;
        };
        if !slot.is_alive() {
            return;
        }
        slot.tx = None;
        let requeued = slot.inflight.take();
        error!(worker, retried = requeued.is_some(), "worker failed");
        if let Some(job) = requeued {
            self.queue.push_front(job);
        }

        for pending in self.warming.values_mut() {
            pending.remove(&worker);
        }

        if self.workers.iter().any(WorkerSlot::is_alive) {
            self.complete_warming();
            return;
        }

        error!("all workers failed; running synchronously");
        self.failed = true;
        self.shared.stats.update(|s| {
            s.total_workers = 0;
            s.busy_workers = 0;
            s.manager_state = ManagerState::Failed;
        });
        self.warming.clear();
        for job in std::mem::take(&mut self.queue) {
            let result = self.shared.run_sync(&job.text, &job.key);
            let _ = job.reply.send(result);
        }
        let waiters = std::mem::take(&mut self.waiters);
        for (_, done) in waiters {
            let _ = done.send(());
        }
    }

    /// Hand queued jobs, in order, to idle workers.
    fn dispatch(&mut self) {
        while let Some(head) = self.queue.front() {
            if !self.warm.contains(&head.key) {
                break;
            }
            let Some(slot_idx) = self.least_busy() else {
                break;
            };
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            let request = WorkerRequest::Tokenize {
                request_id: job.id,
                text: job.text.clone(),
                key: job.key.clone(),
            };
            let slot = &mut self.workers[slot_idx];
            let sent = slot.tx.as_ref().is_some_and(|tx| tx.send(request).is_ok());
            if sent {
                slot.inflight = Some(job);
            } else {
                let id = slot.id;
                self.queue.push_front(job);
                self.fail_worker(id);
            }
        }
    }

    /// Pin a new stream to the live worker that has served the fewest
    /// requests. Streams count as served requests.
    fn assign_stream(&mut self, reply: Sender<Option<Sender<WorkerRequest>>>) {
        let slot = if self.failed {
            None
        } else {
            self.workers
                .iter_mut()
                .filter(|w| w.is_alive())
                .min_by_key(|w| w.served)
        };
        let worker = slot.and_then(|slot| {
            slot.served += 1;
            debug!(worker = slot.id, "stream assigned");
            slot.tx.clone()
        });
        let _ = reply.send(worker);
    }

    /// Idle live worker that has served the fewest requests.
    fn least_busy(&self) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_alive() && w.inflight.is_none())
            .min_by_key(|(_, w)| w.served)
            .map(|(idx, _)| idx)
    }

    fn publish(&self) {
        if self.failed {
            let queued = self.queue.len();
            self.shared.stats.update(|s| s.queued_tasks = queued);
            return;
        }
        let live = self.workers.iter().filter(|w| w.is_alive()).count();
        let busy = self
            .workers
            .iter()
            .filter(|w| w.inflight.is_some())
            .count();
        let queued = self.queue.len();
        let cached = self.warm.len();
        self.shared.stats.update(|s| {
            s.total_workers = live;
            s.busy_workers = busy;
            s.queued_tasks = queued;
            s.cached_resources = cached;
        });
    }

    fn shutdown(mut self) {
        debug!(dropped = self.queue.len(), "dispatcher shutting down");
        self.queue.clear();
        for slot in &mut self.workers {
            // Open streams hold their own request senders.
            if let Some(tx) = slot.tx.take() {
                let _ = tx.send(WorkerRequest::Shutdown);
            }
            slot.inflight = None;
        }
        drop(self.reply_tx);
        for slot in &mut self.workers {
            if let Some(handle) = slot.handle.take() {
                if handle.join().is_err() {
                    error!(worker = slot.id, "worker thread panicked");
                }
            }
        }
    }
}
