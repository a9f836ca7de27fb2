//! Reactive sessions.
//!
//! A session is one subscriber's live view of one pipeline. It owns the
//! watches on every dependency, the differ state and a task that re-runs
//! the pipeline when a dependency changes.
//!
//! # Concurrency
//!
//! Watch callbacks only push signals into the session mailbox. The task
//! owns the throttle and the differ state, so neither needs a lock, and it
//! awaits each run before reading the next signal, so runs never overlap.
//!
//! Events are published under the emit lock with the lifecycle checked
//! before every event. `stop()` marks the session stopped and then takes the
//! same lock, so once it returns nothing else reaches the publication.

use crate::change_set::{ChangeEvent, ChangeSet};
use crate::differ::{diff, SessionState};
use crate::executor::run_pipeline;
use crate::lifecycle::{Lifecycle, LifecycleCell};
use crate::options::{SubscribeOptions, Transforms};
use crate::publication::Publication;
use crate::resolver::{resolve, Dependency};
use crate::throttle::{Decision, Throttle};
use crate::watcher::{open_watches, Signal, WatchSet};
use parking_lot::{Mutex, ReentrantMutex};
use reagg_core::{Error, Result};
use reagg_store::{CollectionRef, QueryOptions, ResolvedStage, Stage};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Unique identifier of a session within an engine.
pub type SessionId = u64;

type StopCallback = Box<dyn FnOnce() + Send>;

/// State shared between a session's handles and its task.
struct Shared {
    id: SessionId,
    lifecycle: Arc<LifecycleCell>,
    emit_lock: ReentrantMutex<()>,
    publication: Arc<dyn Publication>,
    destination: String,
    watches: Mutex<WatchSet>,
    cancel: CancellationToken,
    stop_callbacks: Mutex<Vec<StopCallback>>,
    iterations: AtomicU64,
    tracked: AtomicUsize,
}

impl Shared {
    /// Publishes one iteration. Returns false if the session stopped before
    /// every event went out.
    fn publish(&self, changes: ChangeSet) -> bool {
        let _emit = self.emit_lock.lock();
        for event in changes {
            if self.lifecycle.get() != Lifecycle::Active {
                return false;
            }
            match event {
                ChangeEvent::Added { id, document } => self.publication.added(&self.destination, &id, document),
                ChangeEvent::Changed { id, document } => self.publication.changed(&self.destination, &id, document),
                ChangeEvent::Removed { id } => self.publication.removed(&self.destination, &id),
            }
        }
        self.lifecycle.get() == Lifecycle::Active
    }

    fn ready(&self) -> bool {
        let _emit = self.emit_lock.lock();
        if self.lifecycle.get() != Lifecycle::Active {
            return false;
        }
        self.publication.ready();
        true
    }

    /// Tears the session down. Only the first call has any effect.
    fn terminate(&self, error: Option<Error>) {
        if self.lifecycle.stop() == Lifecycle::Stopped {
            return;
        }
        self.cancel.cancel();

        {
            // Waits out an emission in progress on another thread.
            let _emit = self.emit_lock.lock();
            if let Some(error) = &error {
                tracing::warn!(session = self.id, %error, "session failed");
                self.publication.error(error);
            }
        }

        self.watches.lock().release();

        let callbacks = std::mem::take(&mut *self.stop_callbacks.lock());
        for callback in callbacks {
            callback();
        }
        tracing::debug!(session = self.id, "session stopped");
    }

    fn record(&self, state: &SessionState) {
        self.iterations.store(state.iteration() - 1, Ordering::Relaxed);
        self.tracked.store(state.len(), Ordering::Relaxed);
    }
}

/// Handle to a running session.
///
/// Handles are cheap to clone. Dropping them does not stop the session;
/// call [`SessionHandle::stop`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Session id.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Current lifecycle state.
    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle.get()
    }

    /// Returns true until the session stops.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    /// Collection name events are published under.
    pub fn destination(&self) -> &str {
        &self.shared.destination
    }

    /// Number of completed iterations, including the initial one.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Relaxed)
    }

    /// Number of documents currently published.
    pub fn tracked(&self) -> usize {
        self.shared.tracked.load(Ordering::Relaxed)
    }

    /// Number of open watches. Zero once stopped.
    pub fn watch_count(&self) -> usize {
        self.shared.watches.lock().len()
    }

    /// Stops the session.
    ///
    /// Cancels any scheduled run, abandons a run in flight and releases
    /// every watch. Idempotent.
    pub fn stop(&self) {
        self.shared.terminate(None);
    }

    /// Registers a callback run once when the session stops, whatever the
    /// reason. Runs immediately if it has already stopped.
    pub fn on_stop<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.shared.stop_callbacks.lock();
            if self.shared.lifecycle.get() != Lifecycle::Stopped {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("lifecycle", &self.lifecycle())
            .field("destination", &self.shared.destination)
            .finish()
    }
}

/// The task side of a session.
struct SessionTask {
    shared: Arc<Shared>,
    collection: CollectionRef,
    pipeline: Arc<[ResolvedStage]>,
    query_options: QueryOptions,
    id_field: String,
    transforms: Transforms,
    state: SessionState,
    throttle: Throttle,
    mailbox: UnboundedReceiver<Signal>,
}

impl SessionTask {
    /// Runs the pipeline and diffs the result. `None` if the session was
    /// stopped meanwhile.
    async fn iterate(&mut self) -> Option<Result<ChangeSet>> {
        self.throttle.fire(Instant::now());
        let run = run_pipeline(self.collection.clone(), self.pipeline.clone(), self.query_options.clone());
        let fresh = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return None,
            fresh = run => fresh,
        };
        if self.shared.lifecycle.get() != Lifecycle::Active {
            return None;
        }

        let changes = fresh.and_then(|fresh| diff(&mut self.state, fresh, &self.id_field, &self.transforms));
        if let Ok(changes) = &changes {
            self.shared.record(&self.state);
            tracing::trace!(
                iteration = changes.iteration,
                added = changes.added(),
                changed = changes.changed(),
                removed = changes.removed(),
                "iteration complete"
            );
        }
        Some(changes)
    }

    /// Re-evaluates and publishes. Returns false once the session is over.
    async fn refresh(&mut self) -> bool {
        match self.iterate().await {
            Some(Ok(changes)) => self.shared.publish(changes),
            Some(Err(error)) => {
                self.shared.terminate(Some(error));
                false
            }
            None => false,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.throttle.deadline();
            let keep_going = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => false,
                signal = self.mailbox.recv() => match signal {
                    Some(Signal::Invalidate) => match self.throttle.on_invalidate(Instant::now()) {
                        Decision::RunNow => self.refresh().await,
                        Decision::Deferred(at) => {
                            tracing::trace!(wait = ?at.saturating_duration_since(Instant::now()), "re-evaluation deferred");
                            true
                        }
                        Decision::Coalesced => true,
                    },
                    Some(Signal::Failed(error)) => {
                        self.shared.terminate(Some(error));
                        false
                    }
                    None => false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.refresh().await
                }
            };
            if !keep_going {
                break;
            }
        }
        self.throttle.cancel();
        tracing::debug!(iterations = self.shared.iterations.load(Ordering::Relaxed), "session task finished");
    }
}

/// Starts a session: resolves the pipeline, opens the watches, publishes
/// the initial result, signals ready and spawns the session task.
///
/// Any error before the task is spawned releases what was opened and is
/// returned to the caller; `publication.error` is not called.
pub(crate) async fn start(
    id: SessionId,
    collection: CollectionRef,
    pipeline: Vec<Stage>,
    options: SubscribeOptions,
    publication: Arc<dyn Publication>,
) -> Result<SessionHandle> {
    options.validate()?;
    let SubscribeOptions {
        observer,
        delay,
        destination,
        id_field,
        transforms,
        pipeline_source,
    } = options;

    let (pipeline, observer) = match pipeline_source {
        Some(source) => source(),
        None => (pipeline, observer),
    };
    let resolution = resolve(&pipeline)?;
    let destination = destination.unwrap_or_else(|| collection.name().to_string());

    let span = tracing::info_span!("reagg_session", id);
    tracing::debug!(
        parent: &span,
        collection = collection.name(),
        %destination,
        stages = resolution.pipeline.len(),
        lookups = resolution.dependencies.len(),
        "subscribing"
    );

    let mut dependencies = Vec::with_capacity(1 + resolution.dependencies.len());
    dependencies.push(Dependency::new(collection.clone(), observer.clone()));
    dependencies.extend(resolution.dependencies);

    let lifecycle = Arc::new(LifecycleCell::new());
    let (tx, mailbox) = unbounded_channel();
    let watches = open_watches(&dependencies, &lifecycle, &tx)?;
    drop(tx);

    let shared = Arc::new(Shared {
        id,
        lifecycle,
        emit_lock: ReentrantMutex::new(()),
        publication,
        destination,
        watches: Mutex::new(watches),
        cancel: CancellationToken::new(),
        stop_callbacks: Mutex::new(Vec::new()),
        iterations: AtomicU64::new(0),
        tracked: AtomicUsize::new(0),
    });

    let mut task = SessionTask {
        shared: shared.clone(),
        collection,
        pipeline: Arc::from(resolution.pipeline),
        query_options: observer.options,
        id_field,
        transforms,
        state: SessionState::new(),
        throttle: Throttle::new(delay),
        mailbox,
    };

    if !shared.lifecycle.activate() {
        shared.terminate(None);
        return Err(Error::SessionStopped);
    }

    let initial = match task.iterate().instrument(span.clone()).await {
        Some(Ok(changes)) => changes,
        Some(Err(error)) => {
            tracing::warn!(parent: &span, %error, "initial evaluation failed");
            shared.terminate(None);
            return Err(error);
        }
        None => {
            shared.terminate(None);
            return Err(Error::SessionStopped);
        }
    };

    if !shared.publish(initial) || !shared.ready() {
        return Err(Error::SessionStopped);
    }
    tracing::debug!(parent: &span, documents = task.state.len(), "session ready");

    tokio::spawn(task.run().instrument(span));
    Ok(SessionHandle { shared })
}
