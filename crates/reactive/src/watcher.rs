//! Source watching.
//!
//! Every dependency of a session gets one change observation. Each
//! notification becomes a payload-free invalidation in the session's
//! mailbox; the pipeline is always re-run in full. Stream errors are
//! forwarded as fatal signals.

use crate::lifecycle::{Lifecycle, LifecycleCell};
use crate::resolver::Dependency;
use reagg_core::{DocumentId, Error, Result};
use reagg_store::{ChangeKind, ChangeSink, ObserveHandle};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Message delivered to a session's mailbox.
#[derive(Debug)]
pub(crate) enum Signal {
    /// A dependency may have changed.
    Invalidate,
    /// A change stream failed.
    Failed(Error),
}

/// `ChangeSink` that turns store notifications into session signals.
pub(crate) struct InvalidationSink {
    collection: String,
    lifecycle: Arc<LifecycleCell>,
    mailbox: UnboundedSender<Signal>,
}

impl InvalidationSink {
    pub(crate) fn new(collection: String, lifecycle: Arc<LifecycleCell>, mailbox: UnboundedSender<Signal>) -> Self {
        Self {
            collection,
            lifecycle,
            mailbox,
        }
    }
}

impl ChangeSink for InvalidationSink {
    fn on_change(&self, kind: ChangeKind, id: &DocumentId) {
        if self.lifecycle.get() != Lifecycle::Active {
            return;
        }
        tracing::trace!(collection = %self.collection, ?kind, %id, "invalidated");
        // A closed mailbox means the session is gone.
        let _ = self.mailbox.send(Signal::Invalidate);
    }

    fn on_error(&self, error: Error) {
        if self.lifecycle.get() == Lifecycle::Stopped {
            return;
        }
        tracing::warn!(collection = %self.collection, %error, "change stream failed");
        let _ = self.mailbox.send(Signal::Failed(error));
    }
}

/// The watch handles of one session.
///
/// Handles are released exactly once, either by [`WatchSet::release`] or
/// when the set is dropped.
#[derive(Default)]
pub struct WatchSet {
    handles: Vec<(String, Box<dyn ObserveHandle>)>,
}

impl WatchSet {
    /// Number of handles held.
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handle is held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Names of the watched collections, in opening order.
    pub fn collections(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn push(&mut self, collection: String, handle: Box<dyn ObserveHandle>) {
        self.handles.push((collection, handle));
    }

    /// Stops every handle.
    pub fn release(&mut self) {
        for (collection, mut handle) in self.handles.drain(..) {
            handle.stop();
            tracing::trace!(%collection, "watch released");
        }
    }
}

impl Drop for WatchSet {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens one watch per dependency, all feeding `mailbox`.
///
/// If any watch fails to open, the ones already opened are released before
/// the error is returned.
pub(crate) fn open_watches(
    dependencies: &[Dependency],
    lifecycle: &Arc<LifecycleCell>,
    mailbox: &UnboundedSender<Signal>,
) -> Result<WatchSet> {
    let mut watches = WatchSet::default();
    for dependency in dependencies {
        let name = dependency.collection_name().to_string();
        let sink = Arc::new(InvalidationSink::new(name.clone(), lifecycle.clone(), mailbox.clone()));
        let handle = dependency.collection.observe(&dependency.spec, sink)?;
        watches.push(name, handle);
    }
    Ok(watches)
}
