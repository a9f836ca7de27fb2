//! Interfaces a document store exposes to the reactive engine.
//!
//! The engine never evaluates pipeline stages or watches storage itself. It
//! talks to a store through three seams:
//!
//! - `PipelineExecutor`: runs a (lookup-resolved) pipeline and returns the
//!   ordered result documents
//! - `Collection`: a named collection that can be aggregated on and observed
//! - `ChangeSink` / `ObserveHandle`: the callback side and the stoppable
//!   handle of a change observation

use crate::pipeline::{ObserverSpec, QueryOptions, ResolvedStage};
use reagg_core::{DocumentId, Document, Error, Result};
use std::fmt;
use std::sync::Arc;

/// Runs an aggregation pipeline.
///
/// Implementations are synchronous from the caller's point of view and must
/// not mutate the store.
pub trait PipelineExecutor: Send + Sync {
    /// Runs `pipeline` and returns the result in pipeline output order.
    fn execute(&self, pipeline: &[ResolvedStage], options: &QueryOptions) -> Result<Vec<Document>>;
}

/// Kind of a change reported by an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A document started matching the observed query.
    Added,
    /// A matching document was modified.
    Changed,
    /// A document stopped matching the observed query.
    Removed,
}

/// Receiver side of a change observation.
///
/// Stores may call these from any thread, including synchronously from
/// inside [`Collection::observe`] for the initial population burst.
pub trait ChangeSink: Send + Sync {
    /// Called for every added/changed/removed document.
    fn on_change(&self, kind: ChangeKind, id: &DocumentId);

    /// Called when the change stream fails. No further changes follow.
    fn on_error(&self, error: Error);
}

/// An active change observation.
pub trait ObserveHandle: Send {
    /// Releases the underlying stream. Calling it again is a no-op.
    fn stop(&mut self);

    /// Returns true once `stop` has been called.
    fn is_stopped(&self) -> bool;
}

/// A named document collection.
pub trait Collection: PipelineExecutor {
    /// Stable collection name, used to rewrite join stages and to tag
    /// outbound events.
    fn name(&self) -> &str;

    /// Opens a change observation for documents matching `spec`.
    ///
    /// Matching documents that already exist are reported to `sink` as
    /// [`ChangeKind::Added`] before this returns.
    fn observe(&self, spec: &ObserverSpec, sink: Arc<dyn ChangeSink>) -> Result<Box<dyn ObserveHandle>>;
}

/// Shared handle to a collection.
pub type CollectionRef = Arc<dyn Collection>;

/// Wrapper that prints a collection by name.
pub(crate) struct CollectionName<'a>(pub &'a CollectionRef);

impl fmt::Debug for CollectionName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Collection({:?})", self.0.name())
    }
}
