//! Session registry.
//!
//! `ReactiveEngine` hands out session ids and keeps every live session so
//! they can be listed and stopped together. Sessions that end on their own
//! leave the registry through a stop callback.

use crate::executor;
use crate::options::SubscribeOptions;
use crate::publication::Publication;
use crate::session::{self, SessionHandle, SessionId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use reagg_core::{Document, Result};
use reagg_store::{CollectionRef, QueryOptions, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct EngineInner {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for (_, session) in self.sessions.get_mut().drain() {
            session.stop();
        }
    }
}

/// Entry point for reactive aggregations.
///
/// Dropping the last clone of an engine stops every session it started.
#[derive(Clone)]
pub struct ReactiveEngine {
    inner: Arc<EngineInner>,
}

impl Default for ReactiveEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveEngine {
    /// Creates an engine with no sessions.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes `publication` to the live result of `pipeline` on
    /// `collection`.
    ///
    /// On success the initial result has been published and `ready` has
    /// been called. Configuration, watch and execution errors that happen
    /// before that are returned here and leave nothing open.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn subscribe(
        &self,
        collection: CollectionRef,
        pipeline: Vec<Stage>,
        options: SubscribeOptions,
        publication: Arc<dyn Publication>,
    ) -> Result<SessionHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = session::start(id, collection, pipeline, options, publication).await?;

        self.inner.sessions.lock().insert(id, handle.clone());
        let registry: Weak<EngineInner> = Arc::downgrade(&self.inner);
        handle.on_stop(move || {
            if let Some(inner) = registry.upgrade() {
                inner.sessions.lock().remove(&id);
            }
        });
        Ok(handle)
    }

    /// Runs `pipeline` once without watching anything.
    pub fn execute_once(
        &self,
        collection: &CollectionRef,
        pipeline: &[Stage],
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        executor::execute_once(collection, pipeline, options)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Ids of the live sessions, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.sessions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Looks up a live session.
    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.sessions.lock().get(&id).cloned()
    }

    /// Stops one session. Returns false if it was not live.
    pub fn stop(&self, id: SessionId) -> bool {
        let session = self.inner.sessions.lock().remove(&id);
        match session {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every live session.
    pub fn stop_all(&self) {
        let sessions: Vec<_> = self.inner.sessions.lock().drain().map(|(_, s)| s).collect();
        tracing::debug!(count = sessions.len(), "stopping all sessions");
        for session in sessions {
            session.stop();
        }
    }
}
