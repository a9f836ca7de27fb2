//! In-memory reference store.
//!
//! `MemoryStore` is a set of named `MemoryCollection`s. Each collection keeps
//! its documents ordered by identity, notifies registered observers on every
//! write and can run a small subset of pipeline stages:
//!
//! - `$match`: top-level field equality
//! - `$sort`: `field => 1 | -1`
//! - `$skip` / `$limit`
//! - `$lookup`: equality join against another collection of the same store
//!
//! Anything else fails with an execution error. It is meant for tests,
//! benches and embedding demos, not as an aggregation engine.

use crate::collection::{ChangeKind, ChangeSink, Collection, ObserveHandle, PipelineExecutor};
use crate::pipeline::{ObserverSpec, QueryOptions, ResolvedLookup, ResolvedStage};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use reagg_core::{Document, DocumentId, Error, Result, Value, DEFAULT_ID_FIELD};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A set of named in-memory collections.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
    self_ref: Weak<MemoryStore>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            collections: RwLock::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the collection called `name`, creating it if needed.
    pub fn collection(&self, name: &str) -> Arc<MemoryCollection> {
        if let Some(existing) = self.collections.read().get(name) {
            return existing.clone();
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| MemoryCollection::create(name, self.self_ref.clone()))
            .clone()
    }

    /// Returns the collection called `name` if it exists.
    pub fn get(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        self.collections.read().get(name).cloned()
    }

    /// Returns the names of all collections.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

struct Observer {
    query: Document,
    sink: Arc<dyn ChangeSink>,
}

/// A document collection held in memory.
pub struct MemoryCollection {
    name: String,
    store: Weak<MemoryStore>,
    self_ref: Weak<MemoryCollection>,
    documents: RwLock<BTreeMap<DocumentId, Document>>,
    observers: Mutex<HashMap<u64, Observer>>,
    next_observer_id: AtomicU64,
    opened: AtomicUsize,
    released: AtomicUsize,
    executions: AtomicUsize,
    executor: RwLock<Option<Arc<dyn PipelineExecutor>>>,
    observe_error: Mutex<Option<String>>,
}

impl MemoryCollection {
    fn create(name: &str, store: Weak<MemoryStore>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.to_string(),
            store,
            self_ref: self_ref.clone(),
            documents: RwLock::new(BTreeMap::new()),
            observers: Mutex::new(HashMap::new()),
            next_observer_id: AtomicU64::new(1),
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            executor: RwLock::new(None),
            observe_error: Mutex::new(None),
        })
    }

    /// Returns the number of documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if the collection has no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Gets a document by identity.
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    /// Returns all documents ordered by identity.
    pub fn scan(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }

    /// Inserts a new document. The document must carry a `_id` not present
    /// in the collection.
    pub fn insert(&self, doc: Document) -> Result<DocumentId> {
        let id = doc.identity(DEFAULT_ID_FIELD)?;
        {
            let mut documents = self.documents.write();
            if documents.contains_key(&id) {
                return Err(Error::configuration(format!(
                    "identity {} already exists in collection {}",
                    id, self.name
                )));
            }
            documents.insert(id.clone(), doc.clone());
        }
        self.notify(&id, None, Some(&doc));
        Ok(id)
    }

    /// Replaces the document stored under `id`. Returns false if there is
    /// no such document.
    pub fn update(&self, id: &DocumentId, mut doc: Document) -> bool {
        doc.set_identity(DEFAULT_ID_FIELD, id);
        let old = {
            let mut documents = self.documents.write();
            match documents.get_mut(id) {
                Some(slot) => core::mem::replace(slot, doc.clone()),
                None => return false,
            }
        };
        self.notify(id, Some(&old), Some(&doc));
        true
    }

    /// Deletes the document stored under `id`.
    pub fn delete(&self, id: &DocumentId) -> Option<Document> {
        let old = self.documents.write().remove(id)?;
        self.notify(id, Some(&old), None);
        Some(old)
    }

    /// Removes every document, reporting each removal.
    pub fn clear(&self) {
        let removed = core::mem::take(&mut *self.documents.write());
        for (id, old) in &removed {
            self.notify(id, Some(old), None);
        }
    }

    /// Replaces the executor used by [`PipelineExecutor::execute`].
    ///
    /// Lets tests run pipelines that block or fail.
    pub fn set_executor(&self, executor: Arc<dyn PipelineExecutor>) {
        *self.executor.write() = Some(executor);
    }

    /// Makes the next call to `observe` fail with a watch error.
    pub fn fail_next_observe(&self, message: impl Into<String>) {
        *self.observe_error.lock() = Some(message.into());
    }

    /// Reports a stream failure to every active observer.
    pub fn fail_observers(&self, message: &str) {
        let sinks: Vec<Arc<dyn ChangeSink>> =
            self.observers.lock().values().map(|o| o.sink.clone()).collect();
        for sink in sinks {
            sink.on_error(Error::watch(self.name.clone(), message));
        }
    }

    /// Number of observations currently open.
    pub fn active_observers(&self) -> usize {
        self.observers.lock().len()
    }

    /// Number of observations opened so far.
    pub fn opened_observers(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of observations released so far.
    pub fn released_observers(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of pipelines executed by the built-in executor.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    fn notify(&self, id: &DocumentId, old: Option<&Document>, new: Option<&Document>) {
        // Collect first so sinks run without the observer lock held.
        let targets: Vec<(ChangeKind, Arc<dyn ChangeSink>)> = self
            .observers
            .lock()
            .values()
            .filter_map(|observer| {
                let was = old.is_some_and(|d| matches_filter(d, &observer.query));
                let is = new.is_some_and(|d| matches_filter(d, &observer.query));
                let kind = match (was, is) {
                    (false, true) => ChangeKind::Added,
                    (true, true) => ChangeKind::Changed,
                    (true, false) => ChangeKind::Removed,
                    (false, false) => return None,
                };
                Some((kind, observer.sink.clone()))
            })
            .collect();

        for (kind, sink) in targets {
            sink.on_change(kind, id);
        }
    }

    fn release_observer(&self, observer_id: u64) {
        if self.observers.lock().remove(&observer_id).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(collection = %self.name, observer_id, "observer released");
        }
    }

    fn run_pipeline(&self, pipeline: &[ResolvedStage]) -> Result<Vec<Document>> {
        let mut docs = self.scan();
        for stage in pipeline {
            docs = match stage {
                ResolvedStage::Lookup(lookup) => self.apply_lookup(docs, lookup),
                ResolvedStage::Raw(raw) => apply_raw_stage(docs, raw)?,
            };
        }
        Ok(docs)
    }

    fn apply_lookup(&self, docs: Vec<Document>, lookup: &ResolvedLookup) -> Vec<Document> {
        let foreign = if lookup.from == self.name {
            self.scan()
        } else {
            self.store
                .upgrade()
                .and_then(|store| store.get(&lookup.from))
                .map(|c| c.scan())
                .unwrap_or_default()
        };

        docs.into_iter()
            .map(|mut doc| {
                let local = doc.get(&lookup.local_field).cloned().unwrap_or(Value::Null);
                let joined: Vec<Value> = foreign
                    .iter()
                    .filter(|f| f.get(&lookup.foreign_field).unwrap_or(&Value::Null) == &local)
                    .cloned()
                    .map(Value::Object)
                    .collect();
                doc.insert(lookup.as_field.clone(), Value::Array(joined));
                doc
            })
            .collect()
    }
}

impl PipelineExecutor for MemoryCollection {
    fn execute(&self, pipeline: &[ResolvedStage], options: &QueryOptions) -> Result<Vec<Document>> {
        let custom = self.executor.read().clone();
        if let Some(executor) = custom {
            return executor.execute(pipeline, options);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.run_pipeline(pipeline)
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&self, spec: &ObserverSpec, sink: Arc<dyn ChangeSink>) -> Result<Box<dyn ObserveHandle>> {
        if let Some(message) = self.observe_error.lock().take() {
            return Err(Error::watch(self.name.clone(), message));
        }

        let observer_id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        let initial: Vec<DocumentId> = {
            let documents = self.documents.read();
            self.observers.lock().insert(
                observer_id,
                Observer {
                    query: spec.query.clone(),
                    sink: sink.clone(),
                },
            );
            documents
                .iter()
                .filter(|(_, doc)| matches_filter(doc, &spec.query))
                .map(|(id, _)| id.clone())
                .collect()
        };
        self.opened.fetch_add(1, Ordering::SeqCst);

        for id in &initial {
            sink.on_change(ChangeKind::Added, id);
        }

        Ok(Box::new(MemoryObserveHandle {
            collection: self.self_ref.clone(),
            observer_id,
            stopped: false,
        }))
    }
}

struct MemoryObserveHandle {
    collection: Weak<MemoryCollection>,
    observer_id: u64,
    stopped: bool,
}

impl ObserveHandle for MemoryObserveHandle {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(collection) = self.collection.upgrade() {
            collection.release_observer(self.observer_id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for MemoryObserveHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Top-level field equality; an empty filter matches everything.
fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| doc.get(field).unwrap_or(&Value::Null) == expected)
}

fn apply_raw_stage(mut docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    let (operator, argument) = match stage.iter().next() {
        Some(entry) if stage.len() == 1 => entry,
        _ => return Err(Error::execution("stage must have exactly one operator")),
    };

    match (operator.as_str(), argument) {
        ("$match", Value::Object(filter)) => {
            docs.retain(|doc| matches_filter(doc, filter));
            Ok(docs)
        }
        ("$sort", Value::Object(spec)) => {
            docs.sort_by(|a, b| compare_by(a, b, spec));
            Ok(docs)
        }
        ("$skip", Value::Int64(n)) if *n >= 0 => Ok(docs.into_iter().skip(*n as usize).collect()),
        ("$limit", Value::Int64(n)) if *n >= 0 => {
            docs.truncate(*n as usize);
            Ok(docs)
        }
        (other, _) => Err(Error::execution(format!("unsupported stage {}", other))),
    }
}

fn compare_by(a: &Document, b: &Document, spec: &Document) -> CmpOrdering {
    for (field, direction) in spec {
        let ordering = a
            .get(field)
            .unwrap_or(&Value::Null)
            .cmp(b.get(field).unwrap_or(&Value::Null));
        let ordering = if direction.as_i64() == Some(-1) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagg_core::doc;

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<(ChangeKind, DocumentId)>>,
        errors: Mutex<Vec<Error>>,
    }

    impl ChangeSink for RecordingSink {
        fn on_change(&self, kind: ChangeKind, id: &DocumentId) {
            self.changes.lock().push((kind, id.clone()));
        }

        fn on_error(&self, error: Error) {
            self.errors.lock().push(error);
        }
    }

    fn users() -> (Arc<MemoryStore>, Arc<MemoryCollection>) {
        let store = MemoryStore::new();
        let users = store.collection("users");
        users.insert(doc! { "_id" => 1, "name" => "Alice", "team" => "a" }).unwrap();
        users.insert(doc! { "_id" => 2, "name" => "Bob", "team" => "b" }).unwrap();
        (store, users)
    }

    #[test]
    fn test_store_collection_is_shared() {
        let store = MemoryStore::new();
        let a = store.collection("users");
        let b = store.collection("users");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.get("missing").is_none());
        assert_eq!(store.collection_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_insert_update_delete() {
        let (_store, users) = users();
        assert_eq!(users.len(), 2);

        let err = users.insert(doc! { "_id" => 1 }).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        assert!(users.update(&DocumentId::Int(1), doc! { "name" => "Alicia" }));
        assert_eq!(
            users.get(&DocumentId::Int(1)),
            Some(doc! { "_id" => 1, "name" => "Alicia" })
        );
        assert!(!users.update(&DocumentId::Int(9), doc! {}));

        assert!(users.delete(&DocumentId::Int(2)).is_some());
        assert!(users.delete(&DocumentId::Int(2)).is_none());
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_observe_initial_burst_and_changes() {
        let (_store, users) = users();
        let sink = Arc::new(RecordingSink::default());
        let mut handle = users.observe(&ObserverSpec::default(), sink.clone()).unwrap();

        assert_eq!(
            *sink.changes.lock(),
            vec![
                (ChangeKind::Added, DocumentId::Int(1)),
                (ChangeKind::Added, DocumentId::Int(2)),
            ]
        );

        users.insert(doc! { "_id" => 3 }).unwrap();
        users.update(&DocumentId::Int(1), doc! { "name" => "A" });
        users.delete(&DocumentId::Int(2));

        let changes = sink.changes.lock().clone();
        assert_eq!(
            &changes[2..],
            &[
                (ChangeKind::Added, DocumentId::Int(3)),
                (ChangeKind::Changed, DocumentId::Int(1)),
                (ChangeKind::Removed, DocumentId::Int(2)),
            ]
        );

        handle.stop();
        users.insert(doc! { "_id" => 4 }).unwrap();
        assert_eq!(sink.changes.lock().len(), 5);
    }

    #[test]
    fn test_clear_reports_each_removal() {
        let (_store, users) = users();
        let sink = Arc::new(RecordingSink::default());
        let _handle = users.observe(&ObserverSpec::default(), sink.clone()).unwrap();

        users.clear();
        assert!(users.is_empty());

        let changes = sink.changes.lock().clone();
        assert_eq!(
            &changes[2..],
            &[
                (ChangeKind::Removed, DocumentId::Int(1)),
                (ChangeKind::Removed, DocumentId::Int(2)),
            ]
        );

        users.clear();
        assert_eq!(sink.changes.lock().len(), 4);
    }

    #[test]
    fn test_observe_with_query() {
        let (_store, users) = users();
        let sink = Arc::new(RecordingSink::default());
        let _handle = users
            .observe(&ObserverSpec::with_query(doc! { "team" => "a" }), sink.clone())
            .unwrap();
        assert_eq!(sink.changes.lock().len(), 1);

        // Moving a document out of the filter is a removal for the observer.
        users.update(&DocumentId::Int(1), doc! { "team" => "b" });
        users.insert(doc! { "_id" => 5, "team" => "b" }).unwrap();

        assert_eq!(
            sink.changes.lock().last(),
            Some(&(ChangeKind::Removed, DocumentId::Int(1)))
        );
        assert_eq!(sink.changes.lock().len(), 2);
    }

    #[test]
    fn test_handle_stop_is_idempotent() {
        let (_store, users) = users();
        let sink = Arc::new(RecordingSink::default());
        let mut handle = users.observe(&ObserverSpec::default(), sink).unwrap();
        assert_eq!(users.active_observers(), 1);

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        drop(handle);

        assert_eq!(users.active_observers(), 0);
        assert_eq!(users.opened_observers(), 1);
        assert_eq!(users.released_observers(), 1);
    }

    #[test]
    fn test_handle_released_on_drop() {
        let (_store, users) = users();
        let sink = Arc::new(RecordingSink::default());
        {
            let _handle = users.observe(&ObserverSpec::default(), sink).unwrap();
            assert_eq!(users.active_observers(), 1);
        }
        assert_eq!(users.active_observers(), 0);
        assert_eq!(users.released_observers(), 1);
    }

    #[test]
    fn test_observe_failure_and_stream_error() {
        let (_store, users) = users();
        users.fail_next_observe("cursor invalid");
        let sink = Arc::new(RecordingSink::default());
        let err = users.observe(&ObserverSpec::default(), sink.clone()).err().unwrap();
        assert!(matches!(err, Error::Watch { .. }));

        let _handle = users.observe(&ObserverSpec::default(), sink.clone()).unwrap();
        users.fail_observers("connection lost");
        assert_eq!(sink.errors.lock().len(), 1);
    }

    #[test]
    fn test_execute_stages() {
        let (_store, users) = users();
        users.insert(doc! { "_id" => 3, "name" => "Cleo", "team" => "a" }).unwrap();

        let pipeline = vec![
            ResolvedStage::Raw(doc! { "$match" => doc! { "team" => "a" } }),
            ResolvedStage::Raw(doc! { "$sort" => doc! { "name" => -1 } }),
            ResolvedStage::Raw(doc! { "$limit" => 1 }),
        ];
        let result = users.execute(&pipeline, &QueryOptions::default()).unwrap();
        assert_eq!(result, vec![doc! { "_id" => 3, "name" => "Cleo", "team" => "a" }]);
        assert_eq!(users.execution_count(), 1);

        let result = users
            .execute(&[ResolvedStage::Raw(doc! { "$skip" => 2 })], &QueryOptions::default())
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_execute_lookup() {
        let (store, users) = users();
        let orders = store.collection("orders");
        orders.insert(doc! { "_id" => 10, "user" => 1 }).unwrap();
        orders.insert(doc! { "_id" => 11, "user" => 1 }).unwrap();

        let pipeline = vec![ResolvedStage::Lookup(ResolvedLookup {
            from: "orders".into(),
            local_field: "_id".into(),
            foreign_field: "user".into(),
            as_field: "orders".into(),
        })];
        let result = users.execute(&pipeline, &QueryOptions::default()).unwrap();

        let alice_orders = result[0].get("orders").and_then(Value::as_array).unwrap();
        assert_eq!(alice_orders.len(), 2);
        let bob_orders = result[1].get("orders").and_then(Value::as_array).unwrap();
        assert!(bob_orders.is_empty());
    }

    #[test]
    fn test_execute_unsupported_stage() {
        let (_store, users) = users();
        let err = users
            .execute(&[ResolvedStage::Raw(doc! { "$group" => doc! {} })], &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
        assert!(err.to_string().contains("$group"));
    }

    #[test]
    fn test_custom_executor() {
        struct Fixed;
        impl PipelineExecutor for Fixed {
            fn execute(&self, _: &[ResolvedStage], _: &QueryOptions) -> Result<Vec<Document>> {
                Ok(vec![doc! { "_id" => "fixed" }])
            }
        }

        let (_store, users) = users();
        users.set_executor(Arc::new(Fixed));
        let result = users.execute(&[], &QueryOptions::default()).unwrap();
        assert_eq!(result, vec![doc! { "_id" => "fixed" }]);
        assert_eq!(users.execution_count(), 0);
    }
}
