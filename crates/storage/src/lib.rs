//! reagg Store - Collection interfaces and pipeline model for reagg.
//!
//! This crate defines everything the reactive engine needs from a document
//! store, plus an in-memory implementation:
//!
//! - `Collection`: a named collection that runs pipelines and can be observed
//! - `PipelineExecutor`: runs a lookup-resolved pipeline
//! - `ChangeSink` / `ObserveHandle`: change observation callbacks and handles
//! - `Stage` / `Lookup` / `JoinSource`: the caller-facing pipeline model
//! - `ResolvedStage`: the name-only pipeline form handed to executors
//! - `MemoryStore` / `MemoryCollection`: in-memory reference store
//!
//! # Example
//!
//! ```rust
//! use reagg_core::doc;
//! use reagg_store::{MemoryStore, PipelineExecutor, QueryOptions, ResolvedStage};
//!
//! let store = MemoryStore::new();
//! let users = store.collection("users");
//! users.insert(doc! { "_id" => 1, "active" => true }).unwrap();
//! users.insert(doc! { "_id" => 2, "active" => false }).unwrap();
//!
//! let pipeline = vec![ResolvedStage::Raw(doc! { "$match" => doc! { "active" => true } })];
//! let result = users.execute(&pipeline, &QueryOptions::default()).unwrap();
//!
//! assert_eq!(result.len(), 1);
//! ```

pub mod collection;
pub mod memory;
pub mod pipeline;

pub use collection::{ChangeKind, ChangeSink, Collection, CollectionRef, ObserveHandle, PipelineExecutor};
pub use memory::{MemoryCollection, MemoryStore};
pub use pipeline::{
    JoinSource, Lookup, ObserverSpec, QueryOptions, ResolvedLookup, ResolvedStage, Stage, LOOKUP_STAGE,
};
