//! Reagg Reactive - live aggregation results for reagg collections.
//!
//! This crate keeps a subscriber's copy of an aggregation result in sync with
//! the collections it reads. Every session watches the primary collection and
//! every collection joined by handle, re-runs the whole pipeline when any of
//! them changes (throttled), diffs the output by document identity and
//! publishes added/changed/removed events.
//!
//! # Core Concepts
//!
//! - `ReactiveEngine`: starts sessions and keeps the registry of live ones
//! - `SessionHandle`: stops a session and reports its state
//! - `Publication`: the subscriber-facing event sink
//! - `ChangeSet`: the events of one iteration
//! - `Throttle`: leading-edge throttle deciding when to re-run
//! - `resolve`: turns join stages given by handle into watched dependencies
//!
//! # Example
//!
//! ```
//! use reagg_core::doc;
//! use reagg_reactive::{ChannelPublication, PublicationEvent, ReactiveEngine, SubscribeOptions};
//! use reagg_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> reagg_core::Result<()> {
//! let store = MemoryStore::new();
//! let users = store.collection("users");
//! users.insert(doc! { "_id" => 1, "name" => "ada" })?;
//!
//! let engine = ReactiveEngine::new();
//! let (publication, mut events) = ChannelPublication::new();
//! let session = engine
//!     .subscribe(users.clone(), vec![], SubscribeOptions::default(), Arc::new(publication))
//!     .await?;
//!
//! assert!(matches!(events.recv().await, Some(PublicationEvent::Added { .. })));
//! assert_eq!(events.recv().await, Some(PublicationEvent::Ready));
//!
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod change_set;
pub mod differ;
pub mod engine;
pub mod executor;
pub mod lifecycle;
pub mod options;
pub mod publication;
pub mod resolver;
pub mod session;
pub mod throttle;
pub mod watcher;

pub use change_set::{ChangeEvent, ChangeSet};
pub use differ::{diff, SessionState};
pub use engine::ReactiveEngine;
pub use executor::execute_once;
pub use lifecycle::Lifecycle;
pub use options::{
    DocumentTransform, PipelineSource, RemoveHook, SubscribeConfig, SubscribeOptions, SubscribeOptionsBuilder,
    Transforms, DEFAULT_DELAY,
};
pub use publication::{ChannelPublication, Publication, PublicationEvent};
pub use resolver::{resolve, Dependency, Resolution};
pub use session::{SessionHandle, SessionId};
pub use throttle::{Decision, Throttle};
pub use watcher::WatchSet;

// Re-export commonly used types from dependencies
pub use reagg_core::{Document, DocumentId, Error, Result, Value};
pub use reagg_store::{CollectionRef, JoinSource, ObserverSpec, QueryOptions, Stage};
