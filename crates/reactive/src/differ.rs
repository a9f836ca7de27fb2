//! Result differ.
//!
//! Compares a fresh pipeline result against the identities published in
//! earlier iterations. Only identities are compared: every document that
//! survives an iteration is republished as a change, whether or not its
//! content moved.

use crate::change_set::ChangeSet;
use crate::options::Transforms;
use hashbrown::{HashMap, HashSet};
use reagg_core::{Document, DocumentId, Error, Result};

/// Server-side state of one session: identity -> last-seen iteration.
#[derive(Debug)]
pub struct SessionState {
    tracked: HashMap<DocumentId, u64>,
    iteration: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Creates an empty state at iteration 1.
    pub fn new() -> Self {
        Self {
            tracked: HashMap::new(),
            iteration: 1,
        }
    }

    /// The iteration the next diff will run as.
    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Number of identities currently published.
    #[inline]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Returns true if nothing is published.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Returns true if `id` is currently published.
    #[inline]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.tracked.contains_key(id)
    }
}

/// Diffs `fresh` against `state` and advances it by one iteration.
///
/// Adds and changes come out in `fresh` order, removals after them sorted by
/// identity. Transforms get their own copy of each document; the identity
/// field is written back afterwards.
///
/// Every document is checked for a valid, unique identity before the state
/// is touched, so an error leaves `state` as it was.
pub fn diff(
    state: &mut SessionState,
    fresh: Vec<Document>,
    id_field: &str,
    transforms: &Transforms,
) -> Result<ChangeSet> {
    let ids = identities(&fresh, id_field)?;
    let iteration = state.iteration;
    let mut changes = ChangeSet::new(iteration);

    for (id, doc) in ids.into_iter().zip(fresh) {
        let previous = state.tracked.insert(id.clone(), iteration);
        let mut published = if previous.is_none() {
            transforms.on_add(doc)
        } else {
            transforms.on_change(doc)
        };
        published.set_identity(id_field, &id);
        if previous.is_none() {
            changes.add(id, published);
        } else {
            changes.change(id, published);
        }
    }

    let mut gone: Vec<DocumentId> = state
        .tracked
        .iter()
        .filter(|(_, seen)| **seen != iteration)
        .map(|(id, _)| id.clone())
        .collect();
    gone.sort();
    for id in gone {
        transforms.on_remove(&id);
        state.tracked.remove(&id);
        changes.remove(id);
    }

    state.iteration += 1;
    Ok(changes)
}

fn identities(fresh: &[Document], id_field: &str) -> Result<Vec<DocumentId>> {
    let mut seen = HashSet::with_capacity(fresh.len());
    let mut ids = Vec::with_capacity(fresh.len());
    for (position, doc) in fresh.iter().enumerate() {
        let id = doc
            .identity(id_field)
            .map_err(|e| Error::configuration(format!("result document {}: {}", position, e)))?;
        if !seen.insert(id.clone()) {
            return Err(Error::configuration(format!(
                "duplicate identity {} in pipeline result (field `{}`)",
                id, id_field
            )));
        }
        ids.push(id);
    }
    Ok(ids)
}
