//! Change set for one iteration of a reactive aggregation.
//!
//! A ChangeSet is the ordered list of events that brings a subscriber's copy
//! of the result in line with the latest pipeline output: additions and
//! changes in pipeline output order, followed by removals.

use reagg_core::{Document, DocumentId};

/// A single outbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Identity not seen in the previous iteration.
    Added { id: DocumentId, document: Document },
    /// Identity seen before; the document is republished in full.
    Changed { id: DocumentId, document: Document },
    /// Identity present before but missing from this iteration.
    Removed { id: DocumentId },
}

impl ChangeEvent {
    /// Returns the identity this event is about.
    #[inline]
    pub fn id(&self) -> &DocumentId {
        match self {
            ChangeEvent::Added { id, .. } | ChangeEvent::Changed { id, .. } | ChangeEvent::Removed { id } => id,
        }
    }
}

/// The events produced by one iteration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Iteration number that produced these events
    pub iteration: u64,
    /// Events in emission order
    pub events: Vec<ChangeEvent>,
}

impl ChangeSet {
    /// Creates an empty change set for the given iteration.
    #[inline]
    pub fn new(iteration: u64) -> Self {
        Self {
            iteration,
            events: Vec::new(),
        }
    }

    /// Returns true if there are no events.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total number of events.
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Number of `Added` events.
    pub fn added(&self) -> usize {
        self.count(|e| matches!(e, ChangeEvent::Added { .. }))
    }

    /// Number of `Changed` events.
    pub fn changed(&self) -> usize {
        self.count(|e| matches!(e, ChangeEvent::Changed { .. }))
    }

    /// Number of `Removed` events.
    pub fn removed(&self) -> usize {
        self.count(|e| matches!(e, ChangeEvent::Removed { .. }))
    }

    /// Adds an inserted document.
    #[inline]
    pub fn add(&mut self, id: DocumentId, document: Document) {
        self.events.push(ChangeEvent::Added { id, document });
    }

    /// Adds a changed document.
    #[inline]
    pub fn change(&mut self, id: DocumentId, document: Document) {
        self.events.push(ChangeEvent::Changed { id, document });
    }

    /// Adds a removed identity.
    #[inline]
    pub fn remove(&mut self, id: DocumentId) {
        self.events.push(ChangeEvent::Removed { id });
    }

    /// Iterates over the events.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeEvent> {
        self.events.iter()
    }

    fn count(&self, pred: impl Fn(&ChangeEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl IntoIterator for ChangeSet {
    type Item = ChangeEvent;
    type IntoIter = std::vec::IntoIter<ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagg_core::doc;

    #[test]
    fn test_change_set_new() {
        let cs = ChangeSet::new(1);
        assert!(cs.is_empty());
        assert_eq!(cs.len(), 0);
        assert_eq!(cs.iteration, 1);
    }

    #[test]
    fn test_change_set_counts() {
        let mut cs = ChangeSet::new(2);
        cs.add(DocumentId::Int(1), doc! { "_id" => 1 });
        cs.change(DocumentId::Int(2), doc! { "_id" => 2 });
        cs.change(DocumentId::Int(3), doc! { "_id" => 3 });
        cs.remove(DocumentId::Int(4));

        assert_eq!(cs.len(), 4);
        assert_eq!(cs.added(), 1);
        assert_eq!(cs.changed(), 2);
        assert_eq!(cs.removed(), 1);
    }

    #[test]
    fn test_change_set_preserves_order() {
        let mut cs = ChangeSet::new(1);
        cs.add(DocumentId::from("b"), doc! { "_id" => "b" });
        cs.add(DocumentId::from("a"), doc! { "_id" => "a" });

        let ids: Vec<_> = cs.iter().map(|e| e.id().clone()).collect();
        assert_eq!(ids, vec![DocumentId::from("b"), DocumentId::from("a")]);
    }

    #[test]
    fn test_change_set_into_iter() {
        let mut cs = ChangeSet::new(1);
        cs.remove(DocumentId::Int(9));
        let events: Vec<_> = cs.into_iter().collect();
        assert_eq!(events, vec![ChangeEvent::Removed { id: DocumentId::Int(9) }]);
    }
}
