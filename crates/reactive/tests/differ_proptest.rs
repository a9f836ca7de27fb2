//! Property-based tests for the result differ using proptest.

use hashbrown::HashSet;
use proptest::prelude::*;
use reagg_core::{doc, Document, DocumentId};
use reagg_reactive::{diff, ChangeEvent, SessionState, Transforms};

fn documents(ids: &[i64]) -> Vec<Document> {
    ids.iter().map(|id| doc! { "_id" => *id, "v" => *id % 7 }).collect()
}

fn unique_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::hash_set(0i64..200, 0..60).prop_map(|set| set.into_iter().collect())
}

proptest! {
    /// Every fresh identity is added or changed exactly once; exactly the
    /// identities that disappeared are removed.
    #[test]
    fn diff_partitions_identities(before in unique_ids(), after in unique_ids()) {
        let transforms = Transforms::default();
        let mut state = SessionState::new();
        diff(&mut state, documents(&before), "_id", &transforms).unwrap();
        let changes = diff(&mut state, documents(&after), "_id", &transforms).unwrap();

        let before_set: HashSet<i64> = before.iter().copied().collect();
        let after_set: HashSet<i64> = after.iter().copied().collect();

        let mut published = Vec::new();
        let mut removed = HashSet::new();
        for event in changes.iter() {
            match event {
                ChangeEvent::Added { id: DocumentId::Int(i), .. } => {
                    prop_assert!(!before_set.contains(i));
                    published.push(*i);
                }
                ChangeEvent::Changed { id: DocumentId::Int(i), .. } => {
                    prop_assert!(before_set.contains(i));
                    published.push(*i);
                }
                ChangeEvent::Removed { id: DocumentId::Int(i) } => {
                    prop_assert!(removed.insert(*i));
                }
                other => prop_assert!(false, "unexpected event {:?}", other),
            }
        }

        prop_assert_eq!(published, after);
        let expected_removed: HashSet<i64> = before_set.difference(&after_set).copied().collect();
        prop_assert_eq!(removed, expected_removed);
        prop_assert_eq!(state.len(), after_set.len());
    }

    /// Re-diffing unchanged data only republishes changes.
    #[test]
    fn diff_is_idempotent(ids in unique_ids()) {
        let transforms = Transforms::default();
        let mut state = SessionState::new();
        diff(&mut state, documents(&ids), "_id", &transforms).unwrap();
        let changes = diff(&mut state, documents(&ids), "_id", &transforms).unwrap();

        prop_assert_eq!(changes.changed(), ids.len());
        prop_assert_eq!(changes.added(), 0);
        prop_assert_eq!(changes.removed(), 0);
        prop_assert_eq!(state.iteration(), 3);
    }

    /// Removals always come after every add and change.
    #[test]
    fn diff_removals_come_last(before in unique_ids(), after in unique_ids()) {
        let transforms = Transforms::default();
        let mut state = SessionState::new();
        diff(&mut state, documents(&before), "_id", &transforms).unwrap();
        let changes = diff(&mut state, documents(&after), "_id", &transforms).unwrap();

        let first_removal = changes
            .iter()
            .position(|e| matches!(e, ChangeEvent::Removed { .. }))
            .unwrap_or(changes.len());
        prop_assert!(changes.events[first_removal..]
            .iter()
            .all(|e| matches!(e, ChangeEvent::Removed { .. })),
            "removals must come after every add and change");
    }
}
