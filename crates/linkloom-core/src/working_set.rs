//! The in-memory ordered collection of one identity's records.
//!
//! [`WorkingSet`] is the single render input for the boundary: an ordered
//! sequence of records, newest first, with unique ids. All feed-event
//! handling funnels through the pure reducer [`WorkingSet::apply`], which is
//! idempotent against duplicate or late delivery: replaying any event
//! sequence twice produces the same set as replaying it once.
//!
//! Invariants:
//!
//! * no two records share an id
//! * order is maintained as insertions occur, never lazily re-sorted
//! * the set is empty whenever no identity is active (enforced by the
//!   synchronizer discarding it wholesale on identity transitions)

use std::collections::HashSet;

use crate::record::{ChangeEvent, Record, RecordId};

/// Ordered, duplicate-free collection of records, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    records: Vec<Record>,
}

impl WorkingSet {
    /// Create an empty working set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in presentation order (newest first).
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Whether a record with this id is present.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.iter().any(|record| &record.id == id)
    }

    /// Replace the entire set with a freshly loaded batch.
    ///
    /// Idempotent: loading the same batch twice yields the same set, not an
    /// appended one. The batch is sorted newest-first here so the ordering
    /// invariant holds even if the store returns rows unordered; ties break
    /// on id for determinism.
    pub fn replace_all(&mut self, mut records: Vec<Record>) {
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_str().cmp(a.id.as_str()))
        });
        // Keep the first (newest) row per id. Duplicate ids may sort apart
        // when their timestamps differ, so adjacency-based dedup is not
        // enough.
        let mut seen = HashSet::new();
        records.retain(|record| seen.insert(record.id.clone()));
        self.records = records;
    }

    /// Apply one change event. Returns `true` if the set changed.
    ///
    /// * `Created` front-inserts (live inserts are assumed newer than every
    ///   existing entry) unless the id is already present, so duplicate
    ///   delivery and local-echo races are no-ops.
    /// * `Deleted` removes the matching record if present; a no-op when the
    ///   record was already removed by another path (optimistic local
    ///   splice, duplicate delivery).
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Created(record) => {
                if self.contains(&record.id) {
                    return false;
                }
                self.records.insert(0, record.clone());
                true
            }
            ChangeEvent::Deleted(id) => {
                let before = self.records.len();
                self.records.retain(|record| &record.id != id);
                self.records.len() != before
            }
        }
    }

    /// Drop every record. Used on identity transitions.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityId;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn record(id: &str, minute: u32) -> Record {
        Record {
            id: RecordId::new(id),
            owner: IdentityId::new("u1"),
            title: format!("title-{id}"),
            target: format!("https://example.com/{id}"),
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn created_inserts_at_front() {
        let mut set = WorkingSet::new();
        assert!(set.apply(&ChangeEvent::Created(record("r1", 0))));
        assert!(set.apply(&ChangeEvent::Created(record("r2", 1))));
        let ids: Vec<&str> = set.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["r2", "r1"]);
    }

    #[test]
    fn duplicate_created_is_noop() {
        let mut set = WorkingSet::new();
        assert!(set.apply(&ChangeEvent::Created(record("r1", 0))));
        assert!(!set.apply(&ChangeEvent::Created(record("r1", 0))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deleted_removes_matching_record() {
        let mut set = WorkingSet::new();
        set.apply(&ChangeEvent::Created(record("r1", 0)));
        set.apply(&ChangeEvent::Created(record("r2", 1)));
        assert!(set.apply(&ChangeEvent::Deleted(RecordId::new("r1"))));
        assert!(!set.contains(&RecordId::new("r1")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deleted_absent_is_noop() {
        let mut set = WorkingSet::new();
        set.apply(&ChangeEvent::Created(record("r1", 0)));
        assert!(!set.apply(&ChangeEvent::Deleted(RecordId::new("missing"))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn replace_all_sorts_newest_first() {
        let mut set = WorkingSet::new();
        set.replace_all(vec![record("old", 0), record("new", 2), record("mid", 1)]);
        let ids: Vec<&str> = set.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[test]
    fn replace_all_dedups_by_id_across_differing_timestamps() {
        let mut set = WorkingSet::new();
        let mut stale = record("r1", 0);
        stale.title = "stale".to_string();
        set.replace_all(vec![stale, record("other", 1), record("r1", 2)]);
        assert_eq!(set.len(), 2);
        // The newest row per id wins.
        assert_eq!(set.records()[0].id.as_str(), "r1");
        assert_eq!(set.records()[0].title, "title-r1");
    }

    #[test]
    fn replace_all_is_full_replacement() {
        let mut set = WorkingSet::new();
        set.replace_all(vec![record("r1", 0), record("r2", 1)]);
        set.replace_all(vec![record("r1", 0), record("r2", 1)]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut set = WorkingSet::new();
        set.apply(&ChangeEvent::Created(record("r1", 0)));
        set.clear();
        assert!(set.is_empty());
    }

    // Strategy: small event alphabet over a handful of record ids so that
    // duplicates and delete-before-create interleavings actually occur.
    fn event_strategy() -> impl Strategy<Value = ChangeEvent> {
        (0u32..5, prop::bool::ANY).prop_map(|(n, is_create)| {
            let id = format!("r{n}");
            if is_create {
                ChangeEvent::Created(record(&id, n))
            } else {
                ChangeEvent::Deleted(RecordId::new(id))
            }
        })
    }

    proptest! {
        #[test]
        fn duplicated_replay_converges(events in prop::collection::vec(event_strategy(), 0..24)) {
            let mut once = WorkingSet::new();
            for event in &events {
                once.apply(event);
            }

            // Replay the whole sequence a second time. Membership must be
            // unchanged; a record deleted-and-recreated mid-replay may move
            // to the front, so presentation order is not part of this
            // property.
            let mut twice = once.clone();
            for event in &events {
                twice.apply(event);
            }

            let sorted = |set: &WorkingSet| {
                let mut records = set.records().to_vec();
                records.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
                records
            };
            prop_assert_eq!(sorted(&once), sorted(&twice));
        }

        #[test]
        fn per_event_duplication_converges(events in prop::collection::vec(event_strategy(), 0..24)) {
            let mut single = WorkingSet::new();
            let mut doubled = WorkingSet::new();
            for event in &events {
                single.apply(event);
                doubled.apply(event);
                doubled.apply(event);
            }
            prop_assert_eq!(single, doubled);
        }

        #[test]
        fn ids_stay_unique(events in prop::collection::vec(event_strategy(), 0..32)) {
            let mut set = WorkingSet::new();
            for event in &events {
                set.apply(event);
            }
            let mut ids: Vec<&str> = set.records().iter().map(|r| r.id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), set.len());
        }
    }
}
