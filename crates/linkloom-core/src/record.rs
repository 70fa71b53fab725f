//! Saved-link records and the change events that describe their lifecycle.
//!
//! A [`Record`] is one saved link: id and creation timestamp are assigned by
//! the backing store and immutable thereafter. [`ChangeEvent`] is the wire
//! shape delivered by a live change feed scoped to one owner's records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityId;

/// Opaque unique identifier for a record, assigned by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Construct from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One saved link, as persisted by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned unique id, immutable after creation.
    pub id: RecordId,
    /// The identity that owns this record.
    pub owner: IdentityId,
    /// Non-empty display title.
    pub title: String,
    /// Non-empty link target. Expected to be a URL but not validated
    /// beyond non-emptiness.
    pub target: String,
    /// Store-assigned creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields the caller supplies when creating a record. Id and timestamp are
/// filled in by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// The identity the record will belong to.
    pub owner: IdentityId,
    /// Display title, already trimmed and validated non-empty.
    pub title: String,
    /// Link target, already trimmed and validated non-empty.
    pub target: String,
}

/// A change-feed notification for one owner's records.
///
/// Delivery may be duplicated or race with a locally-submitted request's
/// completion, so consumers must apply these idempotently (see
/// [`WorkingSet::apply`](crate::working_set::WorkingSet::apply)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A record was committed to the store.
    Created(Record),
    /// A record was deleted from the store.
    Deleted(RecordId),
}

impl ChangeEvent {
    /// The id of the record this event concerns.
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Created(record) => &record.id,
            Self::Deleted(id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> Record {
        Record {
            id: RecordId::new("r1"),
            owner: IdentityId::new("u1"),
            title: "Example".to_string(),
            target: "https://example.com".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn change_event_wire_shape_created() {
        let json = serde_json::to_value(ChangeEvent::Created(sample_record())).unwrap();
        assert_eq!(json["kind"], "created");
        assert_eq!(json["payload"]["id"], "r1");
        assert_eq!(json["payload"]["owner"], "u1");
        assert_eq!(json["payload"]["title"], "Example");
    }

    #[test]
    fn change_event_wire_shape_deleted() {
        let json = serde_json::to_value(ChangeEvent::Deleted(RecordId::new("r9"))).unwrap();
        assert_eq!(json["kind"], "deleted");
        assert_eq!(json["payload"], "r9");
    }

    #[test]
    fn change_event_record_id() {
        assert_eq!(
            ChangeEvent::Created(sample_record()).record_id().as_str(),
            "r1"
        );
        assert_eq!(
            ChangeEvent::Deleted(RecordId::new("r2")).record_id().as_str(),
            "r2"
        );
    }
}
