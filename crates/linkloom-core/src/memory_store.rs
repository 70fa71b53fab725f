//! In-process reference implementation of the backing-store seams.
//!
//! `MemoryStore` implements both [`AuthProvider`] and [`RecordStore`] over
//! mutex-guarded tables with a broadcast fan-out for change events, so every
//! live feed opened against the same store observes the same committed
//! sequence. That is what lets two independent sync runners ("tabs")
//! converge in tests and in the CLI demo.
//!
//! The auth side is scriptable: [`MemoryStore::register_user`] decides which
//! provider names complete a handshake, and fault switches
//! ([`MemoryStore::set_fail_fetch`] and friends) inject the failure classes
//! the engine must survive. [`MemoryStore::emit`] injects raw feed events
//! for duplicate- and late-delivery drills.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::identity::{Identity, IdentityEvent, IdentityId, IdentityState};
use crate::record::{ChangeEvent, NewRecord, Record, RecordId};
use crate::store::{AuthProvider, ChangeFeed, RecordStore};

const EVENT_FANOUT_CAPACITY: usize = 256;
const FEED_BUFFER_CAPACITY: usize = 64;

/// A change event paired with the owner it concerns, for per-feed filtering.
#[derive(Debug, Clone)]
struct OwnedEvent {
    owner: IdentityId,
    event: ChangeEvent,
}

#[derive(Debug, Default)]
struct FaultSwitches {
    sign_in: AtomicBool,
    sign_out: AtomicBool,
    fetch: AtomicBool,
    insert: AtomicBool,
    delete: AtomicBool,
    subscribe: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    /// Provider name → identity that a handshake with it resolves to.
    directory: Mutex<HashMap<String, Identity>>,
    session: Mutex<Option<Identity>>,
    records: Mutex<Vec<Record>>,
    next_id: AtomicU64,
    record_events: broadcast::Sender<OwnedEvent>,
    identity_events: broadcast::Sender<IdentityEvent>,
    faults: FaultSwitches,
    /// Artificial latency for bulk fetch responses, in milliseconds. Applied
    /// after the table read, so tests can commit records while a snapshot is
    /// in transit or straddle identity transitions.
    fetch_delay_ms: AtomicU64,
}

/// Shared in-memory store. Cloning yields another handle to the same tables
/// and fan-out, so one instance can serve auth, records, and several feeds.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with no session and no registered providers.
    #[must_use]
    pub fn new() -> Self {
        let (record_events, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        let (identity_events, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                directory: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
                records: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                record_events,
                identity_events,
                faults: FaultSwitches::default(),
                fetch_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Script the handshake outcome: sign-ins through `provider` resolve to
    /// this identity. Unregistered providers reject the handshake after it
    /// starts (a completion failure, not an initiation failure).
    pub fn register_user(&self, provider: &str, id: &str, label: &str) {
        self.inner
            .directory
            .lock()
            .expect("directory lock")
            .insert(provider.to_string(), Identity::new(id, label));
    }

    /// Establish a session directly and notify identity observers. Also the
    /// re-delivery path: calling this with the already-active identity
    /// models a reconnect.
    pub fn sign_in_as(&self, identity: Identity) {
        *self.inner.session.lock().expect("session lock") = Some(identity.clone());
        let _ = self
            .inner
            .identity_events
            .send(IdentityEvent::Changed(IdentityState::SignedIn(identity)));
    }

    /// Drop the session as if it expired externally.
    pub fn expire_session(&self) {
        *self.inner.session.lock().expect("session lock") = None;
        let _ = self
            .inner
            .identity_events
            .send(IdentityEvent::Changed(IdentityState::Anonymous));
    }

    /// Insert a pre-existing record without emitting a feed event, as if it
    /// were committed before any feed was opened.
    pub fn seed_record(
        &self,
        owner: &IdentityId,
        title: &str,
        target: &str,
        created_at: DateTime<Utc>,
    ) -> Record {
        let record = Record {
            id: self.allocate_id(),
            owner: owner.clone(),
            title: title.to_string(),
            target: target.to_string(),
            created_at,
        };
        self.inner
            .records
            .lock()
            .expect("records lock")
            .push(record.clone());
        record
    }

    /// Publish a raw feed event to every subscriber for `owner`, without
    /// touching the tables. Duplicate- and late-delivery drills use this.
    pub fn emit(&self, owner: &IdentityId, event: ChangeEvent) {
        let _ = self.inner.record_events.send(OwnedEvent {
            owner: owner.clone(),
            event,
        });
    }

    /// Make `begin_sign_in` fail before the handshake starts.
    pub fn set_fail_sign_in(&self, fail: bool) {
        self.inner.faults.sign_in.store(fail, Ordering::SeqCst);
    }

    /// Make `sign_out` fail without dropping the session.
    pub fn set_fail_sign_out(&self, fail: bool) {
        self.inner.faults.sign_out.store(fail, Ordering::SeqCst);
    }

    /// Make bulk fetches fail with a transport error.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.inner.faults.fetch.store(fail, Ordering::SeqCst);
    }

    /// Make inserts fail as store rejections.
    pub fn set_fail_insert(&self, fail: bool) {
        self.inner.faults.insert.store(fail, Ordering::SeqCst);
    }

    /// Make deletes fail as store rejections.
    pub fn set_fail_delete(&self, fail: bool) {
        self.inner.faults.delete.store(fail, Ordering::SeqCst);
    }

    /// Make feed subscriptions fail with a transport error.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.faults.subscribe.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent bulk fetch response by `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.inner
            .fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn allocate_id(&self) -> RecordId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        // Zero-padded hex keeps lexicographic order aligned with allocation
        // order, which the fetch sort uses as a timestamp tie-break.
        RecordId::new(format!("rec-{n:06x}"))
    }
}

#[async_trait]
impl AuthProvider for MemoryStore {
    async fn begin_sign_in(&self, provider: &str) -> Result<(), StoreError> {
        if self.inner.faults.sign_in.load(Ordering::SeqCst) {
            return Err(StoreError::Transport(
                "sign-in handshake could not start".to_string(),
            ));
        }
        let resolved = self
            .inner
            .directory
            .lock()
            .expect("directory lock")
            .get(provider)
            .cloned();
        match resolved {
            Some(identity) => {
                debug!(provider, identity_id = %identity.id, "handshake completed");
                self.sign_in_as(identity);
            }
            None => {
                // Handshake started, provider rejected it: surfaces on the
                // event stream only, never as an initiation error.
                let _ = self.inner.identity_events.send(IdentityEvent::SignInFailed {
                    reason: format!("provider {provider} rejected the handshake"),
                });
            }
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        if self.inner.faults.sign_out.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("sign-out rejected".to_string()));
        }
        self.expire_session();
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Identity>, StoreError> {
        Ok(self.inner.session.lock().expect("session lock").clone())
    }

    fn identity_events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.inner.identity_events.subscribe()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch_all(&self, owner: &IdentityId) -> Result<Vec<Record>, StoreError> {
        if self.inner.faults.fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("record fetch unavailable".to_string()));
        }
        let mut records: Vec<Record> = self
            .inner
            .records
            .lock()
            .expect("records lock")
            .iter()
            .filter(|record| &record.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_str().cmp(a.id.as_str()))
        });
        // Delay after the read: the snapshot in transit goes stale against
        // anything committed meanwhile, as it would over a real network.
        let delay_ms = self.inner.fetch_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(records)
    }

    async fn insert(&self, record: NewRecord) -> Result<Record, StoreError> {
        if self.inner.faults.insert.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(
                "insert rejected by row policy".to_string(),
            ));
        }
        let committed = Record {
            id: self.allocate_id(),
            owner: record.owner,
            title: record.title,
            target: record.target,
            created_at: Utc::now(),
        };
        self.inner
            .records
            .lock()
            .expect("records lock")
            .push(committed.clone());
        let owner = committed.owner.clone();
        self.emit(&owner, ChangeEvent::Created(committed.clone()));
        Ok(committed)
    }

    async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
        if self.inner.faults.delete.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(
                "delete rejected by row policy".to_string(),
            ));
        }
        let removed = {
            let mut records = self.inner.records.lock().expect("records lock");
            let before = records.len();
            let owner = records
                .iter()
                .find(|record| &record.id == id)
                .map(|record| record.owner.clone());
            records.retain(|record| &record.id != id);
            owner.filter(|_| records.len() != before)
        };
        if let Some(owner) = removed {
            self.emit(&owner, ChangeEvent::Deleted(id.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, owner: &IdentityId) -> Result<ChangeFeed, StoreError> {
        if self.inner.faults.subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Transport(
                "change feed unavailable".to_string(),
            ));
        }
        let mut fanout = self.inner.record_events.subscribe();
        let (tx, rx) = mpsc::channel(FEED_BUFFER_CAPACITY);
        let (close_tx, mut close_rx) = oneshot::channel();
        let owner = owner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => break,
                    received = fanout.recv() => match received {
                        Ok(owned) if owned.owner == owner => {
                            if tx.send(owned.event).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, %owner, "change feed lagged; events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(ChangeFeed::new(rx, close_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(200);

    fn owner(id: &str) -> IdentityId {
        IdentityId::new(id)
    }

    #[tokio::test]
    async fn insert_reaches_matching_feed_only() {
        let store = MemoryStore::new();
        let mut mine = store.subscribe(&owner("u1")).await.unwrap();
        let mut theirs = store.subscribe(&owner("u2")).await.unwrap();

        store
            .insert(NewRecord {
                owner: owner("u1"),
                title: "Example".to_string(),
                target: "https://example.com".to_string(),
            })
            .await
            .unwrap();

        let event = timeout(TICK, mine.recv()).await.unwrap().unwrap();
        match event {
            ChangeEvent::Created(record) => assert_eq!(record.owner, owner("u1")),
            ChangeEvent::Deleted(_) => panic!("expected created event"),
        }
        assert!(timeout(Duration::from_millis(50), theirs.recv()).await.is_err());
    }

    #[tokio::test]
    async fn delete_emits_only_when_a_row_was_removed() {
        let store = MemoryStore::new();
        let record = store.seed_record(
            &owner("u1"),
            "Example",
            "https://example.com",
            Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
        );
        let mut feed = store.subscribe(&owner("u1")).await.unwrap();

        store.delete(&RecordId::new("missing")).await.unwrap();
        store.delete(&record.id).await.unwrap();

        let event = timeout(TICK, feed.recv()).await.unwrap().unwrap();
        assert_eq!(event, ChangeEvent::Deleted(record.id));
        assert!(timeout(Duration::from_millis(50), feed.recv()).await.is_err());
    }

    #[tokio::test]
    async fn fetch_all_is_newest_first_and_owner_scoped() {
        let store = MemoryStore::new();
        let at = |minute| Utc.with_ymd_and_hms(2026, 1, 15, 12, minute, 0).unwrap();
        store.seed_record(&owner("u1"), "old", "https://a", at(0));
        store.seed_record(&owner("u2"), "other", "https://b", at(1));
        store.seed_record(&owner("u1"), "new", "https://c", at(2));

        let records = store.fetch_all(&owner("u1")).await.unwrap();
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["new", "old"]);
    }

    #[tokio::test]
    async fn handshake_with_unregistered_provider_is_completion_failure() {
        let store = MemoryStore::new();
        let mut events = store.identity_events();

        store.begin_sign_in("nope").await.unwrap();

        match events.recv().await.unwrap() {
            IdentityEvent::SignInFailed { reason } => assert!(reason.contains("nope")),
            IdentityEvent::Changed(_) => panic!("expected a completion failure"),
        }
        assert!(store.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handshake_with_registered_provider_signs_in() {
        let store = MemoryStore::new();
        store.register_user("google", "u1", "user@example.com");
        let mut events = store.identity_events();

        store.begin_sign_in("google").await.unwrap();

        match events.recv().await.unwrap() {
            IdentityEvent::Changed(IdentityState::SignedIn(identity)) => {
                assert_eq!(identity.id.as_str(), "u1");
            }
            other => panic!("expected sign-in, got {other:?}"),
        }
        assert!(store.current_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn initiation_fault_is_an_error_not_an_event() {
        let store = MemoryStore::new();
        store.register_user("google", "u1", "user@example.com");
        store.set_fail_sign_in(true);
        let mut events = store.identity_events();

        assert!(store.begin_sign_in("google").await.is_err());
        assert!(timeout(Duration::from_millis(50), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn closed_feed_stops_delivery() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe(&owner("u1")).await.unwrap();
        feed.close();

        store
            .insert(NewRecord {
                owner: owner("u1"),
                title: "late".to_string(),
                target: "https://example.com".to_string(),
            })
            .await
            .unwrap();

        assert!(timeout(TICK, feed.recv()).await.unwrap().is_none());
    }
}
