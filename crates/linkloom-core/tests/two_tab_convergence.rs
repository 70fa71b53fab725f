//! End-to-end convergence: two independent sync loops ("tabs") observing the
//! same identity and store must present identical working sets after every
//! mutation, including under duplicate feed delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use linkloom_core::config::CoreConfig;
use linkloom_core::identity::IdentityId;
use linkloom_core::memory_store::MemoryStore;
use linkloom_core::record::ChangeEvent;
use linkloom_core::runner::{self, SyncHandle};
use linkloom_core::session::SessionTracker;
use linkloom_core::store::{AuthProvider, RecordStore};
use linkloom_core::sync::{SyncPhase, SyncSnapshot};

const DEADLINE: Duration = Duration::from_secs(5);

struct Harness {
    store: MemoryStore,
    tracker: SessionTracker,
    tab_a: SyncHandle,
    tab_b: SyncHandle,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    store.register_user("google", "u1", "user@example.com");
    let auth: Arc<dyn AuthProvider> = Arc::new(store.clone());
    let records: Arc<dyn RecordStore> = Arc::new(store.clone());
    let config = CoreConfig::default();

    let tracker = SessionTracker::start(auth);
    let (tab_a, _) = runner::spawn(Arc::clone(&records), tracker.watch_identity(), &config);
    let (tab_b, _) = runner::spawn(records, tracker.watch_identity(), &config);
    Harness {
        store,
        tracker,
        tab_a,
        tab_b,
    }
}

async fn wait_both(h: &Harness, pred: impl Fn(&SyncSnapshot) -> bool + Copy) {
    timeout(DEADLINE, h.tab_a.wait_for(pred))
        .await
        .expect("tab A deadline")
        .expect("tab A alive");
    timeout(DEADLINE, h.tab_b.wait_for(pred))
        .await
        .expect("tab B deadline")
        .expect("tab B alive");
}

fn assert_converged(h: &Harness) {
    assert_eq!(h.tab_a.snapshot().records, h.tab_b.snapshot().records);
}

#[tokio::test]
async fn create_then_remove_converges_across_tabs() {
    let h = harness();

    h.tracker.begin_sign_in("google").await.unwrap();
    wait_both(&h, |s| s.phase == SyncPhase::Ready).await;
    assert!(h.tab_a.snapshot().records.is_empty());

    // Create in tab A; both tabs learn of it through the feed echo.
    h.tab_a.create("Example", "https://example.com").await.unwrap();
    wait_both(&h, |s| s.records.len() == 1).await;
    assert_converged(&h);
    let snapshot = h.tab_a.snapshot();
    assert_eq!(snapshot.records[0].title, "Example");
    assert_eq!(snapshot.records[0].target, "https://example.com");
    assert_eq!(snapshot.records[0].owner, IdentityId::new("u1"));

    // Remove from tab B; tab A follows via the feed.
    let id = snapshot.records[0].id.clone();
    h.tab_b.remove(id.clone()).await.unwrap();
    wait_both(&h, |s| s.records.is_empty()).await;
    assert_converged(&h);

    // A duplicate Deleted straggler changes nothing in either tab.
    h.store
        .emit(&IdentityId::new("u1"), ChangeEvent::Deleted(id));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.tab_a.snapshot().records.is_empty());
    assert!(h.tab_b.snapshot().records.is_empty());
}

#[tokio::test]
async fn duplicate_created_delivery_converges_to_one_record() {
    let h = harness();
    h.tracker.begin_sign_in("google").await.unwrap();
    wait_both(&h, |s| s.phase == SyncPhase::Ready).await;

    h.tab_a.create("Example", "https://example.com").await.unwrap();
    wait_both(&h, |s| s.records.len() == 1).await;
    let record = h.tab_a.snapshot().records[0].clone();

    // The store re-delivers the same commit; both tabs must no-op.
    h.store
        .emit(&IdentityId::new("u1"), ChangeEvent::Created(record));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tab_a.snapshot().records.len(), 1);
    assert_eq!(h.tab_b.snapshot().records.len(), 1);
    assert_converged(&h);
}

#[tokio::test]
async fn concurrent_creates_from_both_tabs_converge() {
    let h = harness();
    h.tracker.begin_sign_in("google").await.unwrap();
    wait_both(&h, |s| s.phase == SyncPhase::Ready).await;

    let (a, b) = tokio::join!(
        h.tab_a.create("From A", "https://a.example"),
        h.tab_b.create("From B", "https://b.example"),
    );
    a.unwrap();
    b.unwrap();

    wait_both(&h, |s| s.records.len() == 2).await;
    assert_converged(&h);
}
