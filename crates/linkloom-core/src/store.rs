//! Trait seams for the managed backing store.
//!
//! The engine never talks to a concrete backend directly: authentication and
//! record persistence sit behind [`AuthProvider`] and [`RecordStore`], and a
//! live change feed is handed out as a [`ChangeFeed`] the caller must close
//! on every exit path. The in-process reference implementation lives in
//! [`memory_store`](crate::memory_store); a production deployment would back
//! these traits with a hosted service client.
//!
//! Non-goals deliberately live on the far side of this seam: the
//! authentication handshake protocol, the store engine itself, and the push
//! transport (framing, reconnection) are all properties of the
//! implementation, not the engine.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::StoreError;
use crate::identity::{Identity, IdentityEvent, IdentityId};
use crate::record::{ChangeEvent, NewRecord, Record, RecordId};

/// Authentication surface of the managed store.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Initiate an external sign-in handshake with the named provider.
    ///
    /// Success here means the handshake *started*; the resulting identity
    /// (or a completion failure) arrives later on [`identity_events`].
    ///
    /// [`identity_events`]: AuthProvider::identity_events
    async fn begin_sign_in(&self, provider: &str) -> Result<(), StoreError>;

    /// Request termination of the current session. On success the provider
    /// emits an `Anonymous` transition on the event stream.
    async fn sign_out(&self) -> Result<(), StoreError>;

    /// Query the currently persisted session, if any.
    async fn current_session(&self) -> Result<Option<Identity>, StoreError>;

    /// Subscribe to identity transitions. Every subscriber sees transitions
    /// in the order they occur.
    fn identity_events(&self) -> broadcast::Receiver<IdentityEvent>;
}

/// Record persistence surface of the managed store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the complete current set of records owned by `owner`,
    /// newest first.
    async fn fetch_all(&self, owner: &IdentityId) -> Result<Vec<Record>, StoreError>;

    /// Persist a new record. The store assigns id and creation timestamp and
    /// echoes the committed row back on every live feed scoped to its owner.
    async fn insert(&self, record: NewRecord) -> Result<Record, StoreError>;

    /// Delete the record with this id. Deleting an absent id succeeds
    /// silently and emits no event.
    async fn delete(&self, id: &RecordId) -> Result<(), StoreError>;

    /// Open a live change feed scoped to exactly `owner`'s records.
    async fn subscribe(&self, owner: &IdentityId) -> Result<ChangeFeed, StoreError>;
}

/// A live change feed for one owner's records.
///
/// Exclusively owned by whoever opened it, and must be released on every
/// exit path from the owning identity session. [`close`](ChangeFeed::close)
/// is explicit, and dropping the feed closes it too. A leaked feed would
/// keep the producer alive and risk cross-identity event processing.
#[derive(Debug)]
pub struct ChangeFeed {
    events: mpsc::Receiver<ChangeEvent>,
    closer: Option<oneshot::Sender<()>>,
}

impl ChangeFeed {
    /// Package a feed from its event receiver and close signal. The producer
    /// side should stop forwarding when the close signal fires or its sender
    /// half is dropped.
    #[must_use]
    pub fn new(events: mpsc::Receiver<ChangeEvent>, closer: oneshot::Sender<()>) -> Self {
        Self {
            events,
            closer: Some(closer),
        }
    }

    /// Receive the next event, or `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Signal the producer to stop. Events already queued are discarded by
    /// the caller simply not polling further; epoch tagging upstream guards
    /// against any straggler being applied.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            // Receiver side may already be gone; either way the feed is dead.
            let _ = closer.send(());
        }
        self.events.close();
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.close();
    }
}
