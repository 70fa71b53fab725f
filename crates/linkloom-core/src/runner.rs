//! Async driver for the collection synchronizer.
//!
//! One task owns the [`CollectionSynchronizer`] and funnels identity
//! transitions, feed events, bulk-load completions, and boundary mutation
//! intents through one `select!` loop. Nothing else mutates the working set.
//!
//! The loop owns the active [`ChangeFeed`] for exactly one identity session
//! and closes it on every exit path (identity replacement, sign-out,
//! teardown) before the synchronizer clears the set. Bulk loads and
//! submissions run as spawned tasks whose completions come back through the
//! same queue; loads are epoch-tagged so a straggler from a superseded
//! session is discarded, not applied.
//!
//! The boundary talks to the loop through a [`SyncHandle`]: mutation intents
//! go in, and a watch channel of [`SyncSnapshot`]s (the single render input)
//! comes out.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::error::{Error, Result, StoreError};
use crate::identity::IdentityState;
use crate::record::{Record, RecordId};
use crate::store::{ChangeFeed, RecordStore};
use crate::sync::{CollectionSynchronizer, SyncSnapshot};

/// Boundary mutation intents.
enum Command {
    Create {
        title: String,
        target: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Completions of spawned store interactions, re-queued into the loop.
enum Completion {
    LoadFinished {
        epoch: u64,
        result: std::result::Result<Vec<Record>, StoreError>,
    },
    CreateFinished {
        result: std::result::Result<Record, StoreError>,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveFinished {
        id: RecordId,
        result: std::result::Result<(), StoreError>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle through which the boundary drives one sync loop.
///
/// Dropping every clone of the handle tears the loop down (which closes the
/// live feed before exiting).
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    /// Submit a create intent. Validation happens before any store
    /// interaction; the new record appears in snapshots via the feed echo,
    /// not from this call.
    pub async fn create(&self, title: &str, target: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Create {
                title: title.to_string(),
                target: target.to_string(),
                reply,
            })
            .await
            .map_err(|_| loop_gone())?;
        response.await.map_err(|_| loop_gone())?
    }

    /// Submit a delete intent. The record is optimistically spliced out of
    /// the snapshot immediately; a store rejection is surfaced but the
    /// splice is not rolled back.
    pub async fn remove(&self, id: RecordId) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Remove { id, reply })
            .await
            .map_err(|_| loop_gone())?;
        response.await.map_err(|_| loop_gone())?
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch snapshot updates directly.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `pred`. Errors if the loop exits
    /// first.
    pub async fn wait_for(&self, pred: impl Fn(&SyncSnapshot) -> bool) -> Result<()> {
        let mut snapshots = self.snapshots.clone();
        loop {
            if pred(&snapshots.borrow_and_update()) {
                return Ok(());
            }
            snapshots.changed().await.map_err(|_| loop_gone())?;
        }
    }
}

fn loop_gone() -> Error {
    Error::Runtime("sync loop terminated".to_string())
}

/// Spawn a sync loop bound to one identity observer.
///
/// Each call is one "tab": independent loops observing the same tracker and
/// store converge on identical snapshots through the shared change feed.
pub fn spawn(
    store: Arc<dyn RecordStore>,
    identity: watch::Receiver<IdentityState>,
    config: &CoreConfig,
) -> (SyncHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
    let (snapshots_tx, snapshots_rx) = watch::channel(SyncSnapshot::default());
    let completion_capacity = config.completion_capacity;
    let task = tokio::spawn(run_loop(
        store,
        identity,
        commands_rx,
        snapshots_tx,
        completion_capacity,
    ));
    (
        SyncHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        },
        task,
    )
}

async fn run_loop(
    store: Arc<dyn RecordStore>,
    mut identity: watch::Receiver<IdentityState>,
    mut commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<SyncSnapshot>,
    completion_capacity: usize,
) {
    let (completions_tx, mut completions) = mpsc::channel(completion_capacity);
    let mut driver = Driver {
        store,
        sync: CollectionSynchronizer::new(),
        feed: None,
        feed_epoch: 0,
        completions: completions_tx,
        snapshots,
    };

    // The tracker may have resolved before this loop started; apply whatever
    // state is already current.
    let initial = identity.borrow_and_update().clone();
    driver.handle_transition(&initial).await;

    loop {
        tokio::select! {
            changed = identity.changed() => {
                if changed.is_err() {
                    // Tracker gone: treat as teardown.
                    break;
                }
                let state = identity.borrow_and_update().clone();
                driver.handle_transition(&state).await;
            }
            event = next_feed_event(&mut driver.feed), if driver.feed.is_some() => {
                match event {
                    Some(event) => {
                        if driver.sync.feed_event(driver.feed_epoch, &event) {
                            driver.publish();
                        }
                    }
                    None => {
                        warn!("change feed ended while its identity is active");
                        driver.feed = None;
                    }
                }
            }
            Some(completion) = completions.recv() => {
                driver.handle_completion(completion);
            }
            command = commands.recv() => {
                match command {
                    Some(command) => driver.handle_command(command),
                    None => break,
                }
            }
        }
    }

    driver.close_feed();
}

async fn next_feed_event(feed: &mut Option<ChangeFeed>) -> Option<crate::record::ChangeEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

struct Driver {
    store: Arc<dyn RecordStore>,
    sync: CollectionSynchronizer,
    feed: Option<ChangeFeed>,
    feed_epoch: u64,
    completions: mpsc::Sender<Completion>,
    snapshots: watch::Sender<SyncSnapshot>,
}

impl Driver {
    async fn handle_transition(&mut self, state: &IdentityState) {
        // Close the old feed before the synchronizer clears the set, so no
        // event can be processed against a set already considered stale.
        self.close_feed();
        if let Some(request) = self.sync.identity_changed(state) {
            debug!(
                identity_id = %request.identity.id,
                epoch = request.epoch,
                "identity active; subscribing and loading"
            );
            // Subscribe before the bulk fetch: a commit landing between the
            // two then reaches the set through the feed echo instead of
            // falling into the gap.
            match self.store.subscribe(&request.identity.id).await {
                Ok(feed) => {
                    self.feed_epoch = request.epoch;
                    self.feed = Some(feed);
                    let store = Arc::clone(&self.store);
                    let completions = self.completions.clone();
                    let owner = request.identity.id.clone();
                    let epoch = request.epoch;
                    tokio::spawn(async move {
                        let result = store.fetch_all(&owner).await;
                        let _ = completions
                            .send(Completion::LoadFinished { epoch, result })
                            .await;
                    });
                }
                Err(err) => {
                    // Without a feed the session could never stay in sync, so
                    // this parks in Failed like a fetch failure; identity
                    // re-delivery retries both the feed and the load.
                    if let Err(err) = self.sync.load_finished(request.epoch, Err(err)) {
                        warn!(
                            identity_id = %request.identity.id,
                            epoch = request.epoch,
                            error = %err,
                            "change feed subscription failed; keeping prior working set"
                        );
                    }
                }
            }
        }
        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create {
                title,
                target,
                reply,
            } => match self.sync.prepare_create(&title, &target) {
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
                Ok(draft) => {
                    self.publish();
                    let store = Arc::clone(&self.store);
                    let completions = self.completions.clone();
                    tokio::spawn(async move {
                        let result = store.insert(draft).await;
                        let _ = completions
                            .send(Completion::CreateFinished { result, reply })
                            .await;
                    });
                }
            },
            Command::Remove { id, reply } => {
                if self.sync.optimistic_remove(&id) {
                    self.publish();
                }
                let store = Arc::clone(&self.store);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = store.delete(&id).await;
                    let _ = completions
                        .send(Completion::RemoveFinished { id, result, reply })
                        .await;
                });
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::LoadFinished { epoch, result } => {
                if let Err(err) = self.sync.load_finished(epoch, result) {
                    warn!(epoch, error = %err, "bulk load failed; keeping prior working set");
                }
                self.publish();
            }
            Completion::CreateFinished { result, reply } => {
                self.sync.submission_finished();
                let outcome = match result {
                    Ok(record) => {
                        debug!(record_id = %record.id, "create committed; feed echo will insert it");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(error = %err, "create rejected by store");
                        Err(Error::Submit(err))
                    }
                };
                self.publish();
                let _ = reply.send(outcome);
            }
            Completion::RemoveFinished { id, result, reply } => {
                let outcome = match result {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // Documented limitation: the optimistic splice is not
                        // rolled back; the failure is surfaced instead.
                        warn!(record_id = %id, error = %err, "delete rejected by store after optimistic removal");
                        Err(Error::Submit(err))
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }

    fn close_feed(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.close();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.sync.snapshot());
    }
}
