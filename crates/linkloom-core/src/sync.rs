//! Collection synchronizer state machine.
//!
//! [`CollectionSynchronizer`] is the sequential core of the engine: it owns
//! the working set for the active identity and decides, for every input
//! (identity transition, bulk-load completion, feed event, mutation intent),
//! how the set changes. It performs no I/O itself; the async driver in
//! [`runner`](crate::runner) feeds it and executes the [`LoadRequest`]s it
//! hands back, which keeps every transition unit-testable without a network
//! in sight.
//!
//! Per-identity phases:
//!
//! ```text
//! NoIdentity → Loading → Ready
//!                  ↓
//!               Failed        (exit: the identity is delivered again)
//! ```
//!
//! Any phase returns to `NoIdentity` the moment identity is lost; the driver
//! closes the live feed before this transition clears the set.
//!
//! Every transition bumps an epoch. In-flight loads and feed subscriptions
//! carry the epoch they were issued under, and results tagged with a stale
//! epoch are discarded instead of applied. That is the whole cancellation
//! story for mid-flight identity switches.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result, StoreError, ValidationError};
use crate::identity::{Identity, IdentityState};
use crate::record::{ChangeEvent, NewRecord, Record, RecordId};
use crate::working_set::WorkingSet;

/// Phase of the per-identity load cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No identity is active; the working set is empty.
    #[default]
    NoIdentity,
    /// An identity is active and its bulk load is in flight.
    Loading,
    /// The bulk load landed; the set tracks live feed events.
    Ready,
    /// The bulk load failed. Only a fresh identity delivery retries.
    Failed,
}

/// Instruction to the driver: issue a bulk load for this identity, and tag
/// the eventual result with this epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Epoch the load is issued under.
    pub epoch: u64,
    /// Identity whose records to fetch.
    pub identity: Identity,
}

/// Immutable view of the synchronizer for rendering: the single render input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Current phase.
    pub phase: SyncPhase,
    /// Records in presentation order, newest first.
    pub records: Vec<Record>,
    /// Whether any create submission is outstanding. Purely a UI affordance
    /// for debouncing rapid-fire submits; it is not an exclusion lock.
    pub submitting: bool,
}

/// Sequential state machine owning the working set for the active identity.
#[derive(Debug, Default)]
pub struct CollectionSynchronizer {
    phase: SyncPhase,
    epoch: u64,
    active: Option<Identity>,
    working: WorkingSet,
    /// Feed events accepted while the bulk load is in flight. The fetch
    /// snapshot predates these commits, so they are replayed over the
    /// replacement set once the load lands.
    buffered: Vec<ChangeEvent>,
    pending_submissions: usize,
}

impl CollectionSynchronizer {
    /// Create a synchronizer with no identity and an empty working set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Epoch of the current identity session.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The identity whose records the working set holds, if any.
    #[must_use]
    pub fn active_identity(&self) -> Option<&Identity> {
        self.active.as_ref()
    }

    /// The working set, newest first.
    #[must_use]
    pub fn working_set(&self) -> &WorkingSet {
        &self.working
    }

    /// Whether any create submission is outstanding.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.pending_submissions > 0
    }

    /// Apply an identity transition. Bumps the epoch (invalidating all
    /// in-flight work) and returns the bulk load to issue, if any.
    ///
    /// Re-delivery of the already-active identity is the retry/reconnect
    /// path: it reloads without clearing first, so a subsequent fetch
    /// failure cannot silently empty a set that was already on screen.
    /// Switching to a different identity (or to none) discards the set
    /// wholesale; the set must never hold another identity's records.
    pub fn identity_changed(&mut self, state: &IdentityState) -> Option<LoadRequest> {
        self.epoch += 1;
        self.buffered.clear();
        match state {
            IdentityState::Unknown | IdentityState::Anonymous => {
                self.active = None;
                self.working.clear();
                self.phase = SyncPhase::NoIdentity;
                None
            }
            IdentityState::SignedIn(identity) => {
                let same = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.id == identity.id);
                if !same {
                    self.working.clear();
                }
                self.active = Some(identity.clone());
                self.phase = SyncPhase::Loading;
                Some(LoadRequest {
                    epoch: self.epoch,
                    identity: identity.clone(),
                })
            }
        }
    }

    /// Apply a bulk-load completion. A result tagged with a stale epoch is
    /// discarded without touching the working set. On success the set is
    /// replaced wholesale and any feed events accepted mid-load are replayed
    /// over the replacement, since the fetch snapshot predates their
    /// commits. On failure the set keeps its prior value and the error is
    /// returned for the boundary to surface.
    pub fn load_finished(
        &mut self,
        epoch: u64,
        result: std::result::Result<Vec<Record>, StoreError>,
    ) -> Result<()> {
        if epoch != self.epoch {
            debug!(
                stale_epoch = epoch,
                current_epoch = self.epoch,
                "discarding load result for a superseded identity session"
            );
            return Ok(());
        }
        match result {
            Ok(records) => {
                self.working.replace_all(records);
                for event in self.buffered.drain(..) {
                    self.working.apply(&event);
                }
                self.phase = SyncPhase::Ready;
                Ok(())
            }
            Err(err) => {
                // Events accepted mid-load were already applied to the prior
                // set, which is the set being kept.
                self.buffered.clear();
                self.phase = SyncPhase::Failed;
                Err(Error::Fetch(err))
            }
        }
    }

    /// Apply a live feed event. Returns `true` if the working set changed.
    ///
    /// Stale-epoch events are discarded, as is anything arriving while no
    /// identity is active, and any `Created` whose owner does not match the
    /// active identity (the feed is supposed to be owner-scoped, but the
    /// ownership invariant is enforced here regardless). An event accepted
    /// while the bulk load is still in flight is applied immediately and
    /// also buffered, so the load result cannot erase it.
    pub fn feed_event(&mut self, epoch: u64, event: &ChangeEvent) -> bool {
        if epoch != self.epoch {
            debug!(
                stale_epoch = epoch,
                current_epoch = self.epoch,
                record_id = %event.record_id(),
                "discarding feed event for a superseded identity session"
            );
            return false;
        }
        let Some(active) = &self.active else {
            return false;
        };
        if let ChangeEvent::Created(record) = event {
            if record.owner != active.id {
                warn!(
                    record_id = %record.id,
                    owner = %record.owner,
                    identity_id = %active.id,
                    "dropping feed event owned by a different identity"
                );
                return false;
            }
        }
        if self.phase == SyncPhase::Loading {
            self.buffered.push(event.clone());
        }
        self.working.apply(event)
    }

    /// Trim and validate create input. Pure; never contacts the store.
    pub fn validate(title: &str, target: &str) -> std::result::Result<(String, String), ValidationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let target = target.trim();
        if target.is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        Ok((title.to_string(), target.to_string()))
    }

    /// Validate a create intent and, if an identity is active, mark a
    /// submission outstanding and return the record to submit. The working
    /// set is not touched: insertion arrives via the feed echo, which keeps
    /// a live feed from double-inserting.
    pub fn prepare_create(&mut self, title: &str, target: &str) -> Result<NewRecord> {
        let (title, target) = Self::validate(title, target)?;
        let Some(active) = &self.active else {
            return Err(Error::Submit(StoreError::Unauthorized(
                "no active identity".to_string(),
            )));
        };
        self.pending_submissions += 1;
        Ok(NewRecord {
            owner: active.id.clone(),
            title,
            target,
        })
    }

    /// Mark one outstanding submission finished, success or not.
    pub fn submission_finished(&mut self) {
        self.pending_submissions = self.pending_submissions.saturating_sub(1);
    }

    /// Optimistically splice a record out ahead of the delete submission.
    /// The later feed `Deleted` reconciles as a no-op. Returns `true` if the
    /// record was present.
    pub fn optimistic_remove(&mut self, id: &RecordId) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.working.apply(&ChangeEvent::Deleted(id.clone()))
    }

    /// Snapshot for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            phase: self.phase,
            records: self.working.records().to_vec(),
            submitting: self.is_submitting(),
        }
    }
}
