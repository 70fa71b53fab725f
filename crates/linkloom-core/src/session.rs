//! Session tracking: the sole source of truth for "who is acting now".
//!
//! [`SessionTracker`] owns the current [`IdentityState`] and forwards the
//! auth provider's change notifications into a `tokio::sync::watch` channel.
//! Observers register by taking a receiver ([`SessionTracker::watch_identity`])
//! and revoke by dropping it, so a torn-down component can never act on a
//! stale transition.
//!
//! Failure semantics: neither a failed sign-in nor a failed sign-out mutates
//! tracked identity state. Initiation failures surface as
//! [`Error::AuthInitiation`] from [`SessionTracker::begin_sign_in`];
//! completion failures arrive on the provider stream and are logged here.
//! Both leave `current_identity` untouched.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identity::{IdentityEvent, IdentityState};
use crate::store::AuthProvider;

/// Tracks the authenticated identity across its lifecycle.
pub struct SessionTracker {
    auth: Arc<dyn AuthProvider>,
    state: watch::Sender<IdentityState>,
    forwarder: JoinHandle<()>,
}

impl SessionTracker {
    /// Start tracking: resolves the initial session (transitioning out of
    /// `Unknown`) and then forwards every provider transition in order.
    #[must_use]
    pub fn start(auth: Arc<dyn AuthProvider>) -> Self {
        let (state, _) = watch::channel(IdentityState::Unknown);
        let tx = state.clone();
        let provider = Arc::clone(&auth);
        let forwarder = tokio::spawn(async move {
            // Subscribe before the initial query so a transition racing the
            // query cannot slip between the two.
            let mut events = provider.identity_events();
            match provider.current_session().await {
                Ok(Some(identity)) => {
                    let _ = tx.send(IdentityState::SignedIn(identity));
                }
                Ok(None) => {
                    let _ = tx.send(IdentityState::Anonymous);
                }
                Err(err) => {
                    warn!(error = %err, "initial session query failed; staying unknown");
                }
            }
            loop {
                match events.recv().await {
                    Ok(IdentityEvent::Changed(next)) => {
                        debug!(state = ?next, "identity transition");
                        let _ = tx.send(next);
                    }
                    Ok(IdentityEvent::SignInFailed { reason }) => {
                        warn!(reason, "sign-in rejected by provider; identity unchanged");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "identity event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self {
            auth,
            state,
            forwarder,
        }
    }

    /// The latest known identity state. Starts as
    /// [`IdentityState::Unknown`] until the provider's initial answer lands.
    #[must_use]
    pub fn current_identity(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    /// Register an observer. Each receiver sees every transition in order;
    /// dropping it unregisters the observer.
    #[must_use]
    pub fn watch_identity(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    /// Initiate an external sign-in handshake. Does not itself change the
    /// tracked identity; the result arrives asynchronously through the
    /// provider's change stream.
    pub async fn begin_sign_in(&self, provider: &str) -> Result<()> {
        self.auth.begin_sign_in(provider).await.map_err(|err| {
            warn!(provider, error = %err, "sign-in handshake could not start");
            Error::AuthInitiation(err)
        })
    }

    /// Request termination of the current session. On success the provider
    /// delivers an `Anonymous` transition, which downstream consumers use as
    /// their reset signal.
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await.map_err(|err| {
            warn!(error = %err, "sign-out failed; identity unchanged");
            Error::AuthCompletion(err)
        })
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
