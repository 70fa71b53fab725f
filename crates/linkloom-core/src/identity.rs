//! Identity model for the session layer.
//!
//! An [`Identity`] is the authenticated principal on whose behalf records are
//! loaded and mutated. The tracker distinguishes three states: `Unknown`
//! (the external store has not answered yet), `Anonymous` (answered: nobody
//! is signed in), and `SignedIn`. The distinction between `Unknown` and
//! `Anonymous` matters at the boundary: it prevents rendering a signed-out
//! view before the initial session query resolves.

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier for an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId(pub String);

impl IdentityId {
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

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in principal: stable id plus a display label (typically a
/// contact address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier assigned by the external auth provider.
    pub id: IdentityId,
    /// Human-readable label for display purposes.
    pub label: String,
}

impl Identity {
    /// Construct an identity.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: IdentityId::new(id),
            label: label.into(),
        }
    }
}

/// Tracked authentication state. Exactly one identity is active at a time,
/// or none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    /// Initial state: the external store has not yet answered the
    /// current-session query. Distinct from `Anonymous` so the boundary can
    /// hold off rendering a signed-out view.
    #[default]
    Unknown,
    /// Resolved: no identity is active.
    Anonymous,
    /// Resolved: the contained identity is active.
    SignedIn(Identity),
}

impl IdentityState {
    /// The active identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) => Some(identity),
            Self::Unknown | Self::Anonymous => None,
        }
    }

    /// Whether the state has resolved to "nobody signed in".
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Whether the initial session query is still outstanding.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Notification emitted by an auth provider's change stream.
#[derive(Debug, Clone)]
pub enum IdentityEvent {
    /// The tracked identity transitioned (initial resolution, sign-in
    /// completion, sign-out, external expiry).
    Changed(IdentityState),
    /// A handshake started but the external provider rejected it. The
    /// tracked identity is unchanged; this is reporting-only.
    SignInFailed {
        /// Provider-supplied reason, for logging.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_unknown() {
        let state = IdentityState::default();
        assert!(state.is_unknown());
        assert!(!state.is_anonymous());
        assert!(state.identity().is_none());
    }

    #[test]
    fn signed_in_exposes_identity() {
        let state = IdentityState::SignedIn(Identity::new("u1", "user@example.com"));
        let identity = state.identity().unwrap();
        assert_eq!(identity.id.as_str(), "u1");
        assert_eq!(identity.label, "user@example.com");
    }

    #[test]
    fn identity_id_display_is_raw() {
        assert_eq!(IdentityId::new("abc-123").to_string(), "abc-123");
    }
}
