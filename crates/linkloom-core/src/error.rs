//! Error types for linkloom-core.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced at the managed backing-store seam.
///
/// Store implementations classify failures into this small taxonomy; the
/// engine maps them into [`Error`] variants at the operation that observed
/// them.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The request could not reach the store or the connection dropped.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The store refused the request for lack of a valid session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store understood the request and rejected it (including
    /// row-level authorization denial).
    #[error("rejected by store: {0}")]
    Rejected(String),
}

/// Local validation failures. These never reach the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Title was empty after trimming surrounding whitespace.
    #[error("title must not be empty")]
    EmptyTitle,

    /// Target was empty after trimming surrounding whitespace.
    #[error("target must not be empty")]
    EmptyTarget,
}

/// Main error type for linkloom-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The sign-in handshake could not start.
    #[error("sign-in initiation failed: {0}")]
    AuthInitiation(#[source] StoreError),

    /// A handshake started (or a sign-out was requested) and the external
    /// provider rejected it. The tracked identity is unchanged.
    #[error("auth completion failed: {0}")]
    AuthCompletion(#[source] StoreError),

    /// Bulk load of the working set failed. The prior working set is
    /// left intact.
    #[error("fetch failed: {0}")]
    Fetch(#[source] StoreError),

    /// Local validation rejected a create before any store interaction.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The store rejected a submitted create or delete.
    #[error("submit failed: {0}")]
    Submit(#[source] StoreError),

    /// Engine plumbing failure (event loop gone, channel closed).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether this error is local-only (never involved the store).
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_local() {
        assert!(Error::from(ValidationError::EmptyTitle).is_local());
        assert!(!Error::Fetch(StoreError::Transport("down".into())).is_local());
    }

    #[test]
    fn display_includes_store_reason() {
        let err = Error::Submit(StoreError::Rejected("row policy".into()));
        assert!(err.to_string().contains("row policy"));
    }
}
