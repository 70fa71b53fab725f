//! linkloom-core: session-aware live sync engine for private link collections.
//!
//! An authenticated user keeps a private list of saved links; edits made in
//! one session show up in other concurrently open sessions for the same
//! identity without a manual refresh. This crate is the client-side
//! reconciliation engine that makes that true: it tracks the authentication
//! identity over time, maintains the in-memory ordered working set of the
//! user's records, and merges asynchronous change notifications into that
//! set correctly despite duplicate delivery, out-of-order delivery, or
//! delivery racing with locally-initiated writes.
//!
//! # Architecture
//!
//! ```text
//! AuthProvider ──identity events──► SessionTracker ──watch──┐
//!                                                           ▼
//! RecordStore ◄──loads/submits── runner (one sequential event queue)
//!      │                              │
//!      └──change feed──► CollectionSynchronizer ──► SyncSnapshot (render input)
//! ```
//!
//! # Modules
//!
//! - `identity`: identity model and tracked auth state
//! - `record`: saved-link records and change-feed events
//! - `working_set`: the ordered working set and its pure event reducer
//! - `store`: trait seams for the managed backing store
//! - `memory_store`: in-process reference store (tests, demos)
//! - `session`: session tracker
//! - `sync`: collection synchronizer state machine
//! - `runner`: async driver funneling all inputs through one queue
//! - `config`: TOML-backed configuration
//! - `logging`: tracing setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod memory_store;
pub mod record;
pub mod runner;
pub mod session;
pub mod store;
pub mod sync;
pub mod working_set;

pub use error::{Error, Result, StoreError, ValidationError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
