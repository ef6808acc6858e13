//! livesync Engine
//!
//! Keeps a client-side query cache consistent with a remote datastore by
//! consuming a live stream of row-level change events over one
//! multiplexed subscription and reconciling them into every cached view
//! that could contain the affected record.
//!
//! The engine is a library: it owns no wire format, UI, or storage. The
//! host supplies a [`QueryCache`](livesync_core::QueryCache) and a
//! [`ChangeTransport`](livesync_core::ChangeTransport), constructs a
//! [`SyncEngine`], and drives it with lifecycle and activity signals.

pub mod activity;
pub mod connection;
pub mod engine;
pub mod reconcile;
pub mod router;
pub mod ws;

pub use activity::ActivityTracker;
pub use connection::{backoff_delay, jittered, ConnectionManager};
pub use engine::SyncEngine;
pub use reconcile::{sweep_cache, EntryReconciler, PlanReconciler, SummaryReconciler};
pub use router::ChangeRouter;
pub use ws::WsTransport;
