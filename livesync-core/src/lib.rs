//! livesync Core - Data Types
//!
//! Pure data structures with no behavior. The engine crate depends on this.
//! This crate contains ONLY data types - no reconciliation logic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod cache;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod record;
pub mod state;
pub mod transport;

pub use cache::{CachedView, QueryCache, RefetchScope, ViewKey, ViewUpdater};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, HealthConfig, ReconnectConfig, SyncConfig};
pub use envelope::{ChangeEnvelope, ChangeKind, EntityTable, EnvelopeShapeError, UnknownTable};
pub use error::SyncError;
pub use record::{EntryStatus, NotAnObject, PartialRecord, Progress, RecordKey};
pub use state::{AppLifecycle, ConnectionState};
pub use transport::{ChangeTransport, ChannelHandle, ChannelId, ChannelStatus, TransportEvent};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Logical session key: one active subscription channel per key.
pub type SessionKey = Uuid;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}
