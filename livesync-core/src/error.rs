//! Error types for livesync operations.
//!
//! Every transport and health failure is converted into a state transition
//! or a scheduled retry; none of these propagate as panics. The variants
//! mirror that taxonomy.

use thiserror::Error;

/// Engine-level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Subscribe call failed; retried with backoff.
    #[error("Transport subscribe failed: {reason}")]
    TransportSubscribe { reason: String },

    /// No subscribe-ack arrived within the configured window; retried with
    /// backoff.
    #[error("Subscribe ack timed out after {timeout_ms}ms")]
    SubscribeTimeout { timeout_ms: u64 },

    /// Health check found the channel dead while nominally connected;
    /// triggers a forced reconnect, not user-visible.
    #[error("Stale connection detected: {reason}")]
    StaleConnection { reason: String },

    /// Backoff exhausted; terminal until the caller re-invokes start, a
    /// foreground transition, or an activity-triggered refresh.
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The query cache collaborator was released by the host; the event is
    /// dropped and a later full refetch recovers.
    #[error("Query cache collaborator is unavailable")]
    CacheUnavailable,

    /// Transport-level stream error while connected.
    #[error("Transport error: {message}")]
    Transport { message: String },
}
