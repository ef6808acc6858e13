//! Connection lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the realtime subscription channel.
///
/// Legal transitions:
/// - `Disconnected -> Connecting` on start
/// - `Connecting -> Connected` on subscribe-ack
/// - `Connecting | Connected -> Error` on ack failure, timeout, or drop
/// - `Error -> Connecting` on a scheduled reconnect
/// - `Connected | Connecting | Error -> Disconnected` on explicit stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn may_transition(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Error) | (Connected, Error) => true,
            (Error, Connecting) => true,
            (Connected, Disconnected) | (Connecting, Disconnected) | (Error, Disconnected) => true,
            (a, b) => *a == b,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host lifecycle signal. Transient "inactive" states are filtered by the
/// caller before reaching the engine: only these two arrive here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppLifecycle {
    Active,
    Background,
}
