//! Change-stream transport collaborator interface.

use crate::envelope::{ChangeEnvelope, EntityTable};
use crate::error::SyncError;
use crate::SessionKey;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Status signals emitted on a subscription channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Subscribe-ack: the channel is live.
    Subscribed,
    /// The remote closed the channel.
    Closed,
    /// The channel failed.
    Errored(String),
}

/// One event delivered on a subscription channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(ChannelStatus),
    Change(ChangeEnvelope),
}

/// Opaque identifier of one subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// A live subscription: its id plus the event stream.
#[derive(Debug)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The transport delivering row-level change events.
///
/// One `subscribe` covers the full table registry of a logical session;
/// the engine never opens per-table channels.
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    /// Open a multiplexed subscription for `session` over `tables`.
    async fn subscribe(
        &self,
        session: SessionKey,
        tables: &[EntityTable],
    ) -> Result<ChannelHandle, SyncError>;

    /// Tear down a channel previously returned by `subscribe`.
    async fn unsubscribe(&self, channel: ChannelId);

    /// Number of channels the transport currently reports live. Health
    /// checks compare this against the engine's view of the connection.
    fn active_channel_count(&self) -> usize;
}
