//! Change routing.
//!
//! One envelope in, one reconciler invoked. Dispatch is sequential per
//! incoming event: the engine's pump task awaits each dispatch before
//! pulling the next envelope, so events for the same view are never
//! reordered relative to each other.

use crate::reconcile::{EntryReconciler, PlanReconciler, SummaryReconciler};
use livesync_core::{ChangeEnvelope, EntityTable, QueryCache, SyncError};
use std::sync::Weak;
use tracing::warn;

pub struct ChangeRouter {
    cache: Weak<dyn QueryCache>,
    plans: PlanReconciler,
    entries: EntryReconciler,
    summaries: SummaryReconciler,
}

impl ChangeRouter {
    pub fn new(cache: Weak<dyn QueryCache>) -> Self {
        Self {
            cache,
            plans: PlanReconciler::new(),
            entries: EntryReconciler::new(),
            summaries: SummaryReconciler::new(),
        }
    }

    /// Route one envelope to its family reconciler.
    ///
    /// Malformed envelopes are dropped. So is everything that arrives
    /// after the host released the cache: events are never queued, the
    /// next invalidate-and-refetch sweep recovers whatever was missed.
    pub async fn dispatch(&mut self, envelope: ChangeEnvelope) -> Result<(), SyncError> {
        if let Err(err) = envelope.validate() {
            warn!(label = %envelope.label(), error = %err, "Dropping malformed change envelope");
            return Ok(());
        }
        let Some(cache) = self.cache.upgrade() else {
            return Err(SyncError::CacheUnavailable);
        };

        match envelope.table {
            EntityTable::Plans => self.plans.apply(cache.as_ref(), &envelope).await,
            EntityTable::Entries => self.entries.apply(cache.as_ref(), &envelope).await,
            EntityTable::Summaries => self.summaries.apply(cache.as_ref(), &envelope).await,
        }
        Ok(())
    }
}
