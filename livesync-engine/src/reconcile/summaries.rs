//! Summary reconciliation.
//!
//! Summaries are derived, regenerating resources keyed by
//! `(plan, summary_date)`. Their `progress` column is order-sensitive in a
//! way row merges are not: backend regeneration emits `generating` while a
//! finished result is already on screen, and reverting it would visibly
//! discard the result. The ledger below makes "last known progress"
//! explicit state, so suppression works regardless of network reordering.

use super::view_ops;
use super::{cancel_views, invalidate_and_refetch, update_view};
use livesync_core::record::columns;
use livesync_core::{
    ChangeEnvelope, ChangeKind, EntityId, PartialRecord, Progress, QueryCache, ViewKey,
};
use std::collections::HashMap;
use tracing::debug;

/// `(owning plan, summary date)`.
type SummaryKey = (EntityId, String);

pub struct SummaryReconciler {
    progress: HashMap<SummaryKey, Progress>,
}

impl SummaryReconciler {
    pub fn new() -> Self {
        Self {
            progress: HashMap::new(),
        }
    }

    /// Last progress observed for a key, if any.
    pub fn last_progress(&self, plan: EntityId, date: &str) -> Option<Progress> {
        self.progress.get(&(plan, date.to_string())).copied()
    }

    /// Forget all recorded progress. A full refetch re-establishes
    /// authoritative state, which is the only other path allowed to
    /// replace a completed summary.
    pub fn reset(&mut self) {
        self.progress.clear();
    }

    pub async fn apply(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        match envelope.kind {
            ChangeKind::Insert | ChangeKind::Update => self.apply_upsert(cache, envelope).await,
            ChangeKind::Delete => self.apply_delete(cache, envelope).await,
        }
    }

    async fn apply_upsert(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        let Some(mut row) = envelope.new_row.clone() else {
            return;
        };
        let (Some(plan), Some(date)) = (row.plan_id(), row.summary_date().map(str::to_string))
        else {
            debug!(label = %envelope.label(), "Summary change without plan/date key; dropping");
            return;
        };

        if self.suppress_downgrade(plan, &date, &mut row) {
            debug!(
                plan = %plan,
                date = %date,
                "Suppressed generating-after-completed downgrade"
            );
        }

        let view = ViewKey::summary(plan, &date);
        let affected = vec![view.clone()];
        cancel_views(cache, &affected).await;

        // The view's identity is (plan, date); regeneration may rotate the
        // row id, so the merge targets whatever single record is cached.
        update_view(cache, &view, move |cached| {
            view_ops::merge_singleton(cached, &row)
        })
        .await;

        let mut stale = affected;
        stale.push(ViewKey::stats(plan));
        invalidate_and_refetch(cache, &stale).await;
    }

    async fn apply_delete(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        let Some(old) = envelope.old_row.as_ref() else {
            return;
        };
        let (Some(plan), Some(date)) = (old.plan_id(), old.summary_date().map(str::to_string))
        else {
            return;
        };

        let view = ViewKey::summary(plan, &date);
        cancel_views(cache, std::slice::from_ref(&view)).await;
        cache.remove_queries(&view).await;
        self.progress.remove(&(plan, date));

        invalidate_and_refetch(cache, &[ViewKey::stats(plan)]).await;
    }

    /// Record the incoming progress in the ledger and strip a `generating`
    /// value that would revert an observed completion. Returns whether the
    /// downgrade was suppressed. Only an explicit new completion (or a
    /// delete) replaces a completed entry.
    fn suppress_downgrade(&mut self, plan: EntityId, date: &str, row: &mut PartialRecord) -> bool {
        let key = (plan, date.to_string());
        match row.progress() {
            Some(Progress::Completed) => {
                self.progress.insert(key, Progress::Completed);
                false
            }
            Some(Progress::Generating) => {
                if self.progress.get(&key) == Some(&Progress::Completed) {
                    row.remove(columns::PROGRESS);
                    true
                } else {
                    self.progress.insert(key, Progress::Generating);
                    false
                }
            }
            None => false,
        }
    }
}

impl Default for SummaryReconciler {
    fn default() -> Self {
        Self::new()
    }
}
