//! Entry reconciliation.
//!
//! Entries live in three cached shapes: the active list and archived list
//! of their owning plan, and a per-entry detail view. A status change
//! migrates the record between the two lists; optimistic inserts leave
//! temp-keyed placeholders that confirmed rows must consume exactly once.

use super::view_ops::{self, MergePolicy, ViewOutcome};
use super::{cancel_views, invalidate_and_refetch, update_view};
use livesync_core::{
    ChangeEnvelope, ChangeKind, EntityId, EntityTable, EntryStatus, PartialRecord, QueryCache,
    ViewKey,
};
use std::collections::HashSet;
use tracing::debug;

pub struct EntryReconciler {
    /// Identifiers that have already consumed a placeholder. An event for
    /// a resolved id can never claim a second one, so concurrent
    /// optimistic inserts cannot be cross-attributed.
    resolved: HashSet<EntityId>,
}

impl EntryReconciler {
    pub fn new() -> Self {
        Self {
            resolved: HashSet::new(),
        }
    }

    pub async fn apply(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        match envelope.kind {
            ChangeKind::Insert | ChangeKind::Update => self.apply_upsert(cache, envelope).await,
            ChangeKind::Delete => self.apply_delete(cache, envelope).await,
        }
    }

    async fn apply_upsert(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        let Some(row) = envelope.new_row.clone() else {
            return;
        };
        let Some(id) = row.id() else {
            return;
        };
        let plan = row.plan_id();
        let status = row.status().unwrap_or(EntryStatus::Active);

        let mut affected = vec![ViewKey::entry_detail(id)];
        if let Some(plan) = plan {
            affected.push(ViewKey::entries_active(plan));
            affected.push(ViewKey::entries_archived(plan));
        }
        cancel_views(cache, &affected).await;

        let mut claimed = false;
        if let Some(plan) = plan {
            // Leave the list the record no longer belongs to before
            // touching the one it does, so a re-bucketing change never
            // shows the record twice.
            let (leaving, joining) = match status {
                EntryStatus::Active => (ViewKey::entries_archived(plan), ViewKey::entries_active(plan)),
                EntryStatus::Archived => (ViewKey::entries_active(plan), ViewKey::entries_archived(plan)),
            };
            merge_list(cache, &leaving, row.clone(), envelope.kind, false, false).await;
            let may_claim = !self.resolved.contains(&id);
            let outcome = merge_list(cache, &joining, row.clone(), envelope.kind, true, may_claim).await;
            claimed = outcome == ViewOutcome::ReplacedPlaceholder;
        }

        let detail_row = row.clone();
        let kind = envelope.kind;
        let outcome = update_view(cache, &ViewKey::entry_detail(id), move |view| match kind {
            ChangeKind::Insert => view_ops::apply_insert(view, &detail_row, &MergePolicy::member()),
            _ => view_ops::apply_update(view, &detail_row, &MergePolicy::member()),
        })
        .await;
        debug!(entry = %id, ?outcome, "Merged entry change into detail view");

        if claimed {
            self.resolved.insert(id);
        }

        let mut stale = affected;
        if let Some(plan) = plan {
            stale.push(ViewKey::stats(plan));
        }
        invalidate_and_refetch(cache, &stale).await;
    }

    async fn apply_delete(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        let Some(old) = envelope.old_row.as_ref() else {
            return;
        };
        let Some(id) = old.id() else {
            return;
        };

        // Delete payloads may carry only the primary key. Resolve the
        // owning plan from cached views before anything is removed, so the
        // dependent stats view can still be invalidated.
        let snapshots = cache
            .get_queries_data(&ViewKey::table_prefix(EntityTable::Entries))
            .await;
        let plan = old.plan_id().or_else(|| {
            snapshots
                .iter()
                .find_map(|(_, view)| view.find_by_id(id).and_then(|r| r.plan_id()))
        });

        let detail = ViewKey::entry_detail(id);
        let held: Vec<ViewKey> = snapshots
            .iter()
            .filter(|(key, view)| *key != detail && view.contains_id(id))
            .map(|(key, _)| key.clone())
            .collect();

        let mut affected = held.clone();
        affected.push(detail.clone());
        cancel_views(cache, &affected).await;

        for key in &held {
            update_view(cache, key, move |view| view_ops::remove_by_id(view, id)).await;
        }
        cache.remove_queries(&detail).await;
        self.resolved.remove(&id);

        let mut stale = held;
        if let Some(plan) = plan {
            for key in [
                ViewKey::entries_active(plan),
                ViewKey::entries_archived(plan),
                ViewKey::stats(plan),
            ] {
                if !stale.contains(&key) {
                    stale.push(key);
                }
            }
        }
        invalidate_and_refetch(cache, &stale).await;
    }
}

impl Default for EntryReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge one change into one list view.
///
/// Insert may consume any pending placeholder; update only one matching on
/// the business key (owning plan + entry date), since an update confirms a
/// specific optimistic row rather than "whichever came first".
async fn merge_list(
    cache: &dyn QueryCache,
    key: &ViewKey,
    row: PartialRecord,
    kind: ChangeKind,
    belongs: bool,
    may_claim: bool,
) -> ViewOutcome {
    update_view(cache, key, move |view| match kind {
        ChangeKind::Insert => {
            let any_temp = |_: &PartialRecord| true;
            let policy = MergePolicy {
                belongs,
                may_claim_placeholder: may_claim,
                placeholder: Some(&any_temp),
            };
            view_ops::apply_insert(view, &row, &policy)
        }
        ChangeKind::Update => {
            let business_key = |candidate: &PartialRecord| {
                row.entry_date().is_some()
                    && candidate.plan_id() == row.plan_id()
                    && candidate.entry_date() == row.entry_date()
            };
            let policy = MergePolicy {
                belongs,
                may_claim_placeholder: may_claim,
                placeholder: Some(&business_key),
            };
            view_ops::apply_update(view, &row, &policy)
        }
        ChangeKind::Delete => ViewOutcome::Untouched,
    })
    .await
}
