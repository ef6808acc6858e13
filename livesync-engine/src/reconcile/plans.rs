//! Plan reconciliation.
//!
//! Plans have a flat list view and a per-plan detail view. The plan's
//! stats aggregate is derived, so every plan change marks it stale.

use super::view_ops::{self, MergePolicy, ViewOutcome};
use super::{cancel_views, invalidate_and_refetch, update_view};
use livesync_core::{ChangeEnvelope, ChangeKind, EntityId, PartialRecord, QueryCache, ViewKey};
use std::collections::HashSet;

pub struct PlanReconciler {
    resolved: HashSet<EntityId>,
}

impl PlanReconciler {
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

        let affected = vec![ViewKey::plan_list(), ViewKey::plan_detail(id)];
        cancel_views(cache, &affected).await;

        let kind = envelope.kind;
        let may_claim = !self.resolved.contains(&id);
        let list_row = row.clone();
        let outcome = update_view(cache, &ViewKey::plan_list(), move |view| {
            let any_temp = |_: &PartialRecord| true;
            let policy = MergePolicy {
                belongs: true,
                may_claim_placeholder: may_claim,
                placeholder: Some(&any_temp),
            };
            match kind {
                ChangeKind::Insert => view_ops::apply_insert(view, &list_row, &policy),
                _ => view_ops::apply_update(view, &list_row, &policy),
            }
        })
        .await;
        if outcome == ViewOutcome::ReplacedPlaceholder {
            self.resolved.insert(id);
        }

        update_view(cache, &ViewKey::plan_detail(id), move |view| match kind {
            ChangeKind::Insert => view_ops::apply_insert(view, &row, &MergePolicy::member()),
            _ => view_ops::apply_update(view, &row, &MergePolicy::member()),
        })
        .await;

        let mut stale = affected;
        stale.push(ViewKey::stats(id));
        invalidate_and_refetch(cache, &stale).await;
    }

    async fn apply_delete(&mut self, cache: &dyn QueryCache, envelope: &ChangeEnvelope) {
        let Some(id) = envelope.old_row.as_ref().and_then(|row| row.id()) else {
            return;
        };

        let detail = ViewKey::plan_detail(id);
        let affected = vec![ViewKey::plan_list(), detail.clone()];
        cancel_views(cache, &affected).await;

        update_view(cache, &ViewKey::plan_list(), move |view| {
            view_ops::remove_by_id(view, id)
        })
        .await;
        cache.remove_queries(&detail).await;
        self.resolved.remove(&id);

        // A deleted plan takes its entry views and aggregate with it.
        cache.remove_queries(&ViewKey::entries_active(id)).await;
        cache.remove_queries(&ViewKey::entries_archived(id)).await;
        cache.remove_queries(&ViewKey::stats(id)).await;

        invalidate_and_refetch(cache, &[ViewKey::plan_list()]).await;
    }
}

impl Default for PlanReconciler {
    fn default() -> Self {
        Self::new()
    }
}
