//! Generic view-merge primitives.
//!
//! Every list and detail view is reconciled through the same
//! upsert-or-remove operation, parameterized by a bucket decision and an
//! optional placeholder predicate. The per-family reconcilers only build
//! policies; they never touch record vectors directly.
//!
//! All functions here are synchronous and run to completion inside the
//! cache's atomic updater; there is no suspension point between reading a
//! view and writing it back.

use livesync_core::{CachedView, EntityId, PartialRecord, RecordKey};
use livesync_core::record::columns;

/// What a view merge did, for logging and ledger updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// View had nothing to do for this change.
    Untouched,
    /// Record was new to the view and was prepended.
    Prepended,
    /// An optimistic placeholder was consumed by the confirmed record.
    ReplacedPlaceholder,
    /// An existing record was merged in place.
    Merged,
    /// Update for a record the view had never seen; appended.
    Appended,
    /// Insert for an identifier the view already holds.
    SkippedDuplicate,
    /// Record was removed (delete, or re-bucketed out of this view).
    Removed,
}

/// Per-view merge policy.
pub struct MergePolicy<'a> {
    /// Does the record belong in this view after the change? `false` turns
    /// the merge into a removal (re-bucketing).
    pub belongs: bool,
    /// May this event still consume an optimistic placeholder? Cleared
    /// once the event's identifier has already resolved one.
    pub may_claim_placeholder: bool,
    /// Which temp-keyed records are replacement candidates. `None`
    /// disables placeholder replacement for this view.
    pub placeholder: Option<&'a dyn Fn(&PartialRecord) -> bool>,
}

impl<'a> MergePolicy<'a> {
    /// Plain membership policy: record belongs, no placeholder handling.
    pub fn member() -> Self {
        Self {
            belongs: true,
            may_claim_placeholder: false,
            placeholder: None,
        }
    }
}

/// Insert semantics: idempotent by identifier, placeholder-aware, prepend.
pub fn apply_insert(view: &mut CachedView, incoming: &PartialRecord, policy: &MergePolicy<'_>) -> ViewOutcome {
    let Some(id) = incoming.id() else {
        return ViewOutcome::Untouched;
    };
    if !policy.belongs {
        return remove_by_id(view, id);
    }
    if view.contains_id(id) {
        return ViewOutcome::SkippedDuplicate;
    }
    if policy.may_claim_placeholder {
        if let Some(pos) = first_placeholder(view, policy) {
            replace_placeholder(&mut view.records[pos], incoming);
            return ViewOutcome::ReplacedPlaceholder;
        }
    }
    view.records.insert(0, incoming.clone());
    ViewOutcome::Prepended
}

/// Update semantics: merge by identifier, fall back to a placeholder match
/// on business keys, append when absent.
pub fn apply_update(view: &mut CachedView, incoming: &PartialRecord, policy: &MergePolicy<'_>) -> ViewOutcome {
    let Some(id) = incoming.id() else {
        return ViewOutcome::Untouched;
    };
    if !policy.belongs {
        return remove_by_id(view, id);
    }
    if let Some(pos) = view.records.iter().position(|r| r.id() == Some(id)) {
        view.records[pos].merge_from(incoming);
        return ViewOutcome::Merged;
    }
    if policy.may_claim_placeholder {
        if let Some(pos) = first_placeholder(view, policy) {
            replace_placeholder(&mut view.records[pos], incoming);
            return ViewOutcome::ReplacedPlaceholder;
        }
    }
    view.records.push(incoming.clone());
    ViewOutcome::Appended
}

/// Merge into a singleton view (detail-like views whose identity is the
/// view key itself, not the row id). Regeneration may rotate the row id,
/// so the incoming record lands on whatever the view holds.
pub fn merge_singleton(view: &mut CachedView, incoming: &PartialRecord) -> ViewOutcome {
    match view.records.first_mut() {
        Some(existing) => {
            existing.merge_from(incoming);
            ViewOutcome::Merged
        }
        None => {
            view.records.push(incoming.clone());
            ViewOutcome::Prepended
        }
    }
}

/// Remove a record by confirmed identifier.
pub fn remove_by_id(view: &mut CachedView, id: EntityId) -> ViewOutcome {
    let before = view.records.len();
    view.records.retain(|r| r.id() != Some(id));
    if view.records.len() < before {
        ViewOutcome::Removed
    } else {
        ViewOutcome::Untouched
    }
}

/// Every key in the view is unique. Checked by tests and debug assertions.
pub fn keys_unique(view: &CachedView) -> bool {
    let mut seen: Vec<RecordKey> = Vec::with_capacity(view.records.len());
    for record in &view.records {
        if let Some(key) = record.key() {
            if seen.contains(&key) {
                return false;
            }
            seen.push(key);
        }
    }
    true
}

fn first_placeholder(view: &CachedView, policy: &MergePolicy<'_>) -> Option<usize> {
    let predicate = policy.placeholder?;
    view.records
        .iter()
        .position(|r| matches!(r.key(), Some(key) if key.is_temp()) && predicate(r))
}

/// The confirmed record lands on top of the placeholder's fields; the temp
/// marker is dropped so the view converges to exactly one real-id record.
fn replace_placeholder(cached: &mut PartialRecord, incoming: &PartialRecord) {
    cached.merge_from(incoming);
    cached.remove(columns::TEMP_ID);
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::new_entity_id;
    use serde_json::json;

    fn record(value: serde_json::Value) -> PartialRecord {
        PartialRecord::from_value(value).unwrap()
    }

    fn any_temp(candidate: &PartialRecord) -> bool {
        let _ = candidate;
        true
    }

    fn claiming_policy() -> MergePolicy<'static> {
        MergePolicy {
            belongs: true,
            may_claim_placeholder: true,
            placeholder: Some(&any_temp),
        }
    }

    #[test]
    fn insert_is_idempotent_by_id() {
        let id = new_entity_id();
        let mut view = CachedView::default();
        let incoming = record(json!({ "id": id, "title": "a" }));

        assert_eq!(
            apply_insert(&mut view, &incoming, &claiming_policy()),
            ViewOutcome::Prepended
        );
        assert_eq!(
            apply_insert(&mut view, &incoming, &claiming_policy()),
            ViewOutcome::SkippedDuplicate
        );
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn insert_replaces_first_placeholder() {
        let id = new_entity_id();
        let mut view = CachedView::new(vec![
            record(json!({ "temp_id": "tmp-1", "title": "draft one" })),
            record(json!({ "temp_id": "tmp-2", "title": "draft two" })),
        ]);
        let incoming = record(json!({ "id": id, "title": "confirmed" }));

        assert_eq!(
            apply_insert(&mut view, &incoming, &claiming_policy()),
            ViewOutcome::ReplacedPlaceholder
        );
        assert_eq!(view.len(), 2);
        assert_eq!(view.records[0].id(), Some(id));
        assert_eq!(view.records[0].temp_id(), None);
        assert_eq!(view.records[1].temp_id(), Some("tmp-2"));
        assert!(keys_unique(&view));
    }

    #[test]
    fn insert_without_claim_right_prepends() {
        let id = new_entity_id();
        let mut view = CachedView::new(vec![record(json!({ "temp_id": "tmp-1" }))]);
        let mut policy = claiming_policy();
        policy.may_claim_placeholder = false;

        assert_eq!(
            apply_insert(&mut view, &record(json!({ "id": id })), &policy),
            ViewOutcome::Prepended
        );
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn update_merges_over_richer_cached_copy() {
        let id = new_entity_id();
        let mut view = CachedView::new(vec![record(json!({
            "id": id,
            "title": "old title",
            "body": "full detail body",
        }))]);
        let incoming = record(json!({ "id": id, "title": "new title" }));

        assert_eq!(
            apply_update(&mut view, &incoming, &MergePolicy::member()),
            ViewOutcome::Merged
        );
        assert_eq!(view.records[0].get("body"), Some(&json!("full detail body")));
        assert_eq!(view.records[0].get("title"), Some(&json!("new title")));
    }

    #[test]
    fn update_falls_back_to_business_key_placeholder() {
        let id = new_entity_id();
        let plan = new_entity_id();
        let mut view = CachedView::new(vec![record(json!({
            "temp_id": "tmp-1",
            "plan_id": plan,
            "entry_date": "2026-08-01",
        }))]);
        let incoming = record(json!({
            "id": id,
            "plan_id": plan,
            "entry_date": "2026-08-01",
        }));
        let matches_business_key = |r: &PartialRecord| {
            r.plan_id() == incoming.plan_id() && r.entry_date() == incoming.entry_date()
        };
        let policy = MergePolicy {
            belongs: true,
            may_claim_placeholder: true,
            placeholder: Some(&matches_business_key),
        };

        assert_eq!(apply_update(&mut view, &incoming, &policy), ViewOutcome::ReplacedPlaceholder);
        assert_eq!(view.len(), 1);
        assert_eq!(view.records[0].id(), Some(id));
        assert!(keys_unique(&view));
    }

    #[test]
    fn update_appends_when_absent() {
        let id = new_entity_id();
        let mut view = CachedView::default();
        assert_eq!(
            apply_update(&mut view, &record(json!({ "id": id })), &MergePolicy::member()),
            ViewOutcome::Appended
        );
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn rebucketed_record_is_removed() {
        let id = new_entity_id();
        let mut view = CachedView::new(vec![record(json!({ "id": id }))]);
        let mut policy = MergePolicy::member();
        policy.belongs = false;

        assert_eq!(
            apply_update(&mut view, &record(json!({ "id": id })), &policy),
            ViewOutcome::Removed
        );
        assert!(view.is_empty());
    }

    #[test]
    fn remove_by_id_is_noop_for_unknown_id() {
        let mut view = CachedView::new(vec![record(json!({ "id": new_entity_id() }))]);
        assert_eq!(remove_by_id(&mut view, new_entity_id()), ViewOutcome::Untouched);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn singleton_merge_survives_row_id_rotation() {
        let mut view = CachedView::default();
        let first = record(json!({ "id": new_entity_id(), "progress": "completed", "text": "done" }));
        assert_eq!(merge_singleton(&mut view, &first), ViewOutcome::Prepended);

        let regenerated = record(json!({ "id": new_entity_id(), "text": "regenerated" }));
        assert_eq!(merge_singleton(&mut view, &regenerated), ViewOutcome::Merged);
        assert_eq!(view.len(), 1);
        assert_eq!(view.records[0].get("progress"), Some(&json!("completed")));
        assert_eq!(view.records[0].get("text"), Some(&json!("regenerated")));
    }
}
