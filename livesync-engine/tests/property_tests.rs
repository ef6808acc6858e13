//! Property tests for the backoff schedule and view-merge invariants.

use livesync_engine::reconcile::view_ops::{self, keys_unique, MergePolicy};
use livesync_engine::{backoff_delay, jittered};
use livesync_test_utils::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

proptest! {
    #[test]
    fn backoff_matches_the_formula(config in arb_reconnect_config(), attempt in 0u32..24) {
        let expected = config
            .initial_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(config.max_ms);
        prop_assert_eq!(
            backoff_delay(&config, attempt),
            Duration::from_millis(expected)
        );
    }

    #[test]
    fn backoff_is_non_decreasing_until_capped(config in arb_reconnect_config(), attempt in 0u32..23) {
        let current = backoff_delay(&config, attempt);
        let next = backoff_delay(&config, attempt + 1);
        prop_assert!(next >= current);
        prop_assert!(next <= Duration::from_millis(config.max_ms));
    }

    #[test]
    fn jitter_never_shrinks_the_delay(config in arb_reconnect_config(), attempt in 0u32..24) {
        let base = backoff_delay(&config, attempt);
        let with_jitter = jittered(base, config.jitter_ms);
        prop_assert!(with_jitter >= base);
        prop_assert!(with_jitter <= base + Duration::from_millis(config.jitter_ms));
    }

    /// Any interleaving of inserts and updates over a small id pool keeps
    /// record keys unique within a view, placeholders included.
    #[test]
    fn view_keys_stay_unique(
        temp_seeds in 0usize..3,
        ops in prop::collection::vec((prop::bool::ANY, 0u8..4), 0..24),
    ) {
        let ids: Vec<Uuid> = (1u128..=4).map(Uuid::from_u128).collect();
        let mut view = CachedView::default();
        for n in 0..temp_seeds {
            view.records.push(
                PartialRecord::from_value(json!({ "temp_id": format!("tmp-{n}") })).unwrap(),
            );
        }

        let mut resolved: HashSet<Uuid> = HashSet::new();
        for (is_insert, index) in ops {
            let id = ids[index as usize];
            let incoming = PartialRecord::from_value(json!({ "id": id })).unwrap();
            let any_temp = |_: &PartialRecord| true;
            let policy = MergePolicy {
                belongs: true,
                may_claim_placeholder: !resolved.contains(&id),
                placeholder: Some(&any_temp),
            };
            let outcome = if is_insert {
                view_ops::apply_insert(&mut view, &incoming, &policy)
            } else {
                view_ops::apply_update(&mut view, &incoming, &policy)
            };
            if outcome == view_ops::ViewOutcome::ReplacedPlaceholder {
                resolved.insert(id);
            }
            prop_assert!(keys_unique(&view));
        }
    }

    /// Applying the same insert twice never grows the view a second time.
    #[test]
    fn double_insert_is_idempotent(index in 0u8..4) {
        let id = Uuid::from_u128(u128::from(index) + 1);
        let incoming = PartialRecord::from_value(json!({ "id": id })).unwrap();
        let mut view = CachedView::default();

        view_ops::apply_insert(&mut view, &incoming, &MergePolicy::member());
        let len_after_first = view.len();
        view_ops::apply_insert(&mut view, &incoming, &MergePolicy::member());
        prop_assert_eq!(view.len(), len_after_first);
    }
}
