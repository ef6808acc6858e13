//! Cache reconciliation.
//!
//! One invariant protocol, applied per entity family:
//! cancel in-flight reads for every affected view, merge the change into
//! each view synchronously, invalidate the views and their dependent
//! aggregates, then refetch only what a live observer is watching.

pub mod entries;
pub mod plans;
pub mod summaries;
pub mod view_ops;

pub use entries::EntryReconciler;
pub use plans::PlanReconciler;
pub use summaries::SummaryReconciler;
pub use view_ops::{MergePolicy, ViewOutcome};

use livesync_core::{CachedView, QueryCache, RefetchScope, ViewKey};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Apply a synchronous merge to one cached view.
///
/// Views nobody has fetched stay absent: reconciliation never materializes
/// a view out of a push event, it only rewrites cached ones. Returns what
/// the merge did, `Untouched` when the view was not cached.
pub(crate) async fn update_view<F>(cache: &dyn QueryCache, key: &ViewKey, merge: F) -> ViewOutcome
where
    F: FnOnce(&mut CachedView) -> ViewOutcome + Send + 'static,
{
    let outcome = Arc::new(Mutex::new(ViewOutcome::Untouched));
    let slot = Arc::clone(&outcome);
    cache
        .set_query_data(
            key,
            Box::new(move |cached| match cached {
                Some(mut view) => {
                    let result = merge(&mut view);
                    *slot.lock().expect("View outcome slot poisoned") = result;
                    Some(view)
                }
                None => None,
            }),
        )
        .await;
    let recorded = outcome.lock().expect("View outcome slot poisoned");
    *recorded
}

/// Step 1 of the protocol: cancel in-flight reads for every affected view,
/// so a stale response cannot overwrite the reconciled state.
pub(crate) async fn cancel_views(cache: &dyn QueryCache, keys: &[ViewKey]) {
    for key in keys {
        cache.cancel_queries(key).await;
    }
}

/// Steps 3 and 4: invalidate each view (refetch gated on active observers)
/// and explicitly refetch the ones being watched right now.
pub(crate) async fn invalidate_and_refetch(cache: &dyn QueryCache, keys: &[ViewKey]) {
    for key in keys {
        cache.invalidate_queries(key, RefetchScope::Active).await;
    }
    for key in keys {
        if cache.is_view_active(key) {
            cache.refetch_queries(key, RefetchScope::Active).await;
        } else {
            debug!(view = %key, "Skipping refetch for view with no live observer");
        }
    }
}

/// Full invalidate-and-refetch-active sweep across every registered view
/// family. Used after forced reconnects and prolonged inactivity, when any
/// number of events may have been dropped.
pub async fn sweep_cache(cache: &dyn QueryCache) {
    for root in ViewKey::registered_roots() {
        cache.invalidate_queries(&root, RefetchScope::Active).await;
    }
}
