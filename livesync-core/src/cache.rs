//! Query cache collaborator interface.
//!
//! The engine never owns cached data. All reads and writes go through this
//! seam, whose primitives are assumed individually atomic; the engine's
//! correctness rests on never mutating a view without first canceling
//! in-flight reads for it.

use crate::record::PartialRecord;
use crate::{EntityId, EntityTable, RecordKey};
use async_trait::async_trait;
use std::fmt;

// ============================================================================
// VIEW KEYS
// ============================================================================

/// Key of one independently cached query result.
///
/// Keys are structured as a family name plus path segments, e.g.
/// `entries:active/<plan>`. A key with fewer segments is a prefix covering
/// every longer key in the same family, which is how family-wide sweeps
/// address all views at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey {
    family: &'static str,
    segments: Vec<String>,
}

impl ViewKey {
    pub fn new(family: &'static str, segments: Vec<String>) -> Self {
        Self { family, segments }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether `prefix` covers this key.
    pub fn matches_prefix(&self, prefix: &ViewKey) -> bool {
        self.family == prefix.family && self.segments.starts_with(&prefix.segments)
    }

    // ------------------------------------------------------------------
    // Typed constructors for the registered views
    // ------------------------------------------------------------------

    pub fn plan_list() -> Self {
        Self::new("plans", vec!["list".into()])
    }

    pub fn plan_detail(id: EntityId) -> Self {
        Self::new("plans", vec!["detail".into(), id.to_string()])
    }

    pub fn entries_active(plan: EntityId) -> Self {
        Self::new("entries", vec!["active".into(), plan.to_string()])
    }

    pub fn entries_archived(plan: EntityId) -> Self {
        Self::new("entries", vec!["archived".into(), plan.to_string()])
    }

    pub fn entry_detail(id: EntityId) -> Self {
        Self::new("entries", vec!["detail".into(), id.to_string()])
    }

    pub fn summary(plan: EntityId, date: &str) -> Self {
        Self::new("summaries", vec![plan.to_string(), date.to_string()])
    }

    pub fn stats(plan: EntityId) -> Self {
        Self::new("stats", vec![plan.to_string()])
    }

    /// Prefix covering every view of one table's family.
    pub fn table_prefix(table: EntityTable) -> Self {
        Self::new(table.as_str(), Vec::new())
    }

    pub fn stats_prefix() -> Self {
        Self::new("stats", Vec::new())
    }

    /// Every family root a full cache sweep must touch.
    pub fn registered_roots() -> Vec<ViewKey> {
        let mut roots: Vec<ViewKey> = EntityTable::ALL.iter().copied().map(Self::table_prefix).collect();
        roots.push(Self::stats_prefix());
        roots
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.segments.join("/"))
    }
}

// ============================================================================
// CACHED VIEWS
// ============================================================================

/// One cached query result: an ordered collection of records.
///
/// Detail views hold zero or one record; list views hold many. Aggregate
/// views are opaque to the engine (invalidated, never merged) and are not
/// represented here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachedView {
    pub records: Vec<PartialRecord>,
}

impl CachedView {
    pub fn new(records: Vec<PartialRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        self.records.iter().any(|r| r.id() == Some(id))
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.records.iter().any(|r| r.key().as_ref() == Some(key))
    }

    pub fn find_by_id(&self, id: EntityId) -> Option<&PartialRecord> {
        self.records.iter().find(|r| r.id() == Some(id))
    }
}

// ============================================================================
// CACHE COLLABORATOR
// ============================================================================

/// Refetch gating for invalidate/refetch calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchScope {
    /// Only views currently subscribed to by a live observer.
    Active,
    /// Every matching view.
    All,
}

/// Atomic view mutation applied by the cache. `None` in means the view is
/// not cached; `None` out means leave it uncached.
pub type ViewUpdater = Box<dyn FnOnce(Option<CachedView>) -> Option<CachedView> + Send>;

/// The query cache the engine reconciles into.
///
/// Keys passed to cancel/invalidate/refetch/remove may be prefixes; the
/// cache applies the operation to every view the prefix covers.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Cancel in-flight reads for the views covered by `key`.
    async fn cancel_queries(&self, key: &ViewKey);

    async fn get_query_data(&self, key: &ViewKey) -> Option<CachedView>;

    /// Snapshot every cached view covered by `prefix`.
    async fn get_queries_data(&self, prefix: &ViewKey) -> Vec<(ViewKey, CachedView)>;

    /// Apply `update` atomically to the view at `key`.
    async fn set_query_data(&self, key: &ViewKey, update: ViewUpdater);

    /// Mark covered views stale, refetching per `scope`.
    async fn invalidate_queries(&self, key: &ViewKey, scope: RefetchScope);

    async fn refetch_queries(&self, key: &ViewKey, scope: RefetchScope);

    /// Drop covered views entirely.
    async fn remove_queries(&self, key: &ViewKey);

    /// Whether a live observer is subscribed to `key` right now.
    fn is_view_active(&self, key: &ViewKey) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;

    #[test]
    fn prefix_covers_family_views() {
        let plan = new_entity_id();
        let prefix = ViewKey::table_prefix(EntityTable::Entries);
        assert!(ViewKey::entries_active(plan).matches_prefix(&prefix));
        assert!(ViewKey::entry_detail(plan).matches_prefix(&prefix));
        assert!(!ViewKey::plan_list().matches_prefix(&prefix));
    }

    #[test]
    fn longer_prefix_does_not_cover_shorter_key() {
        let plan = new_entity_id();
        let key = ViewKey::new("entries", vec!["active".into()]);
        assert!(!key.matches_prefix(&ViewKey::entries_active(plan)));
    }

    #[test]
    fn registered_roots_cover_all_tables_and_stats() {
        let roots = ViewKey::registered_roots();
        assert_eq!(roots.len(), EntityTable::ALL.len() + 1);
        assert!(roots.iter().any(|r| r.family() == "stats"));
    }

    #[test]
    fn display_form_is_stable() {
        let plan = new_entity_id();
        let key = ViewKey::entries_active(plan);
        assert_eq!(key.to_string(), format!("entries:active/{plan}"));
    }
}
