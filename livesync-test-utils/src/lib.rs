//! livesync Test Utilities
//!
//! Centralized test infrastructure for the livesync workspace:
//! - Mock query cache with a call journal for protocol assertions
//! - Scripted transport for driving connection scenarios
//! - Manually advanced clock
//! - Row fixtures and proptest generators

// Re-export core types for convenience
pub use livesync_core::{
    AppLifecycle, CachedView, ChangeEnvelope, ChangeKind, ChangeTransport, ChannelHandle,
    ChannelId, ChannelStatus, Clock, ConnectionState, EntityId, EntityTable, EntryStatus,
    HealthConfig, PartialRecord, Progress, QueryCache, ReconnectConfig, RefetchScope, RecordKey,
    SessionKey, SyncConfig, SyncError, TransportEvent, ViewKey, ViewUpdater, new_entity_id,
};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

// ============================================================================
// MOCK QUERY CACHE
// ============================================================================

/// One recorded cache operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Cancel(ViewKey),
    Set(ViewKey),
    Invalidate { key: ViewKey, scope: RefetchScope },
    Refetch { key: ViewKey, scope: RefetchScope },
    Remove(ViewKey),
}

/// In-memory query cache recording every call for assertions.
#[derive(Default)]
pub struct MockQueryCache {
    views: Mutex<HashMap<ViewKey, CachedView>>,
    active: Mutex<HashSet<ViewKey>>,
    journal: Mutex<Vec<CacheOp>>,
}

impl MockQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a view, as if an observer had fetched it.
    pub fn seed(&self, key: ViewKey, records: Vec<PartialRecord>) {
        self.views
            .lock()
            .expect("views lock poisoned")
            .insert(key, CachedView::new(records));
    }

    /// Mark a view as having a live observer.
    pub fn set_active(&self, key: ViewKey) {
        self.active.lock().expect("active lock poisoned").insert(key);
    }

    pub fn view(&self, key: &ViewKey) -> Option<CachedView> {
        self.views.lock().expect("views lock poisoned").get(key).cloned()
    }

    pub fn journal(&self) -> Vec<CacheOp> {
        self.journal.lock().expect("journal lock poisoned").clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().expect("journal lock poisoned").clear();
    }

    pub fn cancels_for(&self, key: &ViewKey) -> usize {
        self.journal()
            .iter()
            .filter(|op| matches!(op, CacheOp::Cancel(k) if k == key))
            .count()
    }

    pub fn invalidates_for(&self, key: &ViewKey) -> usize {
        self.journal()
            .iter()
            .filter(|op| matches!(op, CacheOp::Invalidate { key: k, .. } if k == key))
            .count()
    }

    pub fn refetches_for(&self, key: &ViewKey) -> usize {
        self.journal()
            .iter()
            .filter(|op| matches!(op, CacheOp::Refetch { key: k, .. } if k == key))
            .count()
    }

    /// Invalidate ops whose key covers `key` as a prefix (sweep assertions).
    pub fn invalidates_covering(&self, key: &ViewKey) -> usize {
        self.journal()
            .iter()
            .filter(|op| matches!(op, CacheOp::Invalidate { key: prefix, .. } if key.matches_prefix(prefix)))
            .count()
    }

    fn record(&self, op: CacheOp) {
        self.journal.lock().expect("journal lock poisoned").push(op);
    }
}

#[async_trait]
impl QueryCache for MockQueryCache {
    async fn cancel_queries(&self, key: &ViewKey) {
        self.record(CacheOp::Cancel(key.clone()));
    }

    async fn get_query_data(&self, key: &ViewKey) -> Option<CachedView> {
        self.view(key)
    }

    async fn get_queries_data(&self, prefix: &ViewKey) -> Vec<(ViewKey, CachedView)> {
        self.views
            .lock()
            .expect("views lock poisoned")
            .iter()
            .filter(|(key, _)| key.matches_prefix(prefix))
            .map(|(key, view)| (key.clone(), view.clone()))
            .collect()
    }

    async fn set_query_data(&self, key: &ViewKey, update: ViewUpdater) {
        let mut views = self.views.lock().expect("views lock poisoned");
        let current = views.get(key).cloned();
        match update(current) {
            Some(next) => {
                views.insert(key.clone(), next);
            }
            None => {
                views.remove(key);
            }
        }
        drop(views);
        self.record(CacheOp::Set(key.clone()));
    }

    async fn invalidate_queries(&self, key: &ViewKey, scope: RefetchScope) {
        self.record(CacheOp::Invalidate {
            key: key.clone(),
            scope,
        });
    }

    async fn refetch_queries(&self, key: &ViewKey, scope: RefetchScope) {
        self.record(CacheOp::Refetch {
            key: key.clone(),
            scope,
        });
    }

    async fn remove_queries(&self, key: &ViewKey) {
        self.views
            .lock()
            .expect("views lock poisoned")
            .retain(|cached, _| !cached.matches_prefix(key));
        self.record(CacheOp::Remove(key.clone()));
    }

    fn is_view_active(&self, key: &ViewKey) -> bool {
        self.active.lock().expect("active lock poisoned").contains(key)
    }
}

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

/// Transport whose subscribe outcomes and event stream are driven by the
/// test.
pub struct ScriptedTransport {
    subscribe_plan: Mutex<VecDeque<Result<(), SyncError>>>,
    auto_ack: Mutex<bool>,
    subscribe_count: AtomicUsize,
    active: AtomicUsize,
    current: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    next_id: AtomicU64,
    unsubscribed: Mutex<Vec<ChannelId>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            subscribe_plan: Mutex::new(VecDeque::new()),
            auto_ack: Mutex::new(true),
            subscribe_count: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            unsubscribed: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue failures for upcoming subscribe calls; once the queue drains,
    /// subscribes succeed again.
    pub fn fail_next_subscribes(&self, count: usize) {
        let mut plan = self.subscribe_plan.lock().expect("plan lock poisoned");
        for _ in 0..count {
            plan.push_back(Err(SyncError::TransportSubscribe {
                reason: "scripted failure".to_string(),
            }));
        }
    }

    /// When disabled, subscribes open a channel that never acks, so the
    /// subscribe timeout path can be exercised.
    pub fn set_auto_ack(&self, ack: bool) {
        *self.auto_ack.lock().expect("auto_ack lock poisoned") = ack;
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn unsubscribed(&self) -> Vec<ChannelId> {
        self.unsubscribed.lock().expect("unsubscribed lock poisoned").clone()
    }

    /// Deliver an event on the most recent channel.
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self
            .current
            .lock()
            .expect("current channel lock poisoned")
            .clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn emit_change(&self, envelope: ChangeEnvelope) {
        self.emit(TransportEvent::Change(envelope)).await;
    }

    /// Pretend the channel died without any close frame: the transport
    /// stops reporting it, but no status event is delivered.
    pub fn kill_channels_silently(&self) {
        self.active.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChangeTransport for ScriptedTransport {
    async fn subscribe(
        &self,
        _session: SessionKey,
        _tables: &[EntityTable],
    ) -> Result<ChannelHandle, SyncError> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let planned = self
            .subscribe_plan
            .lock()
            .expect("plan lock poisoned")
            .pop_front();
        if let Some(Err(err)) = planned {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        if *self.auto_ack.lock().expect("auto_ack lock poisoned") {
            let _ = tx.try_send(TransportEvent::Status(ChannelStatus::Subscribed));
        }
        *self.current.lock().expect("current channel lock poisoned") = Some(tx);
        self.active.fetch_add(1, Ordering::SeqCst);

        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(ChannelHandle { id, events: rx })
    }

    async fn unsubscribe(&self, channel: ChannelId) {
        self.unsubscribed
            .lock()
            .expect("unsubscribed lock poisoned")
            .push(channel);
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    fn active_channel_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock advanced explicitly by tests.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A config with short windows, suitable for paused-time tests.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        subscribe_timeout_ms: 1_000,
        foreground_debounce_ms: 50,
        inactivity_threshold_ms: 60_000,
        reconnect: ReconnectConfig {
            initial_ms: 10,
            max_ms: 160,
            max_attempts: 4,
            jitter_ms: 0,
        },
        health: HealthConfig {
            interval_ms: 1_000,
            stale_after_ms: 10_000,
        },
    }
}

pub fn entry_row(id: EntityId, plan: EntityId, date: &str, status: EntryStatus) -> PartialRecord {
    PartialRecord::from_value(json!({
        "id": id,
        "plan_id": plan,
        "entry_date": date,
        "status": status.as_str(),
    }))
    .expect("fixture row must be an object")
}

pub fn temp_entry_row(temp_id: &str, plan: EntityId, date: &str) -> PartialRecord {
    PartialRecord::from_value(json!({
        "temp_id": temp_id,
        "plan_id": plan,
        "entry_date": date,
        "status": "active",
    }))
    .expect("fixture row must be an object")
}

pub fn plan_row(id: EntityId, name: &str) -> PartialRecord {
    PartialRecord::from_value(json!({ "id": id, "name": name }))
        .expect("fixture row must be an object")
}

pub fn summary_row(plan: EntityId, date: &str, progress: Progress) -> PartialRecord {
    PartialRecord::from_value(json!({
        "id": new_entity_id(),
        "plan_id": plan,
        "summary_date": date,
        "progress": progress.as_str(),
    }))
    .expect("fixture row must be an object")
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Insert),
        Just(ChangeKind::Update),
        Just(ChangeKind::Delete),
    ]
}

pub fn arb_table() -> impl Strategy<Value = EntityTable> {
    prop_oneof![
        Just(EntityTable::Plans),
        Just(EntityTable::Entries),
        Just(EntityTable::Summaries),
    ]
}

pub fn arb_entry_status() -> impl Strategy<Value = EntryStatus> {
    prop_oneof![Just(EntryStatus::Active), Just(EntryStatus::Archived)]
}

pub fn arb_reconnect_config() -> impl Strategy<Value = ReconnectConfig> {
    (1u64..2_000, 0u64..60_000, 1u32..16, 0u64..500).prop_map(
        |(initial_ms, max_delta, max_attempts, jitter_ms)| ReconnectConfig {
            initial_ms,
            max_ms: initial_ms + max_delta,
            max_attempts,
            jitter_ms,
        },
    )
}
