//! Connection lifecycle tests: subscribe/ack, backoff, health checking,
//! foreground debounce, and activity-driven refresh, all on paused time.

use livesync_engine::SyncEngine;
use livesync_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    cache: Arc<MockQueryCache>,
    transport: Arc<ScriptedTransport>,
    clock: ManualClock,
    engine: SyncEngine,
}

fn harness(config: SyncConfig) -> Harness {
    let cache = Arc::new(MockQueryCache::new());
    let as_dyn: Arc<dyn QueryCache> = cache.clone();
    let transport = Arc::new(ScriptedTransport::new());
    let clock = ManualClock::new();
    let engine = SyncEngine::with_clock(
        &as_dyn,
        transport.clone(),
        config,
        Arc::new(clock.clone()),
    );
    Harness {
        cache,
        transport,
        clock,
        engine,
    }
}

/// Count of invalidate calls covering all registered families: a full
/// sweep touches plans, entries, summaries, and stats roots.
fn sweep_invalidates(cache: &MockQueryCache) -> usize {
    let plan = new_entity_id();
    [
        ViewKey::plan_list(),
        ViewKey::entries_active(plan),
        ViewKey::summary(plan, "2026-08-01"),
        ViewKey::stats(plan),
    ]
    .iter()
    .map(|key| cache.invalidates_covering(key))
    .sum()
}

#[tokio::test(start_paused = true)]
async fn start_connects_and_dispatches_changes() {
    let h = harness(test_config());
    let session = new_entity_id();
    let plan = new_entity_id();
    let id = new_entity_id();
    let active = ViewKey::entries_active(plan);
    h.cache.seed(active.clone(), vec![]);

    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);

    h.transport
        .emit_change(ChangeEnvelope::insert(
            EntityTable::Entries,
            entry_row(id, plan, "2026-08-01", EntryStatus::Active),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.cache.view(&active).expect("cached").contains_id(id));
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_for_the_active_session() {
    let h = harness(test_config());
    let session = new_entity_id();

    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.transport.subscribe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_new_session_key_supersedes_the_old_one() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.transport.subscribe_count(), 2);
    assert_eq!(h.transport.unsubscribed().len(), 1);
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn subscribe_failures_back_off_then_recover() {
    let h = harness(test_config());
    h.transport.fail_next_subscribes(2);

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(h.transport.subscribe_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_is_terminal_until_restarted() {
    let h = harness(test_config());
    h.transport.fail_next_subscribes(100);
    let session = new_entity_id();

    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.engine.connection_state(), ConnectionState::Error);
    assert_eq!(
        h.engine.last_error(),
        Some(SyncError::ReconnectExhausted { attempts: 4 })
    );
    // Initial attempt plus max_attempts retries, then nothing further.
    assert_eq!(h.transport.subscribe_count(), 5);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.subscribe_count(), 5);

    // An explicit start recovers.
    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn missing_ack_times_out_into_error() {
    let h = harness(test_config());
    h.transport.set_auto_ack(false);

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_ne!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(
        h.engine.last_error(),
        Some(SyncError::SubscribeTimeout { timeout_ms: 1_000 })
    );
}

#[tokio::test(start_paused = true)]
async fn stop_disconnects_and_unsubscribes() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.engine.stop(false).await;

    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.transport.unsubscribed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_channel_death_forces_reconnect_and_sweep() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    h.cache.clear_journal();

    h.transport.kill_channels_silently();
    // Past the health interval plus the first backoff delay.
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(h.transport.subscribe_count(), 2);
    assert_eq!(sweep_invalidates(&h.cache), 4);
}

#[tokio::test(start_paused = true)]
async fn foreground_transition_debounces_to_one_reconnect() {
    let h = harness(test_config());
    let session = new_entity_id();

    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Connectivity is lost while the app is in the background.
    h.engine.stop(true).await;
    h.cache.clear_journal();
    assert_eq!(h.transport.subscribe_count(), 1);

    h.engine.handle_lifecycle(AppLifecycle::Background);
    h.engine.handle_lifecycle(AppLifecycle::Active);
    h.engine.handle_lifecycle(AppLifecycle::Background);
    h.engine.handle_lifecycle(AppLifecycle::Active);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.transport.subscribe_count(), 2, "rapid flips coalesce to one attempt");
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
    assert_eq!(sweep_invalidates(&h.cache), 4);
}

#[tokio::test(start_paused = true)]
async fn foreground_while_connected_skips_reconnect() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.engine.handle_lifecycle(AppLifecycle::Background);
    h.engine.handle_lifecycle(AppLifecycle::Active);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.transport.subscribe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_interruptions_never_reconnect() {
    let h = harness(test_config());
    let session = new_entity_id();

    h.engine.start(session).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.engine.stop(true).await;

    // Active -> Active is what a filtered system overlay looks like here.
    h.engine.handle_lifecycle(AppLifecycle::Active);
    h.engine.handle_lifecycle(AppLifecycle::Active);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.transport.subscribe_count(), 1);
    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn activity_after_idle_gap_sweeps_the_cache() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.cache.clear_journal();

    h.clock.advance(Duration::from_millis(61_000));
    h.engine.record_activity().await;

    // Channel is healthy: no reconnect, but the cache is distrusted.
    assert_eq!(h.transport.subscribe_count(), 1);
    assert_eq!(sweep_invalidates(&h.cache), 4);
    assert!(h.engine.idle_duration() < Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn activity_within_threshold_is_quiet() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.cache.clear_journal();

    h.clock.advance(Duration::from_millis(10_000));
    h.engine.record_activity().await;

    assert!(h.cache.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn activity_restarts_a_dead_channel() {
    let h = harness(test_config());

    h.engine.start(new_entity_id()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.cache.clear_journal();

    h.transport.kill_channels_silently();
    h.clock.advance(Duration::from_millis(61_000));
    h.engine.record_activity().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.transport.subscribe_count(), 2);
    assert_eq!(h.engine.connection_state(), ConnectionState::Connected);
}
