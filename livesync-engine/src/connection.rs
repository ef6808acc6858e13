//! Connection lifecycle management.
//!
//! One spawned task owns the subscribe -> ack -> pump -> backoff loop for
//! a session. Health checks run interleaved with the event pump; a failed
//! check tears the channel down and resubscribes, then sweeps the cache,
//! since a silently-dead connection may have dropped events.

use crate::reconcile::sweep_cache;
use livesync_core::{
    AppLifecycle, ChangeEnvelope, ChangeTransport, ChannelId, ChannelStatus, Clock,
    ConnectionState, EntityTable, QueryCache, ReconnectConfig, SessionKey, SyncConfig, SyncError,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// BACKOFF
// ============================================================================

/// Deterministic reconnect delay: `min(initial * 2^attempt, max)`.
pub fn backoff_delay(reconnect: &ReconnectConfig, attempt: u32) -> Duration {
    let doubled = reconnect
        .initial_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(doubled.min(reconnect.max_ms))
}

/// Spread reconnect storms without a RNG dependency: derive jitter from
/// the subsecond clock, as an additive term on the deterministic delay.
pub fn jittered(delay: Duration, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return delay;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    delay + Duration::from_millis(nanos % jitter_ms)
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn ChangeTransport>,
    cache: Weak<dyn QueryCache>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    dispatch_tx: mpsc::Sender<ChangeEnvelope>,
    state_tx: watch::Sender<ConnectionState>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    stored_key: Mutex<Option<SessionKey>>,
    last_error: Mutex<Option<SyncError>>,
    lifecycle: Mutex<AppLifecycle>,
    debounce: Mutex<Option<JoinHandle<()>>>,
    /// Reentrancy flag for the forced-reconnect path: at most one forced
    /// restart in flight.
    restarting: AtomicBool,
}

struct ActiveSession {
    key: SessionKey,
    task: JoinHandle<()>,
    channel: Arc<Mutex<Option<ChannelId>>>,
}

/// Why the event pump stopped.
enum StreamEnd {
    Closed,
    Errored(String),
    Stale(String),
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn ChangeTransport>,
        cache: Weak<dyn QueryCache>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        dispatch_tx: mpsc::Sender<ChangeEnvelope>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                cache,
                config,
                clock,
                dispatch_tx,
                state_tx,
                session: tokio::sync::Mutex::new(None),
                stored_key: Mutex::new(None),
                last_error: Mutex::new(None),
                lifecycle: Mutex::new(AppLifecycle::Active),
                debounce: Mutex::new(None),
                restarting: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions; the host reads connectivity from this.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The error behind a terminal `Error` state, if any.
    pub fn last_error(&self) -> Option<SyncError> {
        self.inner.last_error.lock().expect("last_error lock poisoned").clone()
    }

    /// Open (or keep) the subscription for `key`.
    ///
    /// A second `start` with the key of a live session is a no-op. Any
    /// other live session is torn down first.
    pub async fn start(&self, key: SessionKey) {
        self.start_internal(key, false).await;
    }

    async fn start_internal(&self, key: SessionKey, sweep_on_connect: bool) {
        let mut session = self.inner.session.lock().await;
        if !sweep_on_connect {
            if let Some(active) = session.as_ref() {
                if active.key == key && !active.task.is_finished() {
                    debug!(session = %key, "Session already active; start is a no-op");
                    return;
                }
            }
        }
        teardown(&mut session, &self.inner).await;
        *self.inner.stored_key.lock().expect("stored_key lock poisoned") = Some(key);

        let channel = Arc::new(Mutex::new(None));
        let task = tokio::spawn(run_session(
            Arc::clone(&self.inner),
            key,
            Arc::clone(&channel),
            sweep_on_connect,
        ));
        *session = Some(ActiveSession { key, task, channel });
        info!(session = %key, sweep_on_connect, "Realtime session started");
    }

    /// Tear down the subscription. The logical session key survives when
    /// `preserve_session_key` is set, so foreground or activity recovery
    /// can resubscribe without the caller re-supplying it.
    pub async fn stop(&self, preserve_session_key: bool) {
        let mut session = self.inner.session.lock().await;
        teardown(&mut session, &self.inner).await;
        if !preserve_session_key {
            *self.inner.stored_key.lock().expect("stored_key lock poisoned") = None;
        }
        info!(preserve_session_key, "Realtime session stopped");
    }

    /// Forced reconnect: tear down and resubscribe with the stored key,
    /// superseding whatever attempt was in progress, then sweep the cache
    /// once connected (events may have been dropped in between).
    /// Reentrant calls are dropped while one restart is in flight.
    pub async fn force_restart(&self) {
        if self.inner.restarting.swap(true, Ordering::SeqCst) {
            debug!("Forced restart already in flight; skipping");
            return;
        }
        let key = *self.inner.stored_key.lock().expect("stored_key lock poisoned");
        match key {
            Some(key) => self.start_internal(key, true).await,
            None => {
                let mut session = self.inner.session.lock().await;
                teardown(&mut session, &self.inner).await;
                debug!("No stored session key; forced restart ends disconnected");
            }
        }
        self.inner.restarting.store(false, Ordering::SeqCst);
    }

    /// Host lifecycle signal. Only a genuine background -> active
    /// transition reconnects, debounced to coalesce rapid flips; system
    /// overlays and other transient interruptions never reach this far
    /// (the caller filters them) and an already-connected session skips
    /// reconnection entirely.
    pub fn handle_lifecycle(&self, next: AppLifecycle) {
        let prev = {
            let mut slot = self.inner.lifecycle.lock().expect("lifecycle lock poisoned");
            std::mem::replace(&mut *slot, next)
        };
        if !(prev == AppLifecycle::Background && next == AppLifecycle::Active) {
            return;
        }
        if self.state() == ConnectionState::Connected {
            debug!("Foregrounded while connected; no reconnect needed");
            return;
        }

        let manager = self.clone();
        let delay = Duration::from_millis(self.inner.config.foreground_debounce_ms);
        let mut pending = self.inner.debounce.lock().expect("debounce lock poisoned");
        if let Some(task) = pending.take() {
            task.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.state() == ConnectionState::Connected
                || manager.inner.restarting.load(Ordering::SeqCst)
            {
                return;
            }
            info!("Reconnecting after foreground transition");
            manager.force_restart().await;
        }));
    }

    /// Immediate liveness verdict, used by the activity tracker.
    pub fn channel_is_live(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.transport.active_channel_count() > 0
    }
}

impl ManagerInner {
    fn set_state(&self, next: ConnectionState) {
        let current = *self.state_tx.borrow();
        debug_assert!(current.may_transition(next), "{current} -> {next}");
        if current != next {
            debug!(from = %current, to = %next, "Connection state transition");
            self.state_tx.send_replace(next);
        }
    }

    fn record_error(&self, err: SyncError) {
        *self.last_error.lock().expect("last_error lock poisoned") = Some(err);
    }
}

async fn teardown(session: &mut Option<ActiveSession>, inner: &ManagerInner) {
    if let Some(active) = session.take() {
        active.task.abort();
        let channel = active.channel.lock().expect("channel slot poisoned").take();
        if let Some(id) = channel {
            inner.transport.unsubscribe(id).await;
        }
    }
    inner.set_state(ConnectionState::Disconnected);
}

// ============================================================================
// SESSION TASK
// ============================================================================

async fn run_session(
    inner: Arc<ManagerInner>,
    key: SessionKey,
    channel: Arc<Mutex<Option<ChannelId>>>,
    sweep_on_connect: bool,
) {
    let reconnect = inner.config.reconnect.clone();
    let subscribe_timeout = Duration::from_millis(inner.config.subscribe_timeout_ms);
    let mut attempt: u32 = 0;
    let mut needs_sweep = sweep_on_connect;

    loop {
        inner.set_state(ConnectionState::Connecting);

        let subscribed = tokio::time::timeout(
            subscribe_timeout,
            subscribe_and_ack(&inner, key, &channel),
        )
        .await;

        match subscribed {
            Ok(Ok(events)) => {
                inner.set_state(ConnectionState::Connected);
                attempt = 0;
                if needs_sweep {
                    needs_sweep = false;
                    if let Some(cache) = inner.cache.upgrade() {
                        info!("Sweeping cache after forced reconnect");
                        sweep_cache(cache.as_ref()).await;
                    }
                }

                let end = pump_events(&inner, events).await;
                let id = channel.lock().expect("channel slot poisoned").take();
                if let Some(id) = id {
                    inner.transport.unsubscribe(id).await;
                }
                match end {
                    StreamEnd::Stale(reason) => {
                        warn!(reason = %reason, "Health check failed; forcing reconnect");
                        inner.record_error(SyncError::StaleConnection { reason });
                        needs_sweep = true;
                    }
                    StreamEnd::Closed => warn!("Realtime channel closed; reconnecting"),
                    StreamEnd::Errored(message) => {
                        warn!(error = %message, "Realtime channel failed; reconnecting");
                        inner.record_error(SyncError::Transport { message });
                    }
                }
                inner.set_state(ConnectionState::Error);
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Subscribe failed");
                inner.record_error(err);
                inner.set_state(ConnectionState::Error);
            }
            Err(_) => {
                let err = SyncError::SubscribeTimeout {
                    timeout_ms: inner.config.subscribe_timeout_ms,
                };
                warn!(error = %err, "Subscribe timed out");
                inner.record_error(err);
                let id = channel.lock().expect("channel slot poisoned").take();
                if let Some(id) = id {
                    inner.transport.unsubscribe(id).await;
                }
                inner.set_state(ConnectionState::Error);
            }
        }

        attempt += 1;
        if attempt > reconnect.max_attempts {
            let err = SyncError::ReconnectExhausted {
                attempts: reconnect.max_attempts,
            };
            error!(attempts = reconnect.max_attempts, "Reconnect exhausted; staying in error state");
            inner.record_error(err);
            return;
        }

        let delay = jittered(backoff_delay(&reconnect, attempt - 1), reconnect.jitter_ms);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Subscribe and wait for the ack status. The channel id is published to
/// the shared slot as soon as the transport returns it, so teardown can
/// always unsubscribe even when the ack never arrives. Changes that race
/// ahead of the ack are forwarded, not dropped.
async fn subscribe_and_ack(
    inner: &ManagerInner,
    key: SessionKey,
    channel: &Mutex<Option<ChannelId>>,
) -> Result<mpsc::Receiver<TransportEvent>, SyncError> {
    let mut handle = inner.transport.subscribe(key, &EntityTable::ALL).await?;
    *channel.lock().expect("channel slot poisoned") = Some(handle.id);

    loop {
        match handle.events.recv().await {
            Some(TransportEvent::Status(ChannelStatus::Subscribed)) => return Ok(handle.events),
            Some(TransportEvent::Status(ChannelStatus::Errored(reason))) => {
                return Err(SyncError::TransportSubscribe { reason })
            }
            Some(TransportEvent::Status(ChannelStatus::Closed)) | None => {
                return Err(SyncError::TransportSubscribe {
                    reason: "channel closed before ack".to_string(),
                })
            }
            Some(TransportEvent::Change(envelope)) => {
                let _ = inner.dispatch_tx.send(envelope).await;
            }
        }
    }
}

/// Pump change events into the dispatch queue, checking channel health on
/// a fixed interval, until the channel ends or goes stale.
async fn pump_events(inner: &ManagerInner, mut events: mpsc::Receiver<TransportEvent>) -> StreamEnd {
    let interval = Duration::from_millis(inner.config.health.interval_ms);
    let stale_after = Duration::from_millis(inner.config.health.stale_after_ms);
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.reset();
    let mut last_ok = inner.clock.now();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Change(envelope)) => {
                    let _ = inner.dispatch_tx.send(envelope).await;
                }
                Some(TransportEvent::Status(ChannelStatus::Subscribed)) => {}
                Some(TransportEvent::Status(ChannelStatus::Closed)) | None => {
                    return StreamEnd::Closed;
                }
                Some(TransportEvent::Status(ChannelStatus::Errored(message))) => {
                    return StreamEnd::Errored(message);
                }
            },
            _ = tick.tick() => {
                let now = inner.clock.now();
                if inner.transport.active_channel_count() == 0 {
                    return StreamEnd::Stale("transport reports no active channel".to_string());
                }
                if now.saturating_duration_since(last_ok) > stale_after {
                    return StreamEnd::Stale("no successful health check within staleness window".to_string());
                }
                last_ok = now;
                debug!("Health check passed");
            }
        }
    }
}
