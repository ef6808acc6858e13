//! Engine composition root.
//!
//! `SyncEngine` is an explicitly constructed service object: the host's
//! lifecycle root builds one, holds it, and calls `start`/`stop`. Nothing
//! here lives in module-level mutable state.

use crate::activity::ActivityTracker;
use crate::connection::ConnectionManager;
use crate::router::ChangeRouter;
use livesync_core::{
    AppLifecycle, ChangeEnvelope, ChangeTransport, Clock, ConnectionState, QueryCache, SessionKey,
    SyncConfig, SyncError, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Envelopes queued between the connection task and the dispatch pump.
const DISPATCH_QUEUE_DEPTH: usize = 256;

pub struct SyncEngine {
    manager: ConnectionManager,
    activity: ActivityTracker,
    pump: JoinHandle<()>,
}

impl SyncEngine {
    /// Build an engine over the host's cache and transport. The engine
    /// holds the cache weakly: the host owns it, and events arriving
    /// after the host releases it are dropped, not queued.
    pub fn new(
        cache: &Arc<dyn QueryCache>,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(cache, transport, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        cache: &Arc<dyn QueryCache>,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        let manager = ConnectionManager::new(
            transport,
            Arc::downgrade(cache),
            config.clone(),
            Arc::clone(&clock),
            dispatch_tx,
        );
        let router = ChangeRouter::new(Arc::downgrade(cache));
        let pump = tokio::spawn(run_dispatch(dispatch_rx, router));
        let activity = ActivityTracker::new(
            clock,
            Duration::from_millis(config.inactivity_threshold_ms),
            manager.clone(),
            Arc::downgrade(cache),
        );
        Self {
            manager,
            activity,
            pump,
        }
    }

    /// Open the realtime subscription for a logical session. Idempotent
    /// for the currently-active key.
    pub async fn start(&self, session: SessionKey) {
        self.manager.start(session).await;
    }

    /// Tear the subscription down. With `preserve_session_key`, foreground
    /// and activity recovery can silently resubscribe later.
    pub async fn stop(&self, preserve_session_key: bool) {
        self.manager.stop(preserve_session_key).await;
    }

    /// Feed host lifecycle transitions (already filtered to active /
    /// background by the caller).
    pub fn handle_lifecycle(&self, lifecycle: AppLifecycle) {
        self.manager.handle_lifecycle(lifecycle);
    }

    /// Record a user interaction for staleness tracking.
    pub async fn record_activity(&self) {
        self.activity.record_activity().await;
    }

    pub fn idle_duration(&self) -> Duration {
        self.activity.idle_duration()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_watch()
    }

    /// The degraded-connectivity signal: holds the most recent failure,
    /// including reconnect exhaustion. Read together with
    /// `connection_state`.
    pub fn last_error(&self) -> Option<SyncError> {
        self.manager.last_error()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Dispatch pump: envelopes are routed strictly in arrival order, one at
/// a time, so per-view reconciliation is never reordered.
async fn run_dispatch(mut dispatch_rx: mpsc::Receiver<ChangeEnvelope>, mut router: ChangeRouter) {
    while let Some(envelope) = dispatch_rx.recv().await {
        if let Err(err) = router.dispatch(envelope).await {
            debug!(error = %err, "Reconciliation skipped");
        }
    }
}
