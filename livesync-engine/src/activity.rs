//! Activity and staleness tracking.
//!
//! A cache nobody has touched for a long gap is distrusted outright, even
//! when the connection nominally stayed up: the process may have been
//! suspended with the socket intact and events lost in between.

use crate::connection::ConnectionManager;
use crate::reconcile::sweep_cache;
use livesync_core::{Clock, QueryCache};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct ActivityTracker {
    clock: Arc<dyn Clock>,
    threshold: Duration,
    last_activity: Mutex<Instant>,
    manager: ConnectionManager,
    cache: Weak<dyn QueryCache>,
}

impl ActivityTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        inactivity_threshold: Duration,
        manager: ConnectionManager,
        cache: Weak<dyn QueryCache>,
    ) -> Self {
        let now = clock.now();
        Self {
            clock,
            threshold: inactivity_threshold,
            last_activity: Mutex::new(now),
            manager,
            cache,
        }
    }

    /// Time since the last recorded activity.
    pub fn idle_duration(&self) -> Duration {
        let last = *self.last_activity.lock().expect("last_activity lock poisoned");
        self.clock.now().saturating_duration_since(last)
    }

    /// Record a user interaction.
    ///
    /// Crossing the inactivity threshold runs an immediate health check -
    /// forcing a reconnect when the channel is dead - and then a full
    /// invalidate-and-refetch-active sweep regardless of the verdict.
    pub async fn record_activity(&self) {
        let now = self.clock.now();
        let idle = {
            let mut last = self.last_activity.lock().expect("last_activity lock poisoned");
            let idle = now.saturating_duration_since(*last);
            *last = now;
            idle
        };
        if idle <= self.threshold {
            debug!(idle_ms = idle.as_millis() as u64, "Activity recorded");
            return;
        }

        info!(
            idle_ms = idle.as_millis() as u64,
            "Activity after idle gap; refreshing cache"
        );
        if !self.manager.channel_is_live() {
            self.manager.force_restart().await;
        }
        if let Some(cache) = self.cache.upgrade() {
            sweep_cache(cache.as_ref()).await;
        }
    }
}
