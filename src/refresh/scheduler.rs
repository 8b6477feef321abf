//! Scheduled background work: template refresh and cache maintenance.
//!
//! Template refresh runs every `refresh_interval` with a random offset of up
//! to `jitter` in either direction, so a fleet of clients does not hit the
//! poster backend in lockstep. Cache maintenance (expiry sweep, then size
//! cap) runs on its own fixed interval, starting with one pass at startup.
//!
//! Both loops stop as soon as the scheduler's cancellation token fires. A
//! maintenance pass already in progress observes the same token between
//! removals.

use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::error::LoadError;
use crate::refresh::{RefreshService, RefreshStats};
use crate::types::now_ms;
use log::{error, info, warn};

/// Configuration for the background scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base interval between template refreshes
    pub refresh_interval: Duration,
    /// Maximum random offset applied to each refresh delay
    pub jitter: Duration,
    /// Interval between cache maintenance passes
    pub cache_maintenance_interval: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            jitter: Duration::from_secs(60),
            cache_maintenance_interval: Duration::from_secs(15 * 60),
            enabled: true,
        }
    }
}

/// Scheduler for periodic template refresh and cache upkeep.
///
/// Spawned once by the composition root. Failures are logged and never stop
/// the loop; a failed refresh leaves the active snapshot in place.
pub struct RefreshScheduler {
    service: Arc<RefreshService>,
    cache: Option<Arc<CacheStore>>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    /// Timestamp of the last successful refresh
    last_refresh_at: Arc<RwLock<u64>>,
}

impl RefreshScheduler {
    pub fn new(
        service: Arc<RefreshService>,
        cache: Option<Arc<CacheStore>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            cache,
            config,
            cancel: CancellationToken::new(),
            last_refresh_at: Arc::new(RwLock::new(now_ms())),
        }
    }

    /// Share a shutdown token with the rest of the process.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both loops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Milliseconds since UNIX epoch of the last successful refresh, or
    /// construction time if none has happened yet.
    pub fn last_refresh(&self) -> u64 {
        *self.last_refresh_at.read()
    }

    /// Refresh outside the schedule. Updates `last_refresh()` on success.
    pub async fn refresh_now(&self) -> Result<RefreshStats, LoadError> {
        let stats = self.service.refresh_now().await?;
        *self.last_refresh_at.write() = stats.timestamp;
        Ok(stats)
    }

    /// Run until cancelled. Returns immediately when disabled.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Scheduled refresh is disabled, skipping");
            return;
        }

        info!(
            "Starting scheduler: refresh every {}s (±{}s), cache maintenance every {}s",
            self.config.refresh_interval.as_secs(),
            self.config.jitter.as_secs(),
            self.config.cache_maintenance_interval.as_secs()
        );

        let mut next_refresh = Instant::now() + self.next_refresh_delay();
        let mut maintenance = interval(self.config.cache_maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Scheduler cancelled, exiting");
                    break;
                }
                _ = sleep_until(next_refresh) => {
                    self.do_refresh().await;
                    next_refresh = Instant::now() + self.next_refresh_delay();
                }
                _ = maintenance.tick(), if self.cache.is_some() => {
                    self.do_maintenance().await;
                }
            }
        }
    }

    /// `refresh_interval` shifted by a uniform offset in `[-jitter, +jitter]`.
    fn next_refresh_delay(&self) -> Duration {
        let base = self.config.refresh_interval.as_millis() as i64;
        let jitter = self.config.jitter.as_millis() as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_millis((base + offset).max(1) as u64)
    }

    async fn do_refresh(&self) {
        match self.refresh_now().await {
            Ok(stats) => info!(
                "Scheduled refresh completed: {} templates in {}ms (generation {})",
                stats.templates_loaded, stats.duration_ms, stats.generation
            ),
            Err(e) => error!("Scheduled refresh failed, keeping current templates: {}", e),
        }
    }

    async fn do_maintenance(&self) {
        let Some(cache) = self.cache.clone() else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || {
            let expired = cache.cleanup_expired();
            let evicted = cache.enforce_limit();
            (expired, evicted, cache.get_total_size())
        })
        .await;

        match result {
            Ok((expired, evicted, total)) => info!(
                "Cache maintenance: {} expired, {} evicted, {} bytes in use",
                expired, evicted, total
            ),
            Err(e) => warn!("Cache maintenance task failed: {}", e),
        }
    }
}
