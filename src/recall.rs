//! Composition root wiring the template store, matcher, video cache and
//! background scheduler together.
//!
//! # Lifecycle
//! 1. `from_config` / `build` creates every component and opens the cache
//! 2. `prewarm` loads the bundled templates so matching works offline
//! 3. `spawn_background` starts the scheduler (first remote refresh is
//!    scheduled, cache maintenance runs once immediately)
//! 4. `shutdown` cancels the scheduler and any in-progress cache sweep

use crate::cache::{CacheStats, CacheStore, CachedVideo};
use crate::config::RecallConfig;
use crate::error::{LoadError, RecallError};
use crate::matcher::{MatchResult, Matcher};
use crate::refresh::{RefreshScheduler, RefreshService, RefreshStats};
use crate::store::{
    AssetSource, HttpTemplateSource, LocalAssetSource, RemoteTemplateSource, StoreStats,
    TemplateStore,
};
use crate::types::{Clock, SystemClock};
use image::DynamicImage;
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One client process worth of poster recognition and video caching.
pub struct PosterRecall {
    config: RecallConfig,
    store: Arc<TemplateStore>,
    matcher: Arc<Matcher>,
    cache: Arc<CacheStore>,
    scheduler: Arc<RefreshScheduler>,
    cancel: CancellationToken,
}

impl PosterRecall {
    /// Build with the system clock, the configured HTTP source (if any) and
    /// the bundled assets directory.
    pub fn from_config(config: RecallConfig) -> Result<Self, RecallError> {
        let remote = match &config.templates.remote_url {
            Some(url) => Some(Arc::new(HttpTemplateSource::new(
                url,
                config.templates.request_timeout,
            )?) as Arc<dyn RemoteTemplateSource>),
            None => None,
        };
        let assets: Arc<dyn AssetSource> = Arc::new(LocalAssetSource::new(
            &config.templates.assets_dir,
            config.templates.manifest_name.clone(),
        ));

        Self::build(config, Arc::new(SystemClock), remote, assets)
    }

    /// Build from explicit collaborators.
    pub fn build(
        config: RecallConfig,
        clock: Arc<dyn Clock>,
        remote: Option<Arc<dyn RemoteTemplateSource>>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Self, RecallError> {
        let cancel = CancellationToken::new();

        let store = Arc::new(TemplateStore::new(
            remote,
            assets,
            config.templates.working_resolution,
        ));
        let matcher = Arc::new(Matcher::new(
            store.clone(),
            config.matcher.clone(),
            clock.clone(),
        ));
        let cache = Arc::new(
            CacheStore::open(config.cache.clone(), clock)?.with_cancellation(cancel.child_token()),
        );
        let service = Arc::new(RefreshService::new(store.clone()));
        let scheduler = Arc::new(
            RefreshScheduler::new(service, Some(cache.clone()), config.scheduler.clone())
                .with_cancellation(cancel.child_token()),
        );

        info!(
            "Poster recall ready (threshold {:.2}, cache {})",
            config.matcher.match_threshold,
            config.cache.db_path.display()
        );

        Ok(Self {
            config,
            store,
            matcher,
            cache,
            scheduler,
            cancel,
        })
    }

    /// Load bundled templates. Returns how many were published.
    pub fn prewarm(&self) -> Result<usize, LoadError> {
        self.store.load_from_local_assets()
    }

    /// Reload templates from the remote source now.
    pub async fn refresh_now(&self) -> Result<RefreshStats, LoadError> {
        self.scheduler.refresh_now().await
    }

    /// Start the background scheduler on the current tokio runtime.
    pub fn spawn_background(&self) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().start())
    }

    /// Stop background work. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutting down poster recall");
            self.cancel.cancel();
        }
    }

    pub fn match_frame(&self, frame: &DynamicImage) -> Option<MatchResult> {
        self.matcher.match_frame(frame)
    }

    /// Content for `id` started playing; restarts its cooldown.
    pub fn on_playback_started(&self, id: &str) {
        self.matcher.on_playback_started(id)
    }

    /// Previously generated video for a confirmed poster, if still valid.
    pub fn cached_video(&self, result: &MatchResult) -> Option<CachedVideo> {
        self.cache.retrieve(&result.id)
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn stats(&self) -> RecallStats {
        RecallStats {
            templates: self.store.stats(),
            cache: self.cache.stats(),
            last_refresh: self.scheduler.last_refresh(),
        }
    }
}

impl Drop for PosterRecall {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Combined statistics.
#[derive(Debug, Clone)]
pub struct RecallStats {
    pub templates: StoreStats,
    pub cache: CacheStats,
    /// Last successful template refresh (ms since epoch)
    pub last_refresh: u64,
}
