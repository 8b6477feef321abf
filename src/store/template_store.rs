use super::snapshot::{SnapshotCell, SnapshotGuard, TemplateSnapshot};
use super::source::{AssetSource, RemoteTemplateSource};
use crate::error::LoadError;
use crate::fingerprint::DEFAULT_WORKING_RESOLUTION;
use crate::template::{ReferenceTemplate, TemplateRecord};
use crate::types::now_ms;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Where templates come from and how they are prepared.
#[derive(Clone, Debug)]
pub struct TemplateSourceConfig {
    /// Poster list endpoint; `None` means bundled assets only
    pub remote_url: Option<String>,
    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Duration,
    /// Directory holding the bundled manifest and images
    pub assets_dir: PathBuf,
    /// Manifest file name inside `assets_dir`
    pub manifest_name: String,
    /// Longest side of the canonical working resolution
    pub working_resolution: u32,
}

impl Default for TemplateSourceConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            request_timeout: Duration::from_secs(10),
            assets_dir: PathBuf::from("./assets/posters"),
            manifest_name: "manifest.json".to_string(),
            working_resolution: DEFAULT_WORKING_RESOLUTION,
        }
    }
}

/// Which collaborator produced the active snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateOrigin {
    Remote,
    LocalAssets,
}

// ================================================================================================
// TEMPLATE STORE
// ================================================================================================

/// Owner of every template snapshot.
///
/// Loads build a complete template list off to the side and publish it with
/// one swap. Matches pin whatever snapshot is active when they start, so a
/// reload never changes the templates under a running comparison.
pub struct TemplateStore {
    snapshots: SnapshotCell,
    remote: Option<Arc<dyn RemoteTemplateSource>>,
    assets: Arc<dyn AssetSource>,
    working_resolution: u32,
    last_origin: RwLock<Option<(TemplateOrigin, u64)>>,
}

impl TemplateStore {
    pub fn new(
        remote: Option<Arc<dyn RemoteTemplateSource>>,
        assets: Arc<dyn AssetSource>,
        working_resolution: u32,
    ) -> Self {
        Self {
            snapshots: SnapshotCell::new(),
            remote,
            assets,
            working_resolution,
            last_origin: RwLock::new(None),
        }
    }

    // ============================================================================================
    // LOADING
    // ============================================================================================

    /// Rebuild from the remote source, falling back to bundled assets when the
    /// remote yields nothing usable.
    ///
    /// # Returns
    ///
    /// The number of templates published. Use [`reload_from_remote`] when the
    /// generation of the new snapshot is also needed.
    ///
    /// # Errors
    ///
    /// Fails only when neither the remote nor the bundled assets produced a
    /// single template. The active snapshot is left untouched in that case.
    ///
    /// [`reload_from_remote`]: TemplateStore::reload_from_remote
    pub async fn load_from_remote(&self) -> Result<usize, LoadError> {
        self.reload_from_remote().await.map(|report| report.templates)
    }

    /// Like [`load_from_remote`](TemplateStore::load_from_remote), but reports
    /// the generation this call published.
    pub async fn reload_from_remote(&self) -> Result<LoadReport, LoadError> {
        let Some(remote) = self.remote.clone() else {
            info!("No remote template source configured, loading bundled assets");
            return self.reload_local_off_thread().await;
        };

        match self.build_from_remote(remote.as_ref()).await {
            Ok(templates) if !templates.is_empty() => {
                self.publish_loaded(templates, TemplateOrigin::Remote, &remote.describe())
            }
            Ok(_) => {
                warn!(
                    "Remote source {} produced no templates, falling back to bundled assets",
                    remote.describe()
                );
                self.reload_local_off_thread().await
            }
            Err(e) => {
                warn!(
                    "Remote source {} failed: {}, falling back to bundled assets",
                    remote.describe(),
                    e
                );
                self.reload_local_off_thread().await
            }
        }
    }

    /// Rebuild from the bundled manifest. On failure the active snapshot is kept.
    ///
    /// Decodes on the calling thread; async callers go through
    /// [`load_from_remote`](TemplateStore::load_from_remote).
    pub fn load_from_local_assets(&self) -> Result<usize, LoadError> {
        self.reload_from_local_assets().map(|report| report.templates)
    }

    pub fn reload_from_local_assets(&self) -> Result<LoadReport, LoadError> {
        let templates = build_from_assets(self.assets.as_ref(), self.working_resolution)?;
        self.publish_loaded(templates, TemplateOrigin::LocalAssets, &self.assets.describe())
    }

    /// Bundled-asset rebuild on the blocking pool.
    async fn reload_local_off_thread(&self) -> Result<LoadReport, LoadError> {
        let assets = Arc::clone(&self.assets);
        let max_side = self.working_resolution;
        let templates =
            tokio::task::spawn_blocking(move || build_from_assets(assets.as_ref(), max_side))
                .await
                .map_err(|e| LoadError::Task(e.to_string()))??;
        self.publish_loaded(templates, TemplateOrigin::LocalAssets, &self.assets.describe())
    }

    /// Download and fingerprint every manifest item, skipping the ones that fail.
    async fn build_from_remote(
        &self,
        remote: &dyn RemoteTemplateSource,
    ) -> Result<Vec<ReferenceTemplate>, LoadError> {
        let records = remote.fetch_manifest().await?;
        if records.is_empty() {
            return Err(LoadError::EmptyManifest);
        }

        let mut templates = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();
        for record in records {
            if !seen.insert(record.id.clone()) {
                warn!("Skipping duplicate template id {} from remote", record.id);
                continue;
            }

            let bytes = match remote.fetch_image(&record.image_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping template {}: download failed: {}", record.id, e);
                    continue;
                }
            };

            let id = record.id.clone();
            match self.fingerprint_off_thread(record, bytes).await {
                Ok(template) => templates.push(template),
                Err(e) => warn!("Skipping template {}: {}", id, e),
            }
        }

        Ok(templates)
    }

    /// Decode and hash on the blocking pool so the runtime threads stay free.
    async fn fingerprint_off_thread(
        &self,
        record: TemplateRecord,
        bytes: Vec<u8>,
    ) -> Result<ReferenceTemplate, LoadError> {
        let max_side = self.working_resolution;
        tokio::task::spawn_blocking(move || ReferenceTemplate::from_record(record, &bytes, max_side))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?
    }

    /// Swap in a non-empty template list. An empty one leaves the active
    /// snapshot in place and fails with `NoTemplates`.
    fn publish_loaded(
        &self,
        templates: Vec<ReferenceTemplate>,
        origin: TemplateOrigin,
        source_name: &str,
    ) -> Result<LoadReport, LoadError> {
        if templates.is_empty() {
            warn!(
                "No templates built from {}; keeping generation {}",
                source_name,
                self.generation()
            );
            return Err(LoadError::NoTemplates {
                source_name: source_name.to_string(),
            });
        }

        let count = templates.len();
        let generation = self.snapshots.publish(templates);
        *self.last_origin.write() = Some((origin, now_ms()));
        info!(
            "Loaded {} templates from {} (generation {})",
            count, source_name, generation
        );
        Ok(LoadReport {
            templates: count,
            generation,
            origin,
        })
    }

    // ============================================================================================
    // READ ACCESS
    // ============================================================================================

    /// Pin the active snapshot for one match.
    pub fn acquire(&self) -> SnapshotGuard<'_> {
        self.snapshots.acquire()
    }

    /// Active snapshot without joining the reader count; for inspection only.
    pub fn current(&self) -> Arc<TemplateSnapshot> {
        self.snapshots.current()
    }

    /// Templates in the active snapshot; 0 before the first successful load.
    pub fn template_count(&self) -> usize {
        self.snapshots.current().len()
    }

    /// Generation of the active snapshot.
    ///
    /// Starts at 0 for the empty snapshot and increases by one per publish.
    /// Another load may publish right after this returns; a loader that needs
    /// its own generation should read it from [`LoadReport`].
    pub fn generation(&self) -> u64 {
        self.snapshots.current().generation()
    }

    pub fn stats(&self) -> StoreStats {
        let current = self.snapshots.current();
        let origin = *self.last_origin.read();
        StoreStats {
            generation: current.generation(),
            template_count: current.len(),
            in_flight_readers: self.snapshots.in_flight_readers(),
            retired_snapshots: self.snapshots.retired_count(),
            last_origin: origin.map(|(o, _)| o),
            last_loaded_at: origin.map(|(_, at)| at),
        }
    }
}

/// Outcome of one successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Templates in the published snapshot
    pub templates: usize,
    /// Generation assigned to that snapshot
    pub generation: u64,
    pub origin: TemplateOrigin,
}

/// Read the bundled manifest and fingerprint every entry, skipping duplicates
/// and entries whose image is unreadable or undecodable.
fn build_from_assets(
    assets: &dyn AssetSource,
    max_side: u32,
) -> Result<Vec<ReferenceTemplate>, LoadError> {
    let records = assets.read_manifest().map_err(|e| {
        warn!("Bundled manifest {} unreadable: {}", assets.describe(), e);
        e
    })?;

    let mut templates = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.id.clone()) {
            warn!("Skipping duplicate template id {} in bundled manifest", record.id);
            continue;
        }

        let bytes = match assets.read_image(&record.image_url) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping template {}: {} unreadable: {}", record.id, record.image_url, e);
                continue;
            }
        };

        let id = record.id.clone();
        match ReferenceTemplate::from_record(record, &bytes, max_side) {
            Ok(template) => templates.push(template),
            Err(e) => warn!("Skipping template {}: {}", id, e),
        }
    }

    Ok(templates)
}

/// Template store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Generation of the active snapshot
    pub generation: u64,

    /// Templates in the active snapshot
    pub template_count: usize,

    /// Matches currently holding a snapshot
    pub in_flight_readers: usize,

    /// Replaced snapshots waiting for readers to drain
    pub retired_snapshots: usize,

    /// Collaborator that produced the active snapshot
    pub last_origin: Option<TemplateOrigin>,

    /// When the active snapshot was published (ms since epoch)
    pub last_loaded_at: Option<u64>,
}

// ================================================================================================
// TESTS
// ================================================================================================
