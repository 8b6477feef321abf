//! Video cache - generated videos keyed by poster id.
//!
//! The index lives in SQLite so it survives restarts and is mirrored in
//! memory together with a running byte total. Video bytes stay on disk at
//! the recorded path; this module decides when they are deleted.
//!
//! # Table
//! ```text
//! video_cache(poster_id PK, video_path, lip_coordinates_json, checksum,
//!             cached_at_ms, size_bytes)
//! ```

use super::checksum::{checksums_match, file_checksum};
use super::types::{CacheConfig, CacheEntry, CacheStats, CachedVideo, LipCoordinates, RemovalReason};
use crate::error::CacheError;
use crate::types::Clock;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// In-memory mirror of the table plus the incremental size total.
struct CacheIndex {
    conn: Connection,
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    last_cached_at: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_removed: AtomicU64,
    evicted: AtomicU64,
    self_healed: AtomicU64,
}

/// Persistent cache of generated videos.
///
/// # Thread Safety
/// One mutex guards the connection and the index. Checksums are computed
/// outside it, so a slow hash never blocks other lookups; removals after a
/// hash re-check that the entry was not replaced in the meantime.
pub struct CacheStore {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    index: Mutex<CacheIndex>,
    counters: Counters,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("CacheStore")
            .field("db_path", &self.config.db_path)
            .field("entries", &index.entries.len())
            .field("total_size", &index.total_size)
            .finish()
    }
}

impl CacheStore {
    /// Open or create the cache database and load its index.
    pub fn open(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS video_cache (
                poster_id TEXT PRIMARY KEY,
                video_path TEXT NOT NULL,
                lip_coordinates_json TEXT NOT NULL,
                checksum TEXT NOT NULL,
                cached_at_ms INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_video_cache_cached_at ON video_cache (cached_at_ms);",
        )?;

        let entries = load_entries(&conn)?;
        let total_size = entries.values().map(|e| e.size_bytes).sum();
        let last_cached_at = entries.values().map(|e| e.cached_at).max().unwrap_or(0);

        info!(
            "Opened video cache at {} ({} entries, {} bytes)",
            config.db_path.display(),
            entries.len(),
            total_size
        );

        Ok(Self {
            config,
            clock,
            index: Mutex::new(CacheIndex {
                conn,
                entries,
                total_size,
                last_cached_at,
            }),
            counters: Counters::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Tie cleanup passes to an external shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ============================================================================================
    // WRITES
    // ============================================================================================

    /// Record a generated video for `poster_id`.
    ///
    /// An existing entry for the same key is replaced and its file deleted
    /// (unless it is the same path). Afterwards the oldest entries are evicted
    /// until the total fits `max_size_bytes`; that pass ignores cancellation.
    ///
    /// # Arguments
    /// - `poster_id`: template id the video was generated for
    /// - `video_path`: finished video on disk; its size is read from metadata
    /// - `lip_coordinates`: tracking data returned with the hit
    /// - `checksum`: lowercase or uppercase hex SHA-256 of the file
    ///
    /// # Returns
    /// The entry as written, or `CacheError::Integrity` when `verify_on_store`
    /// is set and the file does not hash to `checksum`.
    ///
    /// # Example
    /// ```rust,no_run
    /// use recall::{CacheConfig, CacheStore, LipCoordinates, SystemClock};
    /// use std::sync::Arc;
    ///
    /// let cache = CacheStore::open(CacheConfig::default(), Arc::new(SystemClock))?;
    /// let checksum = recall::cache::file_checksum("/tmp/poster-3.mp4")?;
    /// cache.store("poster-3", "/tmp/poster-3.mp4", LipCoordinates::default(), &checksum)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn store<P: AsRef<Path>>(
        &self,
        poster_id: &str,
        video_path: P,
        lip_coordinates: LipCoordinates,
        checksum: &str,
    ) -> Result<CachedVideo, CacheError> {
        let video_path = video_path.as_ref().to_path_buf();
        let size_bytes = fs::metadata(&video_path)?.len();

        if self.config.verify_on_store {
            let actual = file_checksum(&video_path)?;
            if !checksums_match(checksum, &actual) {
                return Err(CacheError::Integrity {
                    poster_id: poster_id.to_string(),
                    expected: checksum.to_string(),
                    actual,
                });
            }
        }

        let lip_json = serde_json::to_string(&lip_coordinates)?;
        let checksum = checksum.trim().to_ascii_lowercase();

        let entry = {
            let mut index = self.index.lock();
            let cached_at = self.clock.now_ms().max(index.last_cached_at + 1);

            index.conn.execute(
                "INSERT OR REPLACE INTO video_cache (
                    poster_id, video_path, lip_coordinates_json, checksum, cached_at_ms, size_bytes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    poster_id,
                    video_path.to_string_lossy(),
                    lip_json,
                    checksum,
                    cached_at as i64,
                    size_bytes as i64
                ],
            )?;

            let entry = CacheEntry {
                poster_id: poster_id.to_string(),
                video_path: video_path.clone(),
                lip_coordinates,
                checksum,
                cached_at,
                size_bytes,
            };

            index.last_cached_at = cached_at;
            index.total_size += size_bytes;
            if let Some(previous) = index.entries.insert(poster_id.to_string(), entry.clone()) {
                index.total_size = index.total_size.saturating_sub(previous.size_bytes);
                if previous.video_path != video_path {
                    remove_backing_file(&previous.video_path, RemovalReason::Replaced);
                }
            }
            entry
        };

        debug!(
            "Cached video for {} at {} ({} bytes)",
            poster_id,
            entry.video_path.display(),
            entry.size_bytes
        );

        // Never cancellable: the cap must hold for every write
        self.evict_until(&|| false);
        Ok(entry.into())
    }

    // ============================================================================================
    // READS
    // ============================================================================================

    /// Fetch a valid entry for `poster_id`.
    ///
    /// The entry must exist, be within the retention window and hash to its
    /// recorded checksum. The file is hashed outside the index lock.
    ///
    /// # Returns
    /// - `Some(CachedVideo)` on a hit
    /// - `None` on a miss. Expired or corrupted entries are removed along
    ///   with their files before returning, so a bad entry is never served twice.
    ///
    /// # Example
    /// ```rust,no_run
    /// # use recall::{CacheConfig, CacheStore, SystemClock};
    /// # use std::sync::Arc;
    /// # let cache = CacheStore::open(CacheConfig::default(), Arc::new(SystemClock))?;
    /// match cache.retrieve("poster-3") {
    ///     Some(video) => println!("play {}", video.video_path.display()),
    ///     None => println!("generate a new video"),
    /// }
    /// # Ok::<(), recall::CacheError>(())
    /// ```
    pub fn retrieve(&self, poster_id: &str) -> Option<CachedVideo> {
        let Some(entry) = self.index.lock().entries.get(poster_id).cloned() else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let now = self.clock.now_ms();
        if entry.is_expired(now, self.config.retention) {
            debug!("Cached video for {} expired", poster_id);
            if self.remove_if_current(&entry, RemovalReason::Expired) {
                self.counters.expired_removed.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if !self.entry_is_intact(&entry) {
            if self.remove_if_current(&entry, RemovalReason::Corrupted) {
                self.counters.self_healed.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.into())
    }

    /// Present, unexpired and the file exists. Does not read the file.
    pub fn is_cached(&self, poster_id: &str) -> bool {
        let now = self.clock.now_ms();
        let index = self.index.lock();
        match index.entries.get(poster_id) {
            Some(entry) => {
                !entry.is_expired(now, self.config.retention) && entry.video_path.is_file()
            }
            None => false,
        }
    }

    /// Recompute the stored file's checksum and compare it with the recorded one.
    pub fn validate_integrity(&self, poster_id: &str) -> bool {
        let entry = self.index.lock().entries.get(poster_id).cloned();
        match entry {
            Some(entry) => self.entry_is_intact(&entry),
            None => false,
        }
    }

    /// Sum of `size_bytes` across live entries, tracked incrementally.
    pub fn get_total_size(&self) -> u64 {
        self.index.lock().total_size
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live entry, oldest first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<_> = self.index.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.cached_at);
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, total_size_bytes) = {
            let index = self.index.lock();
            (index.entries.len(), index.total_size)
        };

        CacheStats {
            entries,
            total_size_bytes,
            max_size_bytes: self.config.max_size_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired_removed: self.counters.expired_removed.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            self_healed: self.counters.self_healed.load(Ordering::Relaxed),
        }
    }

    // ============================================================================================
    // MAINTENANCE
    // ============================================================================================

    /// Remove every entry past the retention window.
    ///
    /// Checks the cancellation token before each removal, so a shutdown
    /// during a large sweep returns after at most one more file deletion.
    ///
    /// # Returns
    /// Number of entries removed by this pass.
    pub fn cleanup_expired(&self) -> usize {
        self.remove_expired_until(&|| self.cancel.is_cancelled())
    }

    /// Evict oldest entries until the total is within the cap.
    ///
    /// This is the maintenance entry point and stops early on cancellation.
    /// The pass that follows every `store()` is not cancellable, so the cap
    /// holds even after shutdown.
    ///
    /// # Returns
    /// Number of entries evicted by this pass.
    pub fn enforce_limit(&self) -> usize {
        self.evict_until(&|| self.cancel.is_cancelled())
    }

    /// Expiry sweep that consults `stop` before each removal.
    fn remove_expired_until(&self, stop: &dyn Fn() -> bool) -> usize {
        let now = self.clock.now_ms();
        let mut expired: Vec<CacheEntry> = self
            .index
            .lock()
            .entries
            .values()
            .filter(|e| e.is_expired(now, self.config.retention))
            .cloned()
            .collect();
        expired.sort_by_key(|e| e.cached_at);

        let mut removed = 0;
        for entry in &expired {
            if stop() {
                info!("Expiry cleanup cancelled after {} removals", removed);
                break;
            }
            if self.remove_if_current(entry, RemovalReason::Expired) {
                removed += 1;
            }
        }

        if removed > 0 {
            self.counters
                .expired_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
            info!("Removed {} expired cached videos", removed);
        }
        removed
    }

    /// Oldest-first eviction that consults `stop` before each removal.
    fn evict_until(&self, stop: &dyn Fn() -> bool) -> usize {
        let mut removed = 0;

        loop {
            let mut index = self.index.lock();
            if index.total_size <= self.config.max_size_bytes {
                break;
            }

            if stop() {
                info!("Size enforcement cancelled after {} evictions", removed);
                break;
            }

            let Some(oldest) = index.entries.values().min_by_key(|e| e.cached_at).cloned() else {
                // Index empty but total drifted; resync
                index.total_size = 0;
                break;
            };

            remove_locked(&mut index, &oldest, RemovalReason::Evicted);
            removed += 1;
        }

        if removed > 0 {
            self.counters.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            info!(
                "Evicted {} cached videos to stay under {} bytes",
                removed, self.config.max_size_bytes
            );
        }
        removed
    }

    /// Remove one entry and its file.
    pub fn remove(&self, poster_id: &str) -> bool {
        let mut index = self.index.lock();
        match index.entries.get(poster_id).cloned() {
            Some(entry) => {
                remove_locked(&mut index, &entry, RemovalReason::Explicit);
                true
            }
            None => false,
        }
    }

    /// Remove every entry and its file. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut index = self.index.lock();
        if let Err(e) = index.conn.execute("DELETE FROM video_cache", []) {
            error!("Failed to clear video cache table: {}", e);
        }

        let drained: Vec<CacheEntry> = index.entries.drain().map(|(_, e)| e).collect();
        index.total_size = 0;
        drop(index);

        for entry in &drained {
            remove_backing_file(&entry.video_path, RemovalReason::Explicit);
        }

        info!("Cleared {} cached videos", drained.len());
        drained.len()
    }

    // ============================================================================================
    // INTERNALS
    // ============================================================================================

    fn entry_is_intact(&self, entry: &CacheEntry) -> bool {
        match file_checksum(&entry.video_path) {
            Ok(actual) if checksums_match(&entry.checksum, &actual) => true,
            Ok(actual) => {
                warn!(
                    "Cached video for {} is corrupted: expected {}, found {}",
                    entry.poster_id, entry.checksum, actual
                );
                false
            }
            Err(e) => {
                warn!(
                    "Cached video for {} unreadable at {}: {}",
                    entry.poster_id,
                    entry.video_path.display(),
                    e
                );
                false
            }
        }
    }

    /// Remove `entry` unless it was replaced since it was read.
    fn remove_if_current(&self, entry: &CacheEntry, reason: RemovalReason) -> bool {
        let mut index = self.index.lock();
        let still_current = index
            .entries
            .get(&entry.poster_id)
            .map(|e| e.cached_at == entry.cached_at)
            .unwrap_or(false);

        if still_current {
            remove_locked(&mut index, entry, reason);
        }
        still_current
    }
}

fn remove_locked(index: &mut CacheIndex, entry: &CacheEntry, reason: RemovalReason) {
    if let Err(e) = index.conn.execute(
        "DELETE FROM video_cache WHERE poster_id = ?1",
        params![entry.poster_id],
    ) {
        error!("Failed to delete cache row for {}: {}", entry.poster_id, e);
    }

    if let Some(removed) = index.entries.remove(&entry.poster_id) {
        index.total_size = index.total_size.saturating_sub(removed.size_bytes);
    }

    remove_backing_file(&entry.video_path, reason);
    debug!("Removed cached video for {} ({:?})", entry.poster_id, reason);
}

fn remove_backing_file(path: &Path, reason: RemovalReason) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to delete cached video {} ({:?}): {}",
            path.display(),
            reason,
            e
        ),
    }
}

fn load_entries(conn: &Connection) -> Result<HashMap<String, CacheEntry>, CacheError> {
    let mut stmt = conn.prepare(
        "SELECT poster_id, video_path, lip_coordinates_json, checksum, cached_at_ms, size_bytes
         FROM video_cache",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let (poster_id, video_path, lip_json, checksum, cached_at, size_bytes) = row?;
        let lip_coordinates = match serde_json::from_str(&lip_json) {
            Ok(coords) => coords,
            Err(e) => {
                warn!("Unreadable lip coordinates for {}: {}", poster_id, e);
                LipCoordinates::default()
            }
        };

        entries.insert(
            poster_id.clone(),
            CacheEntry {
                poster_id,
                video_path: PathBuf::from(video_path),
                lip_coordinates,
                checksum,
                cached_at: cached_at.max(0) as u64,
                size_bytes: size_bytes.max(0) as u64,
            },
        );
    }

    Ok(entries)
}
