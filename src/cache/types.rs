//! Video cache data structures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retention window for generated videos.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Size cap across all cached videos.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Configuration for the video cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// SQLite database holding the cache index
    pub db_path: PathBuf,
    /// Entries older than this are treated as misses and removed
    pub retention: Duration,
    /// Oldest entries are evicted while the total exceeds this
    pub max_size_bytes: u64,
    /// Hash the file on `store()` and reject a mismatching checksum
    pub verify_on_store: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./var/data/video_cache.db"),
            retention: DEFAULT_RETENTION,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            verify_on_store: true,
        }
    }
}

/// Mouth-region tracking data produced alongside a generated video.
///
/// The cache stores it as opaque JSON; only the presentation layer reads it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LipCoordinates(pub serde_json::Value);

impl From<serde_json::Value> for LipCoordinates {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// One row of the cache index.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub poster_id: String,
    pub video_path: PathBuf,
    pub lip_coordinates: LipCoordinates,
    /// Lowercase hex SHA-256 of the video file
    pub checksum: String,
    /// When the entry was written (ms since epoch); sole eviction key
    pub cached_at: u64,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: u64, retention: Duration) -> bool {
        now.saturating_sub(self.cached_at) > retention.as_millis() as u64
    }
}

/// Cache hit handed back to the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedVideo {
    pub poster_id: String,
    pub video_path: PathBuf,
    pub lip_coordinates: LipCoordinates,
    pub checksum: String,
    pub cached_at: u64,
    pub size_bytes: u64,
}

impl From<CacheEntry> for CachedVideo {
    fn from(entry: CacheEntry) -> Self {
        Self {
            poster_id: entry.poster_id,
            video_path: entry.video_path,
            lip_coordinates: entry.lip_coordinates,
            checksum: entry.checksum,
            cached_at: entry.cached_at,
            size_bytes: entry.size_bytes,
        }
    }
}

/// Why an entry left the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    Replaced,
    Expired,
    Evicted,
    Corrupted,
    Explicit,
}

/// Statistics about cache usage.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Live entries
    pub entries: usize,
    /// Sum of `size_bytes` across live entries
    pub total_size_bytes: u64,
    /// Configured cap
    pub max_size_bytes: u64,
    /// Successful retrievals
    pub hits: u64,
    /// Retrievals that returned nothing
    pub misses: u64,
    /// Entries removed for age
    pub expired_removed: u64,
    /// Entries removed for size
    pub evicted: u64,
    /// Entries removed after failing integrity validation
    pub self_healed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.max_size_bytes, 524_288_000);
        assert!(config.verify_on_store);
        assert_eq!(config.db_path, PathBuf::from("./var/data/video_cache.db"));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let entry = CacheEntry {
            poster_id: "p".to_string(),
            video_path: PathBuf::from("p.mp4"),
            lip_coordinates: LipCoordinates::default(),
            checksum: String::new(),
            cached_at: 1_000,
            size_bytes: 1,
        };
        let day = DEFAULT_RETENTION;
        let day_ms = day.as_millis() as u64;
        assert!(!entry.is_expired(1_000 + day_ms, day));
        assert!(entry.is_expired(1_000 + day_ms + 1, day));
    }

    #[test]
    fn test_lip_coordinates_are_transparent_json() {
        let coords = LipCoordinates(serde_json::json!([{"t": 0, "x": 0.5, "y": 0.25}]));
        let encoded = serde_json::to_string(&coords).unwrap();
        assert_eq!(encoded, r#"[{"t":0,"x":0.5,"y":0.25}]"#);
        let decoded: LipCoordinates = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, coords);
    }
}
