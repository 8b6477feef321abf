//! Local cache of generated videos.
//!
//! - **Index**: SQLite table mirrored in memory with a running size total
//! - **Retention**: entries older than 24h are misses and get removed
//! - **Capacity**: oldest entries are evicted above 500MB
//! - **Integrity**: SHA-256 re-validation on retrieve, corrupted entries self-heal

pub mod checksum;
pub mod types;
pub mod video_cache;

pub use checksum::{bytes_checksum, file_checksum};
pub use types::{
    CacheConfig, CacheEntry, CacheStats, CachedVideo, LipCoordinates, RemovalReason,
    DEFAULT_MAX_SIZE_BYTES, DEFAULT_RETENTION,
};
pub use video_cache::CacheStore;
