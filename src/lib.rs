//! # Poster Recall
//!
//! Client-side poster recognition and generated-video caching.
//!
//! Camera frames are reduced to 256-bit difference hashes and compared
//! against an immutable snapshot of reference templates. Template reloads
//! publish a new snapshot without disturbing matches in flight. Videos
//! generated for a recognised poster are kept in a SQLite-indexed local
//! cache with retention, size cap and integrity checks.

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod recall;
pub mod refresh;
pub mod store;
pub mod template;
pub mod types;

pub use cache::{CacheConfig, CacheEntry, CacheStats, CacheStore, CachedVideo, LipCoordinates};
pub use config::RecallConfig;
pub use error::{CacheError, ConfigError, LoadError, RecallError};
pub use fingerprint::{hamming_similarity, Fingerprint};
pub use matcher::{DetectionPhase, DetectionState, MatchOutcome, MatchResult, Matcher, MatcherConfig};
pub use recall::{PosterRecall, RecallStats};
pub use refresh::{RefreshScheduler, RefreshService, RefreshStats, SchedulerConfig};
pub use store::{
    AssetSource, HttpTemplateSource, LoadReport, LocalAssetSource, RemoteTemplateSource, StoreStats,
    TemplateSnapshot, TemplateSourceConfig, TemplateStore,
};
pub use template::{Dialogue, ReferenceTemplate, TemplateRecord};
pub use types::{Clock, ManualClock, SystemClock};
