//! Integration tests for the generated-video cache.
//!
//! Tests verify:
//! - Retention: entries past 24h are misses and are removed with their files
//! - Capacity: oldest entries are evicted until the total fits the cap
//! - Integrity: corrupted or missing files self-heal on retrieve
//! - Replacement releases the previous file and its size
//! - Concurrent stores and retrievals keep the size total consistent

use recall::cache::bytes_checksum;
use recall::{CacheConfig, CacheError, CacheStore, LipCoordinates, ManualClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn open(dir: &Path, clock: Arc<ManualClock>, max_size_bytes: u64) -> CacheStore {
    let config = CacheConfig {
        db_path: dir.join("db").join("video_cache.db"),
        max_size_bytes,
        ..CacheConfig::default()
    };
    CacheStore::open(config, clock).unwrap()
}

/// Write a fake video of `size` bytes and return its path and checksum.
fn video(dir: &Path, name: &str, size: usize) -> (PathBuf, String) {
    let bytes: Vec<u8> = (0..size).map(|i| (i * 31 + name.len()) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &bytes).unwrap();
    (path, bytes_checksum(&bytes))
}

fn coords() -> LipCoordinates {
    LipCoordinates(serde_json::json!([{"t": 0, "points": [[0.4, 0.6], [0.5, 0.62]]}]))
}

// ============================================================================
// BASIC FUNCTIONALITY
// ============================================================================

#[test]
fn test_store_and_retrieve() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(1_000)), u64::MAX);
    let (path, sum) = video(tmp_dir.path(), "p1.mp4", 1_024);

    cache.store("p1", &path, coords(), &sum).unwrap();
    assert!(cache.is_cached("p1"));
    assert!(cache.validate_integrity("p1"));

    let hit = cache.retrieve("p1").unwrap();
    assert_eq!(hit.poster_id, "p1");
    assert_eq!(hit.video_path, path);
    assert_eq!(hit.lip_coordinates, coords());
    assert_eq!(hit.checksum, sum);
    assert_eq!(hit.size_bytes, 1_024);
    assert_eq!(cache.get_total_size(), 1_024);
}

#[test]
fn test_unknown_key_is_miss() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);

    assert!(cache.retrieve("nope").is_none());
    assert!(!cache.is_cached("nope"));
    assert!(!cache.validate_integrity("nope"));
}

#[test]
fn test_checksum_mismatch_rejected_on_store() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);
    let (path, _) = video(tmp_dir.path(), "p1.mp4", 64);

    let err = cache
        .store("p1", &path, coords(), &bytes_checksum(b"something else"))
        .unwrap_err();
    assert!(matches!(err, CacheError::Integrity { ref poster_id, .. } if poster_id == "p1"));
    assert!(!cache.is_cached("p1"));
    assert!(path.exists(), "rejected store must not delete the caller's file");
}

// ============================================================================
// RETENTION
// ============================================================================

#[test]
fn test_expired_entry_is_miss_and_removed() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = open(tmp_dir.path(), clock.clone(), u64::MAX);
    let (path, sum) = video(tmp_dir.path(), "p1.mp4", 128);
    cache.store("p1", &path, coords(), &sum).unwrap();

    clock.advance(DAY);
    assert!(cache.retrieve("p1").is_some(), "exactly 24h old is still valid");

    clock.advance(Duration::from_millis(1));
    assert!(!cache.is_cached("p1"));
    assert!(cache.retrieve("p1").is_none());
    assert!(!path.exists());
    assert_eq!(cache.get_total_size(), 0);
    assert_eq!(cache.stats().expired_removed, 1);
}

#[test]
fn test_cleanup_expired_keeps_fresh_entries() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let cache = open(tmp_dir.path(), clock.clone(), u64::MAX);

    let (old_a, sum_a) = video(tmp_dir.path(), "a.mp4", 10);
    let (old_b, sum_b) = video(tmp_dir.path(), "b.mp4", 10);
    cache.store("a", &old_a, coords(), &sum_a).unwrap();
    cache.store("b", &old_b, coords(), &sum_b).unwrap();

    clock.advance(Duration::from_secs(20 * 60 * 60));
    let (fresh, sum_c) = video(tmp_dir.path(), "c.mp4", 10);
    cache.store("c", &fresh, coords(), &sum_c).unwrap();

    clock.advance(Duration::from_secs(5 * 60 * 60));
    assert_eq!(cache.cleanup_expired(), 2);
    assert_eq!(cache.len(), 1);
    assert!(cache.is_cached("c"));
    assert!(!old_a.exists());
    assert!(!old_b.exists());
    assert_eq!(cache.get_total_size(), 10);
}

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_capacity_evicts_oldest_first() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    // 6 x 100 bytes against a 500 byte cap
    let cache = open(tmp_dir.path(), clock.clone(), 500);

    let mut paths = Vec::new();
    for i in 0..6 {
        clock.advance(Duration::from_secs(1));
        let (path, sum) = video(tmp_dir.path(), &format!("{}.mp4", i), 100);
        cache.store(&format!("p{}", i), &path, coords(), &sum).unwrap();
        paths.push(path);
    }

    assert_eq!(cache.get_total_size(), 500);
    assert!(!cache.is_cached("p0"));
    assert!(!paths[0].exists());
    for i in 1..6 {
        assert!(cache.is_cached(&format!("p{}", i)), "p{} should survive", i);
    }
    assert_eq!(cache.stats().evicted, 1);
}

#[test]
fn test_capacity_eviction_removes_several() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let cache = open(tmp_dir.path(), clock.clone(), 500);

    for i in 0..4 {
        clock.advance(Duration::from_secs(1));
        let (path, sum) = video(tmp_dir.path(), &format!("{}.mp4", i), 100);
        cache.store(&format!("p{}", i), &path, coords(), &sum).unwrap();
    }

    clock.advance(Duration::from_secs(1));
    let (big, sum) = video(tmp_dir.path(), "big.mp4", 350);
    cache.store("big", &big, coords(), &sum).unwrap();

    // 750 bytes: p0, p1 and p2 go, leaving p3 + big = 450
    assert_eq!(cache.get_total_size(), 450);
    assert!(cache.is_cached("p3"));
    assert!(cache.is_cached("big"));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_single_oversized_video_is_evicted() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), 100);
    let (path, sum) = video(tmp_dir.path(), "huge.mp4", 101);

    let stored = cache.store("huge", &path, coords(), &sum).unwrap();
    assert_eq!(stored.size_bytes, 101);
    assert!(!cache.is_cached("huge"));
    assert_eq!(cache.get_total_size(), 0);
}

// ============================================================================
// INTEGRITY
// ============================================================================

#[test]
fn test_corrupted_file_self_heals() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);
    let (path, sum) = video(tmp_dir.path(), "p1.mp4", 256);
    cache.store("p1", &path, coords(), &sum).unwrap();

    std::fs::write(&path, b"truncated").unwrap();
    assert!(!cache.validate_integrity("p1"));

    assert!(cache.retrieve("p1").is_none());
    assert!(!path.exists());
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.get_total_size(), 0);
    assert_eq!(cache.stats().self_healed, 1);
}

#[test]
fn test_missing_file_self_heals() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);
    let (path, sum) = video(tmp_dir.path(), "p1.mp4", 256);
    cache.store("p1", &path, coords(), &sum).unwrap();

    std::fs::remove_file(&path).unwrap();
    assert!(!cache.is_cached("p1"));
    assert!(cache.retrieve("p1").is_none());
    assert!(cache.is_empty());
}

// ============================================================================
// REPLACEMENT AND PERSISTENCE
// ============================================================================

#[test]
fn test_replace_releases_previous_video() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);

    let (first, sum_first) = video(tmp_dir.path(), "v1.mp4", 300);
    let (second, sum_second) = video(tmp_dir.path(), "v2.mp4", 200);
    cache.store("p1", &first, coords(), &sum_first).unwrap();
    cache.store("p1", &second, coords(), &sum_second).unwrap();

    assert!(!first.exists());
    assert!(second.exists());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_total_size(), 200);
    assert_eq!(cache.retrieve("p1").unwrap().video_path, second);
}

#[test]
fn test_replace_with_same_path_keeps_file() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);

    let (path, sum) = video(tmp_dir.path(), "p1.mp4", 300);
    cache.store("p1", &path, coords(), &sum).unwrap();
    cache.store("p1", &path, LipCoordinates::default(), &sum).unwrap();

    assert!(path.exists());
    assert_eq!(cache.get_total_size(), 300);
    assert_eq!(
        cache.retrieve("p1").unwrap().lip_coordinates,
        LipCoordinates::default()
    );
}

#[test]
fn test_reopen_restores_index_and_total() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));

    {
        let cache = open(tmp_dir.path(), clock.clone(), u64::MAX);
        for i in 0..3 {
            let (path, sum) = video(tmp_dir.path(), &format!("{}.mp4", i), 100 + i);
            cache.store(&format!("p{}", i), &path, coords(), &sum).unwrap();
        }
        assert!(cache.remove("p1"));
    }

    let cache = open(tmp_dir.path(), clock, u64::MAX);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get_total_size(), 100 + 102);
    assert!(cache.retrieve("p0").is_some());
    assert!(cache.retrieve("p1").is_none());
    assert!(cache.retrieve("p2").is_some());
}

#[test]
fn test_clear_removes_everything() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX);

    let mut paths = Vec::new();
    for i in 0..4 {
        let (path, sum) = video(tmp_dir.path(), &format!("{}.mp4", i), 50);
        cache.store(&format!("p{}", i), &path, coords(), &sum).unwrap();
        paths.push(path);
    }

    assert_eq!(cache.clear(), 4);
    assert!(cache.is_empty());
    assert_eq!(cache.get_total_size(), 0);
    assert!(paths.iter().all(|p| !p.exists()));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_store_and_retrieve() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(open(tmp_dir.path(), Arc::new(ManualClock::new(0)), u64::MAX));
    let dir = tmp_dir.path().to_path_buf();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            let dir = dir.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let key = format!("t{}-{}", t, i);
                    let (path, sum) = video(&dir, &format!("{}.mp4", key), 64);
                    cache.store(&key, &path, coords(), &sum).unwrap();
                    assert!(cache.retrieve(&key).is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 40);
    assert_eq!(cache.get_total_size(), 40 * 64);

    let stamps: Vec<u64> = cache.entries().iter().map(|e| e.cached_at).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "cached_at must be unique");
}
