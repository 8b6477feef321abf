//! End-to-end recognition tests against templates loaded from disk.
//!
//! Tests verify:
//! - Debounce and cooldown gating over a realistic timeline
//! - Robustness to brightness shifts and resolution changes
//! - Threshold rejection of unrelated frames
//! - Template reloads racing with matches in flight

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recall::{
    LocalAssetSource, ManualClock, MatchOutcome, Matcher, MatcherConfig, TemplateStore,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POSTERS: u64 = 5;

/// Blocky seeded noise so each poster has a distinct, stable structure.
fn poster_image(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cells: Vec<[u8; 3]> = (0..16 * 16)
        .map(|_| {
            [
                rng.gen_range(20..200),
                rng.gen_range(20..200),
                rng.gen_range(20..200),
            ]
        })
        .collect();

    RgbImage::from_fn(160, 128, |x, y| {
        let cell = (y / 8) as usize * 16 + (x / 10) as usize;
        Rgb(cells[cell])
    })
}

fn write_assets(dir: &Path) {
    let mut records = Vec::new();
    for i in 0..POSTERS {
        let file = format!("poster-{}.png", i);
        poster_image(i)
            .save_with_format(dir.join(&file), ImageFormat::Png)
            .unwrap();
        records.push(serde_json::json!({
            "id": format!("poster-{}", i),
            "name": format!("Poster {}", i),
            "description": format!("Exhibit number {}", i),
            "imageUrl": file,
            "dialogues": [{"speaker": "guide", "text": format!("Welcome to exhibit {}", i)}],
        }));
    }
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_vec(&serde_json::json!({ "posters": records })).unwrap(),
    )
    .unwrap();
}

fn setup(dir: &Path, config: MatcherConfig) -> (Arc<TemplateStore>, Matcher, Arc<ManualClock>) {
    write_assets(dir);
    let assets = Arc::new(LocalAssetSource::new(dir, "manifest.json"));
    let store = Arc::new(TemplateStore::new(None, assets, 512));
    assert_eq!(store.load_from_local_assets().unwrap(), POSTERS as usize);

    let clock = Arc::new(ManualClock::new(10_000_000));
    let matcher = Matcher::new(store.clone(), config, clock.clone());
    (store, matcher, clock)
}

fn frame(seed: u64) -> DynamicImage {
    DynamicImage::ImageRgb8(poster_image(seed))
}

// ============================================================================
// TIMELINE
// ============================================================================

#[test]
fn test_detection_timeline() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let (_store, matcher, clock) = setup(tmp_dir.path(), MatcherConfig::default());
    let poster = frame(3);

    // t = 0: confirmed
    let first = matcher.match_frame(&poster).unwrap();
    assert_eq!(first.id, "poster-3");
    assert_eq!(first.name, "Poster 3");
    assert_eq!(first.description.as_deref(), Some("Exhibit number 3"));
    assert_eq!(first.dialogues[0].text, "Welcome to exhibit 3");
    assert_eq!(first.dialogues[0].speaker.as_deref(), Some("guide"));
    assert!(first.confidence > 0.99);

    // t = 0.5s: debounced
    clock.advance(Duration::from_millis(500));
    assert!(matches!(matcher.evaluate(&poster), MatchOutcome::Debounced));

    // t = 3s: evaluated but inside the cooldown for the same poster
    clock.advance(Duration::from_millis(2_500));
    assert!(matches!(
        matcher.evaluate(&poster),
        MatchOutcome::Suppressed { ref id, .. } if id == "poster-3"
    ));

    // t = 9s: cooldown over
    clock.advance(Duration::from_secs(6));
    let again = matcher.match_frame(&poster).unwrap();
    assert_eq!(again.id, "poster-3");
}

#[test]
fn test_switching_posters_is_not_suppressed() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let (_store, matcher, clock) = setup(tmp_dir.path(), MatcherConfig::default());

    assert_eq!(matcher.match_frame(&frame(1)).unwrap().id, "poster-1");
    clock.advance(Duration::from_secs(2));
    assert_eq!(matcher.match_frame(&frame(4)).unwrap().id, "poster-4");
    clock.advance(Duration::from_secs(2));
    // poster-1 is no longer the last confirmation
    assert_eq!(matcher.match_frame(&frame(1)).unwrap().id, "poster-1");
}

// ============================================================================
// ROBUSTNESS
// ============================================================================

#[test]
fn test_brightness_shift_still_matches() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let (_store, matcher, _clock) = setup(tmp_dir.path(), MatcherConfig::default());

    let mut brighter = poster_image(2);
    for pixel in brighter.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = channel.saturating_add(40);
        }
    }

    let result = matcher.match_frame(&DynamicImage::ImageRgb8(brighter)).unwrap();
    assert_eq!(result.id, "poster-2");
    assert!(result.confidence > 0.9, "confidence {}", result.confidence);
}

#[test]
fn test_rescaled_frame_still_matches() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let (_store, matcher, _clock) = setup(tmp_dir.path(), MatcherConfig::default());

    let large = frame(0).resize_exact(1280, 1024, image::imageops::FilterType::Nearest);
    let result = matcher.match_frame(&large).unwrap();
    assert_eq!(result.id, "poster-0");
    assert!(result.confidence > 0.75, "confidence {}", result.confidence);
}

#[test]
fn test_unrelated_frame_is_rejected() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = MatcherConfig {
        match_threshold: 0.8,
        ..MatcherConfig::default()
    };
    let (_store, matcher, _clock) = setup(tmp_dir.path(), config);

    let stranger = frame(9_999);
    match matcher.evaluate(&stranger) {
        MatchOutcome::NoMatch { best_similarity } => assert!(best_similarity < 0.8),
        other => panic!("expected NoMatch, got {:?}", other),
    }
    assert!(matcher.state().last_confirmed_id.is_none());
}

// ============================================================================
// RELOAD DURING MATCHING
// ============================================================================

#[test]
fn test_reload_while_matching() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = MatcherConfig {
        debounce_interval: Duration::ZERO,
        cooldown_window: Duration::ZERO,
        ..MatcherConfig::default()
    };
    let (store, matcher, _clock) = setup(tmp_dir.path(), config);
    let matcher = Arc::new(matcher);

    let reloader = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                store.load_from_local_assets().unwrap();
            }
        })
    };

    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let matcher = matcher.clone();
            thread::spawn(move || {
                let poster = frame(t);
                let expected = format!("poster-{}", t);
                let mut last_generation = 0;
                for _ in 0..50 {
                    let result = matcher.match_frame(&poster).unwrap();
                    assert_eq!(result.id, expected);
                    assert!(result.generation >= last_generation);
                    last_generation = result.generation;
                }
            })
        })
        .collect();

    reloader.join().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = store.stats();
    assert_eq!(stats.generation, 21);
    assert_eq!(stats.template_count, POSTERS as usize);
    assert_eq!(stats.in_flight_readers, 0);
    assert_eq!(stats.retired_snapshots, 0);
}

#[test]
fn test_failed_reload_keeps_active_templates() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let (store, matcher, _clock) = setup(tmp_dir.path(), MatcherConfig::default());
    let generation = store.generation();

    std::fs::write(tmp_dir.path().join("manifest.json"), b"{ not json").unwrap();
    assert!(store.load_from_local_assets().is_err());

    assert_eq!(store.generation(), generation);
    assert_eq!(matcher.match_frame(&frame(1)).unwrap().id, "poster-1");
}
