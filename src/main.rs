//! # Poster Recall Entry Point
//!
//! Builds the client from the environment (or a JSON file named by
//! `POSTER_RECALL_CONFIG`), pre-warms templates from the bundled assets,
//! starts background refresh and cache maintenance, and matches any image
//! files passed as arguments. Runs until Ctrl-C.

use log::{error, info, warn};
use recall::{PosterRecall, RecallConfig};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::var("POSTER_RECALL_CONFIG") {
        Ok(path) => RecallConfig::from_json_file(&path)?,
        Err(_) => RecallConfig::from_env(),
    };

    println!("=================================================");
    println!("  Poster Recall - Recognition & Video Cache      ");
    println!("=================================================");
    println!();

    let recall = match PosterRecall::from_config(config) {
        Ok(recall) => recall,
        Err(e) => {
            eprintln!("✗ Failed to initialize: {}", e);
            return Err(e.into());
        }
    };

    match recall.prewarm() {
        Ok(count) => println!("✓ {} bundled templates loaded", count),
        Err(e) => warn!("Bundled templates unavailable: {}", e),
    }

    let cache_stats = recall.cache().stats();
    println!("Video Cache:");
    println!("  - Database: {}", recall.config().cache.db_path.display());
    println!("  - Entries: {}", cache_stats.entries);
    println!(
        "  - Size: {} / {} bytes",
        cache_stats.total_size_bytes, cache_stats.max_size_bytes
    );
    println!();

    if let Some(url) = &recall.config().templates.remote_url {
        println!("Refreshing templates from {}...", url);
        match recall.refresh_now().await {
            Ok(stats) => println!(
                "✓ {} templates (generation {}) in {}ms",
                stats.templates_loaded, stats.generation, stats.duration_ms
            ),
            Err(e) => warn!("Initial refresh failed, continuing with bundled set: {}", e),
        }
        println!();
    }

    for arg in std::env::args().skip(1) {
        match_file(&recall, Path::new(&arg));
        // Each argument is a separate attempt
        recall.matcher().reset();
    }

    let background = recall.spawn_background();

    info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    recall.shutdown();
    if let Err(e) = background.await {
        error!("Scheduler task ended abnormally: {}", e);
    }

    println!("=================================================");
    println!("  Poster Recall Shut Down");
    println!("=================================================");

    Ok(())
}

fn match_file(recall: &PosterRecall, path: &Path) {
    let frame = match image::open(path) {
        Ok(frame) => frame,
        Err(e) => {
            eprintln!("✗ {}: {}", path.display(), e);
            return;
        }
    };

    match recall.match_frame(&frame) {
        Some(result) => {
            println!(
                "✓ {} → {} ({}) confidence {:.3}",
                path.display(),
                result.id,
                result.name,
                result.confidence
            );
            match recall.cached_video(&result) {
                Some(video) => println!("  cached video: {}", video.video_path.display()),
                None => println!("  no cached video"),
            }
        }
        None => println!("✗ {}: no poster recognised", path.display()),
    }
}
