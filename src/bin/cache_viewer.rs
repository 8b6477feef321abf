//! # Cache Viewer CLI
//!
//! Command-line tool for inspecting and maintaining the generated-video cache.
//!
//! Usage:
//!   cache_viewer stats
//!   cache_viewer list [--limit N] [--format json|pretty]
//!   cache_viewer show <poster_id>
//!   cache_viewer verify <poster_id>
//!   cache_viewer cleanup
//!   cache_viewer clear [--yes]

use clap::{Parser, Subcommand};
use recall::{CacheConfig, CacheEntry, CacheStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cache_viewer")]
#[command(about = "Inspect and maintain the poster video cache", long_about = None)]
struct Cli {
    /// Path to the cache database
    #[arg(short, long, default_value = "./var/data/video_cache.db")]
    db: PathBuf,

    /// Size cap in megabytes used by `cleanup`
    #[arg(long, default_value_t = 500)]
    max_size_mb: u64,

    /// Retention in hours used by `cleanup` and expiry reporting
    #[arg(long, default_value_t = 24)]
    retention_hours: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show aggregate statistics
    Stats,

    /// List cached videos, oldest first
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output format: json, pretty
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Show one entry in detail
    Show {
        /// Poster ID
        poster_id: String,
    },

    /// Recompute a video's checksum and compare with the recorded one
    Verify {
        /// Poster ID
        poster_id: String,
    },

    /// Remove expired entries, then evict until under the size cap
    Cleanup,

    /// Remove every entry and its video file
    Clear {
        /// Skip the confirmation notice
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config = CacheConfig {
        db_path: cli.db.clone(),
        retention: std::time::Duration::from_secs(cli.retention_hours.saturating_mul(60 * 60)),
        max_size_bytes: cli.max_size_mb.saturating_mul(1024 * 1024),
        verify_on_store: true,
    };
    let cache = CacheStore::open(config, Arc::new(SystemClock)).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::Stats => {
            let stats = cache.stats();
            let expired = cache
                .entries()
                .iter()
                .filter(|e| e.is_expired(recall::types::now_ms(), cache.config().retention))
                .count();

            println!("📊 Video Cache Statistics\n");
            println!("Database:     {}", cli.db.display());
            println!("Entries:      {}", stats.entries);
            println!(
                "Size:         {} / {} ({:.1}%)",
                format_bytes(stats.total_size_bytes),
                format_bytes(stats.max_size_bytes),
                usage_percent(stats.total_size_bytes, stats.max_size_bytes)
            );
            println!("Expired:      {}", expired);
        }

        Commands::List { limit, format } => {
            let entries: Vec<CacheEntry> = cache.entries().into_iter().take(limit).collect();

            match format.as_str() {
                "json" => {
                    let rows: Vec<_> = entries
                        .iter()
                        .map(|e| {
                            serde_json::json!({
                                "poster_id": e.poster_id,
                                "video_path": e.video_path,
                                "checksum": e.checksum,
                                "cached_at": e.cached_at,
                                "size_bytes": e.size_bytes,
                            })
                        })
                        .collect();
                    let rendered =
                        serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?;
                    println!("{}", rendered);
                }
                _ => {
                    println!("📋 {} cached videos:\n", entries.len());
                    for entry in &entries {
                        print_entry_summary(entry, &cache);
                    }
                }
            }
        }

        Commands::Show { poster_id } => {
            match cache.entries().into_iter().find(|e| e.poster_id == poster_id) {
                Some(entry) => print_entry_detail(&entry, &cache),
                None => println!("❌ No cached video for '{}'", poster_id),
            }
        }

        Commands::Verify { poster_id } => {
            if !cache.entries().iter().any(|e| e.poster_id == poster_id) {
                println!("❌ No cached video for '{}'", poster_id);
            } else if cache.validate_integrity(&poster_id) {
                println!("✅ '{}' checksum matches", poster_id);
            } else {
                println!("🚫 '{}' is corrupted or missing on disk", poster_id);
            }
        }

        Commands::Cleanup => {
            let expired = cache.cleanup_expired();
            let evicted = cache.enforce_limit();
            println!("🧹 Removed {} expired, evicted {}", expired, evicted);
            println!("Size now: {}", format_bytes(cache.get_total_size()));
        }

        Commands::Clear { yes } => {
            if !yes {
                println!(
                    "This deletes {} cached videos. Re-run with --yes to confirm.",
                    cache.len()
                );
                return Ok(());
            }
            let removed = cache.clear();
            println!("🗑  Cleared {} cached videos", removed);
        }
    }

    Ok(())
}

fn print_entry_summary(entry: &CacheEntry, cache: &CacheStore) {
    let now = recall::types::now_ms();
    let status = if entry.is_expired(now, cache.config().retention) {
        "⌛"
    } else if entry.video_path.is_file() {
        "✅"
    } else {
        "❓"
    };

    println!(
        "{} {} | {} | age {} | {}",
        status,
        entry.poster_id,
        format_bytes(entry.size_bytes),
        format_age(now.saturating_sub(entry.cached_at)),
        entry.video_path.display()
    );
}

fn print_entry_detail(entry: &CacheEntry, cache: &CacheStore) {
    let now = recall::types::now_ms();

    println!("═══════════════════════════════════════════════════════════");
    println!("Cached Video");
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Poster ID:   {}", entry.poster_id);
    println!("Path:        {}", entry.video_path.display());
    println!("Size:        {}", format_bytes(entry.size_bytes));
    println!("Checksum:    {}", entry.checksum);
    println!("Cached at:   {} (Unix ms)", entry.cached_at);
    println!("Age:         {}", format_age(now.saturating_sub(entry.cached_at)));
    println!(
        "Expired:     {}",
        if entry.is_expired(now, cache.config().retention) {
            "yes"
        } else {
            "no"
        }
    );

    println!("\n───────────────────────────────────────────────────────────");
    println!("Lip Coordinates");
    println!("───────────────────────────────────────────────────────────\n");

    match serde_json::to_string_pretty(&entry.lip_coordinates) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => println!("(unprintable: {})", e),
    }

    println!("\n═══════════════════════════════════════════════════════════\n");
}

fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

fn usage_percent(used: u64, max: u64) -> f64 {
    if max == 0 {
        0.0
    } else {
        used as f64 / max as f64 * 100.0
    }
}
