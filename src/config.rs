//! Process configuration.
//!
//! Every component has its own config struct with defaults. `RecallConfig`
//! gathers them and layers overrides from a JSON file and from
//! `POSTER_RECALL_*` environment variables on top.

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use crate::matcher::MatcherConfig;
use crate::refresh::SchedulerConfig;
use crate::store::TemplateSourceConfig;
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_REMOTE_URL: &str = "POSTER_RECALL_REMOTE_URL";
pub const ENV_ASSETS_DIR: &str = "POSTER_RECALL_ASSETS_DIR";
pub const ENV_CACHE_DB: &str = "POSTER_RECALL_CACHE_DB";
pub const ENV_MATCH_THRESHOLD: &str = "POSTER_RECALL_MATCH_THRESHOLD";
pub const ENV_COOLDOWN_MS: &str = "POSTER_RECALL_COOLDOWN_MS";
pub const ENV_DEBOUNCE_MS: &str = "POSTER_RECALL_DEBOUNCE_MS";

/// Complete configuration for one client process.
#[derive(Clone, Debug, Default)]
pub struct RecallConfig {
    pub matcher: MatcherConfig,
    pub templates: TemplateSourceConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

/// On-disk overrides. Absent fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    remote_url: Option<String>,
    request_timeout_ms: Option<u64>,
    assets_dir: Option<PathBuf>,
    manifest_name: Option<String>,
    working_resolution: Option<u32>,

    match_threshold: Option<f32>,
    debounce_ms: Option<u64>,
    cooldown_ms: Option<u64>,

    cache_db: Option<PathBuf>,
    retention_hours: Option<u64>,
    max_size_mb: Option<u64>,
    verify_on_store: Option<bool>,

    refresh_interval_secs: Option<u64>,
    jitter_secs: Option<u64>,
    cache_maintenance_interval_secs: Option<u64>,
    scheduler_enabled: Option<bool>,
}

impl RecallConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Defaults overlaid with a JSON file, then with environment variables.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&raw)?;

        let mut config = Self::default();
        config.apply_file(file)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        if let Some(url) = file.remote_url {
            self.templates.remote_url = non_empty(url);
        }
        if let Some(ms) = file.request_timeout_ms {
            self.templates.request_timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = file.assets_dir {
            self.templates.assets_dir = dir;
        }
        if let Some(name) = file.manifest_name {
            self.templates.manifest_name = name;
        }
        if let Some(side) = file.working_resolution {
            if side == 0 {
                return Err(ConfigError::Invalid {
                    field: "working_resolution",
                    reason: "must be positive".to_string(),
                });
            }
            self.templates.working_resolution = side;
            self.matcher.working_resolution = side;
        }

        if let Some(threshold) = file.match_threshold {
            self.matcher.match_threshold =
                validate_threshold(threshold).map_err(|reason| ConfigError::Invalid {
                    field: "match_threshold",
                    reason,
                })?;
        }
        if let Some(ms) = file.debounce_ms {
            self.matcher.debounce_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.cooldown_ms {
            self.matcher.cooldown_window = Duration::from_millis(ms);
        }

        if let Some(db) = file.cache_db {
            self.cache.db_path = db;
        }
        if let Some(hours) = file.retention_hours {
            let secs = hours.checked_mul(60 * 60).ok_or(ConfigError::Invalid {
                field: "retention_hours",
                reason: format!("{} hours overflows", hours),
            })?;
            self.cache.retention = Duration::from_secs(secs);
        }
        if let Some(mb) = file.max_size_mb {
            self.cache.max_size_bytes = mb.checked_mul(1024 * 1024).ok_or(ConfigError::Invalid {
                field: "max_size_mb",
                reason: format!("{} MB overflows", mb),
            })?;
        }
        if let Some(verify) = file.verify_on_store {
            self.cache.verify_on_store = verify;
        }

        if let Some(secs) = file.refresh_interval_secs {
            self.scheduler.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.jitter_secs {
            self.scheduler.jitter = Duration::from_secs(secs);
        }
        if let Some(secs) = file.cache_maintenance_interval_secs {
            self.scheduler.cache_maintenance_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = file.scheduler_enabled {
            self.scheduler.enabled = enabled;
        }

        Ok(())
    }

    /// Overlay environment values. Malformed values are logged and ignored.
    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REMOTE_URL) {
            self.templates.remote_url = non_empty(url);
        }
        if let Some(dir) = lookup(ENV_ASSETS_DIR) {
            self.templates.assets_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup(ENV_CACHE_DB) {
            self.cache.db_path = PathBuf::from(db);
        }

        if let Some(threshold) = parse_env::<f32>(&lookup, ENV_MATCH_THRESHOLD) {
            match validate_threshold(threshold) {
                Ok(t) => self.matcher.match_threshold = t,
                Err(reason) => warn!(
                    "Ignoring {}: {}; keeping {}",
                    ENV_MATCH_THRESHOLD, reason, self.matcher.match_threshold
                ),
            }
        }
        if let Some(ms) = parse_env::<u64>(&lookup, ENV_COOLDOWN_MS) {
            self.matcher.cooldown_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, ENV_DEBOUNCE_MS) {
            self.matcher.debounce_interval = Duration::from_millis(ms);
        }
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

fn validate_threshold(threshold: f32) -> Result<f32, String> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!("{} is outside [0, 1]", threshold))
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
