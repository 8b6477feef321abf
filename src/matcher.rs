//! Frame-to-template matching with debounce and cooldown gating.
//!
//! Each evaluation fingerprints the frame, pins the active template snapshot,
//! scores every template by Hamming similarity and keeps the best one. Two
//! gates sit around that: a debounce that skips frames arriving faster than
//! the evaluation interval, and a cooldown that suppresses re-confirming the
//! poster whose content is still playing.

use crate::fingerprint::{best_match, fingerprint_image, DEFAULT_WORKING_RESOLUTION};
use crate::store::TemplateStore;
use crate::template::Dialogue;
use crate::types::{elapsed_ms, Clock};
use image::DynamicImage;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Matcher tuning.
#[derive(Clone, Debug)]
pub struct MatcherConfig {
    /// Minimum spacing between full evaluations
    pub debounce_interval: Duration,
    /// Window during which the last confirmed poster is not re-reported
    pub cooldown_window: Duration,
    /// Minimum Hamming similarity for a confirmation, in `[0, 1]`
    pub match_threshold: f32,
    /// Longest side frames are reduced to before hashing
    pub working_resolution: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            debounce_interval: Duration::from_secs(1),
            cooldown_window: Duration::from_secs(8),
            match_threshold: 0.5,
            working_resolution: DEFAULT_WORKING_RESOLUTION,
        }
    }
}

/// A confirmed detection.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Hamming similarity of the winning template
    pub confidence: f32,
    pub dialogues: Vec<Dialogue>,
    /// Snapshot generation the match was scored against
    pub generation: u64,
}

/// Detection bookkeeping. Timestamps are clock milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionState {
    pub last_confirmed_id: Option<String>,
    pub last_confirmed_at: Option<u64>,
    pub last_attempt_at: Option<u64>,
}

/// Result of one `evaluate` call.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchOutcome {
    /// Arrived inside the debounce interval; nothing was computed
    Debounced,
    /// Frame had no pixels to hash
    EmptyFrame,
    /// Active snapshot holds no templates
    NoTemplates,
    /// Best candidate scored under the threshold
    NoMatch { best_similarity: f32 },
    /// Best candidate is the poster still in cooldown
    Suppressed { id: String, similarity: f32 },
    Confirmed(MatchResult),
}

impl MatchOutcome {
    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            MatchOutcome::Confirmed(result) => Some(result),
            _ => None,
        }
    }
}

/// Whether a confirmed poster is currently holding the cooldown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionPhase {
    Idle,
    Cooldown { id: String, remaining: Duration },
}

/// Matches camera frames against the store's active snapshot.
pub struct Matcher {
    store: Arc<TemplateStore>,
    config: MatcherConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<DetectionState>,
}

impl Matcher {
    pub fn new(store: Arc<TemplateStore>, config: MatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            state: Mutex::new(DetectionState::default()),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Entry point for the recognition loop: a confirmed detection or nothing.
    ///
    /// # Arguments
    ///
    /// * `frame` - Camera frame at any resolution; it is reduced to the
    ///   working resolution before hashing
    ///
    /// # Returns
    ///
    /// `Some` when the best template clears `match_threshold` and is not the
    /// poster still in cooldown. Frames inside the debounce interval, empty
    /// frames and an empty snapshot all yield `None`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use recall::{LocalAssetSource, Matcher, MatcherConfig, SystemClock, TemplateStore};
    /// use std::sync::Arc;
    ///
    /// let assets = Arc::new(LocalAssetSource::new("./assets/posters", "manifest.json"));
    /// let store = Arc::new(TemplateStore::new(None, assets, 512));
    /// store.load_from_local_assets()?;
    ///
    /// let matcher = Matcher::new(store, MatcherConfig::default(), Arc::new(SystemClock));
    /// let frame = image::open("frame.jpg")?;
    /// if let Some(hit) = matcher.match_frame(&frame) {
    ///     println!("{} ({:.2})", hit.name, hit.confidence);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn match_frame(&self, frame: &DynamicImage) -> Option<MatchResult> {
        self.evaluate(frame).into_match()
    }

    /// Same as [`Matcher::match_frame`] but reports why nothing was confirmed.
    pub fn evaluate(&self, frame: &DynamicImage) -> MatchOutcome {
        let now = self.clock.now_ms();

        {
            let mut state = self.state.lock();
            if let Some(last) = state.last_attempt_at {
                if elapsed_ms(last, now) < self.config.debounce_interval.as_millis() as u64 {
                    return MatchOutcome::Debounced;
                }
            }
            state.last_attempt_at = Some(now);
        }

        let Some(query) = fingerprint_image(frame, self.config.working_resolution) else {
            return MatchOutcome::EmptyFrame;
        };

        // Pin the snapshot only for the scoring pass
        let (template, similarity, generation) = {
            let snapshot = self.store.acquire();
            if snapshot.is_empty() {
                return MatchOutcome::NoTemplates;
            }
            let Some((index, similarity)) = best_match(&query, snapshot.fingerprints()) else {
                return MatchOutcome::NoTemplates;
            };
            let template = match snapshot.get(index) {
                Some(template) => template.clone(),
                None => return MatchOutcome::NoTemplates,
            };
            (template, similarity, snapshot.generation())
        };

        if similarity < self.config.match_threshold {
            debug!(
                "Best candidate {} at {:.3} below threshold {:.3}",
                template.id, similarity, self.config.match_threshold
            );
            return MatchOutcome::NoMatch {
                best_similarity: similarity,
            };
        }

        let mut state = self.state.lock();
        if self.in_cooldown(&state, &template.id, now) {
            debug!("Suppressing {} during cooldown ({:.3})", template.id, similarity);
            return MatchOutcome::Suppressed {
                id: template.id,
                similarity,
            };
        }

        state.last_confirmed_id = Some(template.id.clone());
        state.last_confirmed_at = Some(now);
        drop(state);

        info!(
            "Confirmed poster {} ({}) at {:.3} against generation {}",
            template.id, template.display_name, similarity, generation
        );

        MatchOutcome::Confirmed(MatchResult {
            id: template.id,
            name: template.display_name,
            description: template.description,
            confidence: similarity,
            dialogues: template.dialogues,
            generation,
        })
    }

    /// Presentation started showing content for `id`; restart its cooldown now.
    pub fn on_playback_started(&self, id: &str) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.last_confirmed_id = Some(id.to_string());
        state.last_confirmed_at = Some(now);
        debug!("Playback started for {}, cooldown restarted", id);
    }

    /// Copy of the detection bookkeeping.
    pub fn state(&self) -> DetectionState {
        self.state.lock().clone()
    }

    /// `Cooldown` while the last confirmed poster is inside its window,
    /// with the time left; `Idle` otherwise.
    pub fn phase(&self) -> DetectionPhase {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        match (&state.last_confirmed_id, state.last_confirmed_at) {
            (Some(id), Some(at)) => {
                let window = self.config.cooldown_window.as_millis() as u64;
                let elapsed = elapsed_ms(at, now);
                if elapsed < window {
                    DetectionPhase::Cooldown {
                        id: id.clone(),
                        remaining: Duration::from_millis(window - elapsed),
                    }
                } else {
                    DetectionPhase::Idle
                }
            }
            _ => DetectionPhase::Idle,
        }
    }

    /// Forget every confirmation and attempt.
    pub fn reset(&self) {
        *self.state.lock() = DetectionState::default();
    }

    fn in_cooldown(&self, state: &DetectionState, id: &str, now: u64) -> bool {
        match (&state.last_confirmed_id, state.last_confirmed_at) {
            (Some(last_id), Some(at)) if last_id == id => {
                elapsed_ms(at, now) < self.config.cooldown_window.as_millis() as u64
            }
            _ => false,
        }
    }
}
