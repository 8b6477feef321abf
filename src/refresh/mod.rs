//! Template refresh and cache upkeep.
//!
//! Provides two mechanisms:
//! 1. **On-demand refresh** (RefreshService): rebuild templates now
//! 2. **Scheduled work** (RefreshScheduler): jittered template refresh plus
//!    periodic cache maintenance, cancellable

pub mod scheduler;
pub mod service;

pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use service::{RefreshService, RefreshStats};
