//! Reference template storage.
//!
//! - **Snapshots**: immutable template sets published by atomic swap
//! - **Sources**: remote poster list and bundled fallback assets
//! - **Store**: loading, fallback and read access for the matcher

pub mod snapshot;
pub mod source;
pub mod template_store;

pub use snapshot::{SnapshotCell, SnapshotGuard, TemplateSnapshot};
pub use source::{AssetSource, HttpTemplateSource, LocalAssetSource, RemoteTemplateSource};
pub use template_store::{
    LoadReport, StoreStats, TemplateOrigin, TemplateSourceConfig, TemplateStore,
};
