//! Immutable template snapshots and the cell that publishes them.
//!
//! Readers pin the active snapshot through [`SnapshotCell::acquire`], which
//! bumps the in-flight reader count before the pointer is read and drops it
//! when the guard goes away. Publishing swaps the pointer under a short write
//! lock and parks the previous snapshot on a retired list; that list is only
//! released once the reader count reaches zero.

use crate::fingerprint::Fingerprint;
use crate::template::ReferenceTemplate;
use crate::types::now_ms;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One published, never-modified set of templates.
#[derive(Debug)]
pub struct TemplateSnapshot {
    generation: u64,
    templates: Vec<ReferenceTemplate>,
    published_at: u64,
}

impl TemplateSnapshot {
    pub fn new(generation: u64, templates: Vec<ReferenceTemplate>) -> Self {
        Self {
            generation,
            templates,
            published_at: now_ms(),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn published_at(&self) -> u64 {
        self.published_at
    }

    pub fn templates(&self) -> &[ReferenceTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceTemplate> {
        self.templates.get(index)
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.templates.iter().map(|t| &t.fingerprint)
    }
}

/// Holder of the active snapshot.
#[derive(Debug)]
pub struct SnapshotCell {
    active: RwLock<Arc<TemplateSnapshot>>,
    readers: AtomicUsize,
    retired: Mutex<Vec<Arc<TemplateSnapshot>>>,
    next_generation: AtomicU64,
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCell {
    /// Starts with the empty generation-0 snapshot.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(TemplateSnapshot::empty())),
            readers: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Pin the active snapshot for the duration of one read.
    pub fn acquire(&self) -> SnapshotGuard<'_> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::clone(&*self.active.read());
        SnapshotGuard {
            cell: self,
            snapshot,
        }
    }

    /// Peek at the active snapshot without joining the reader count.
    pub fn current(&self) -> Arc<TemplateSnapshot> {
        Arc::clone(&*self.active.read())
    }

    /// Build a new snapshot from `templates` and swap it in. Returns its generation.
    pub fn publish(&self, templates: Vec<ReferenceTemplate>) -> u64 {
        let (generation, previous) = {
            let mut active = self.active.write();
            // Generation is taken under the write lock so swaps stay ordered
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let fresh = Arc::new(TemplateSnapshot::new(generation, templates));
            (generation, std::mem::replace(&mut *active, fresh))
        };
        self.retired.lock().push(previous);

        self.try_reclaim();
        generation
    }

    pub fn in_flight_readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Release retired snapshots if nobody is reading. Returns how many were released.
    fn try_reclaim(&self) -> usize {
        if self.readers.load(Ordering::SeqCst) != 0 {
            return 0;
        }

        let drained = std::mem::take(&mut *self.retired.lock());
        if !drained.is_empty() {
            debug!(
                "Reclaimed {} retired template snapshot(s) (generations {:?})",
                drained.len(),
                drained.iter().map(|s| s.generation()).collect::<Vec<_>>()
            );
        }
        drained.len()
    }
}

/// Pinned view of one snapshot. Dropping it ends the read.
#[derive(Debug)]
pub struct SnapshotGuard<'a> {
    cell: &'a SnapshotCell,
    snapshot: Arc<TemplateSnapshot>,
}

impl Deref for SnapshotGuard<'_> {
    type Target = TemplateSnapshot;

    fn deref(&self) -> &Self::Target {
        &self.snapshot
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        if self.cell.readers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cell.try_reclaim();
        }
    }
}
