//! Reclaimable cache for a materialized snapshot body.
//!
//! A header owns one [`BodyCache`] (shared between clones of the header).
//! The body can be dropped at any time with [`BodyCache::release`] and is
//! rebuilt from the source file on the next access. Concurrent callers of
//! [`BodyCache::get_or_load`] wait on the slot lock, so a body is decoded at
//! most once per miss.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::Result;
use crate::snapshot::model::SnapshotBody;

struct CachedBody {
    java_style: bool,
    body: Arc<SnapshotBody>,
    last_accessed: Instant,
}

#[derive(Default)]
pub struct BodyCache {
    slot: Mutex<Option<CachedBody>>,
}

impl BodyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedBody>> {
        // A panic inside a loader leaves the slot empty or intact; both are valid.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached body, building it with `load` on a miss.
    ///
    /// A body cached with a different class-name style counts as a miss.
    pub fn get_or_load<F>(&self, java_style: bool, load: F) -> Result<Arc<SnapshotBody>>
    where
        F: FnOnce() -> Result<SnapshotBody>,
    {
        let mut slot = self.lock();
        if let Some(cached) = slot.as_mut().filter(|c| c.java_style == java_style) {
            cached.last_accessed = Instant::now();
            return Ok(Arc::clone(&cached.body));
        }

        let body = Arc::new(load()?);
        *slot = Some(CachedBody {
            java_style,
            body: Arc::clone(&body),
            last_accessed: Instant::now(),
        });
        Ok(body)
    }

    /// Stores an already-built body, replacing whatever was cached.
    pub fn store(&self, java_style: bool, body: Arc<SnapshotBody>) {
        *self.lock() = Some(CachedBody {
            java_style,
            body,
            last_accessed: Instant::now(),
        });
    }

    /// Drops the cached body. Outstanding `Arc`s stay valid.
    pub fn release(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// When the cached body was last handed out, if one is cached.
    pub fn last_accessed(&self) -> Option<Instant> {
        self.lock().as_ref().map(|c| c.last_accessed)
    }
}

impl std::fmt::Debug for BodyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyCache")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
