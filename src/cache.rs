use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::{
    col::{map_new, HashMap},
    path::PathResult,
    primitives::StationId,
    service::{PathFinder, ServiceError},
};

struct Entries {
    /// Bumped by every eviction.
    generation: u64,
    paths: HashMap<(StationId, StationId), PathResult>,
}

/// Memoizes successful path queries of the wrapped finder.
///
/// The cache knows nothing about topology changes: whoever mutates a line has
/// to call [`CachedPathFinder::evict_all`] afterwards. A query that was already
/// running when the cache was evicted still returns its result, but does not
/// store it.
pub struct CachedPathFinder<P: PathFinder> {
    inner: P,
    entries: Mutex<Entries>,
}

impl<P: PathFinder> CachedPathFinder<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            entries: Mutex::new(Entries {
                generation: 0,
                paths: map_new(),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().paths.len()
    }

    pub fn evict_all(&self) {
        let mut entries = self.entries();
        debug!("Evicting {} cached paths", entries.paths.len());
        entries.generation += 1;
        entries.paths.clear();
    }
}

impl<P: PathFinder> PathFinder for CachedPathFinder<P> {
    fn find_path(&self, source: StationId, target: StationId) -> Result<PathResult, ServiceError> {
        let generation = {
            let entries = self.entries();
            if let Some(hit) = entries.paths.get(&(source, target)) {
                return Ok(hit.clone());
            }
            entries.generation
        };
        // The lock is not held while computing.
        let result = self.inner.find_path(source, target)?;
        let mut entries = self.entries();
        if entries.generation == generation {
            entries.paths.insert((source, target), result.clone());
        } else {
            debug!("Not caching {:?} -> {:?}, computed before eviction", source, target);
        }
        Ok(result)
    }
}
