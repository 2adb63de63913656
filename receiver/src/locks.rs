//! Per-target mutual exclusion for directory replacement.
//!
//! Requests run on independent threads, so two deploys naming the same
//! target could otherwise interleave their remove and extract steps.
//! [`TargetLocks`] hands out one mutex per resolved target path and forgets
//! it again once no request holds or waits on it.

use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide registry of per-target locks.
#[derive(Debug, Default)]
pub struct TargetLocks {
    entries: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `target`.
    ///
    /// Calls for the same path are serialized; calls for different paths run
    /// concurrently. The lock is released when `f` returns or unwinds, and a
    /// lock poisoned by a panicking holder is recovered rather than
    /// propagated.
    pub fn with_lock<T>(&self, target: &Path, f: impl FnOnce() -> T) -> T {
        // Locals drop in reverse order: guard, then slot, then the pruning lease.
        let _lease = Lease {
            locks: self,
            target,
        };
        let slot = self.slot(target);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("acquired deploy lock for {}", target.display());
        f()
    }

    /// Return the number of targets with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Return true when no target currently has a lock entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, target: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.entries().entry(target.to_path_buf()).or_default())
    }

    /// Drop the entry for `target` when the registry holds the only handle.
    fn prune(&self, target: &Path) {
        let mut entries = self.entries();
        if entries
            .get(target)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            entries.remove(target);
        }
    }
}

/// Prunes the entry for `target` on drop, including during unwinding.
struct Lease<'a> {
    locks: &'a TargetLocks,
    target: &'a Path,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.locks.prune(self.target);
    }
}
