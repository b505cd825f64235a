//! The resolution half of the import hook: decide whether a root can serve
//! a dotted name.

use crate::chain::{ChainContext, FindOutcome};
use crate::error::ImportError;
use crate::path::{DottedName, PathResolver};
use crate::root::{ModuleRecord, RemoteRoot};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info};

/// Names whose resolution is currently being decided.
///
/// Entries are per thread, so one thread's resolution never makes another
/// thread decline.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    in_progress: Mutex<HashSet<(ThreadId, String)>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` in progress for the current thread.
    ///
    /// Returns `None` if it already is. The mark is cleared when the guard
    /// drops.
    pub fn begin(&self, name: &str) -> Option<InProgress<'_>> {
        let key = (thread::current().id(), name.to_string());
        if !self.in_progress.lock().insert(key.clone()) {
            return None;
        }
        Some(InProgress { cache: self, key })
    }

    /// Number of names in progress across all threads
    pub fn len(&self) -> usize {
        self.in_progress.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.lock().is_empty()
    }
}

/// Clears an in-progress mark on drop
pub struct InProgress<'a> {
    cache: &'a DiscoveryCache,
    key: (ThreadId, String),
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.cache.in_progress.lock().remove(&self.key);
    }
}

/// Decides Claim or Decline for one root, remembering what it found
pub struct RemoteModuleFinder {
    root: Arc<RemoteRoot>,
    resolver: PathResolver,
    cache: DiscoveryCache,
    records: Mutex<HashMap<String, ModuleRecord>>,
}

impl RemoteModuleFinder {
    pub fn new(root: Arc<RemoteRoot>) -> Self {
        Self::with_resolver(root, PathResolver::new())
    }

    pub fn with_resolver(root: Arc<RemoteRoot>, resolver: PathResolver) -> Self {
        Self {
            root,
            resolver,
            cache: DiscoveryCache::new(),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Arc<RemoteRoot> {
        &self.root
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Decide whether this root serves `name`.
    ///
    /// Declines names already being resolved on this thread, names whose
    /// top-level segment a local strategy provides, and names
    /// whose last segment repeats. Transport and detection failures are
    /// errors, never a decline.
    pub fn find(&self, name: &str, context: &ChainContext<'_>) -> Result<FindOutcome, ImportError> {
        info!("Trying to find '{}' in '{}'", name, self.root.url());

        let Some(_guard) = self.cache.begin(name) else {
            debug!("'{}' is already being resolved; declining", name);
            return Ok(FindOutcome::Decline);
        };

        let dotted = DottedName::parse(name)?;

        if context.resolvable_locally(dotted.top_level()) {
            debug!("'{}' is available locally; declining", dotted.top_level());
            return Ok(FindOutcome::Decline);
        }

        if dotted.is_degenerate() {
            debug!("'{}' repeats its last segment; declining", name);
            return Ok(FindOutcome::Decline);
        }

        match self.locate(name)? {
            Some(record) => {
                info!("'{}' can be loaded from '{}'", name, record.origin);
                self.records.lock().insert(name.to_string(), record);
                Ok(FindOutcome::Claim)
            }
            None => Ok(FindOutcome::Decline),
        }
    }

    /// Locate `name` under the root without any of the decline checks
    pub fn locate(&self, name: &str) -> Result<Option<ModuleRecord>, ImportError> {
        self.root.locate(name, &self.resolver)
    }

    /// Take the record remembered by the last claim of `name`
    pub fn take_record(&self, name: &str) -> Option<ModuleRecord> {
        self.records.lock().remove(name)
    }

    /// Drop any remembered record for `name`
    pub fn forget(&self, name: &str) {
        self.records.lock().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_guard() {
        let cache = DiscoveryCache::new();
        {
            let _guard = cache.begin("pkg").unwrap();
            assert_eq!(cache.len(), 1);
            assert!(cache.begin("pkg").is_none());
        }
        assert!(cache.is_empty());
        assert!(cache.begin("pkg").is_some());
    }

    #[test]
    fn test_in_progress_is_per_thread() {
        let cache = DiscoveryCache::new();
        let _guard = cache.begin("pkg").unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let other = cache.begin("pkg");
                assert!(other.is_some());
                assert_eq!(cache.len(), 2);
            });
        });

        assert_eq!(cache.len(), 1);
    }
}
