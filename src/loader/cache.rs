//! Cache of parsed definition files.
//!
//! Loads go through [`DefinitionCache::get_or_load`], so a file is parsed once
//! until something forgets it. Watch mode forgets the whole watched set before
//! every restart so edited files are observed fresh.

use crate::engine::TestDef;
use crate::error::LoadError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Registry of loaded definitions that can be told to forget a file.
pub trait ModuleCache: Send + Sync {
    /// Drop any cached state for `path`. Unknown paths are a no-op.
    fn forget(&self, path: &Path) -> bool;
}

/// Forget every path in `paths`, returning how many entries were actually evicted.
pub fn invalidate(cache: &dyn ModuleCache, paths: &[PathBuf]) -> usize {
    let evicted = paths.iter().filter(|p| cache.forget(p)).count();
    debug!(watched = paths.len(), evicted, "invalidated definition cache");
    evicted
}

/// Paths are keyed canonically so `a.tests` and `./a.tests` share one entry.
fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Default)]
pub struct DefinitionCache {
    entries: Mutex<HashMap<PathBuf, Arc<[TestDef]>>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<[TestDef]>, LoadError>
    where
        F: FnOnce(&Path) -> Result<Vec<TestDef>, LoadError>,
    {
        let key = cache_key(path);
        if let Some(defs) = self.entries.lock().get(&key) {
            return Ok(defs.clone());
        }
        let defs: Arc<[TestDef]> = load(path)?.into();
        self.entries.lock().insert(key, defs.clone());
        Ok(defs)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl ModuleCache for DefinitionCache {
    fn forget(&self, path: &Path) -> bool {
        self.entries.lock().remove(&cache_key(path)).is_some()
    }
}
