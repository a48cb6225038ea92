//! Turning resolved files into a fresh definition tree.

mod cache;
pub mod interface;

pub use cache::{invalidate, DefinitionCache};

use crate::engine::Suite;
use crate::error::RunError;
use crate::model::RunConfig;
use tracing::debug;

/// Build a new root suite and register every configured file through its interface.
pub fn load_suite(cfg: &RunConfig, cache: &DefinitionCache) -> Result<Suite, RunError> {
    let iface = interface::resolve(&cfg.interface)?;
    let mut suite = Suite::root();
    for path in &cfg.files {
        let defs = cache.get_or_load(path, |p| iface.parse(p))?;
        suite.add_file(path, &defs);
    }
    debug!(
        interface = iface.name,
        files = suite.files().len(),
        tests = suite.tests().len(),
        cached = cache.len(),
        "loaded definitions"
    );
    Ok(suite)
}
