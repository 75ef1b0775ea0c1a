//! Runtime settings for the resolve-and-install pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root settings shared by the resolver, cache, and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Directory holding the content-addressed package cache.
    pub cache_dir: PathBuf,
    /// Upper bound on concurrent metadata and package fetches.
    pub max_parallel_fetches: usize,
    /// In-container directory under which packages are staged.
    pub staging_root: String,
    /// Registry namespace that bare feature names expand into.
    pub shorthand_namespace: String,
}

impl Settings {
    /// Returns a copy with the cache rooted at `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Returns the fetch bound, never less than one.
    #[must_use]
    pub fn fetch_parallelism(&self) -> usize {
        self.max_parallel_fetches.max(1)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: constants::cache_dir().clone(),
            max_parallel_fetches: constants::DEFAULT_MAX_PARALLEL_FETCHES,
            staging_root: constants::DEFAULT_STAGING_ROOT.to_string(),
            shorthand_namespace: constants::DEFAULT_SHORTHAND_NAMESPACE.to_string(),
        }
    }
}
