//! Unified error taxonomy for the devforge workspace.
//!
//! Each pipeline stage reports its own error enum. [`DevforgeError`] wraps
//! all of them so the end-to-end pipeline can return a single type while
//! callers can still match on the stage that failed.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DevforgeError {
    /// The configuration could not be loaded, merged, or validated.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A feature could not be resolved to a valid manifest.
    #[error(transparent)]
    FeatureResolution(#[from] FeatureResolutionError),

    /// Hard feature dependencies form a cycle.
    #[error(transparent)]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A feature install script failed.
    #[error(transparent)]
    Installation(#[from] InstallationError),

    /// The package cache could not be used.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DevforgeError>;

/// Errors raised while loading or merging configuration layers.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON (with comments).
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// A field has the wrong shape.
    #[error("invalid configuration at {location}: {message}")]
    Malformed {
        /// `file#/json/pointer` of the offending value.
        location: String,
        /// What is wrong with it.
        message: String,
    },

    /// The `extends` chain loops back onto itself.
    #[error("cyclic extends chain: {}", render_paths(.chain))]
    ExtendsCycle {
        /// Files forming the cycle, in traversal order.
        chain: Vec<PathBuf>,
    },
}

/// Errors raised while turning a feature reference into a manifest.
#[derive(Debug, Error)]
pub enum FeatureResolutionError {
    /// The reference string does not follow any known grammar.
    #[error("invalid feature reference \"{reference}\": {message}")]
    InvalidReference {
        /// Reference as written by the user.
        reference: String,
        /// Why it was rejected.
        message: String,
    },

    /// The registry or the filesystem has no such feature.
    #[error("feature not found: {feature}")]
    NotFound {
        /// Feature identifier.
        feature: String,
    },

    /// No published version satisfies the constraint.
    #[error("no version of {feature} satisfies \"{constraint}\" (available: {})", .available.join(", "))]
    VersionUnsatisfiable {
        /// Feature identifier.
        feature: String,
        /// Constraint as written.
        constraint: String,
        /// Published versions considered.
        available: Vec<String>,
    },

    /// The manifest failed structural validation.
    #[error("invalid manifest for {feature}: {message}")]
    InvalidManifest {
        /// Feature identifier.
        feature: String,
        /// Validation failure.
        message: String,
    },

    /// User-selected options do not match the manifest's option specs.
    #[error("invalid options for {feature}: {message}")]
    InvalidOptions {
        /// Feature identifier.
        feature: String,
        /// Validation failure.
        message: String,
    },

    /// The registry collaborator gave up after its own retries.
    #[error("registry error for {feature}: {message}")]
    Registry {
        /// Feature identifier.
        feature: String,
        /// Transport diagnostic.
        message: String,
    },

    /// A graph was built from a set that lacks a declared hard dependency.
    #[error("{feature} depends on {dependency}, which was not resolved")]
    MissingDependency {
        /// Dependent feature.
        feature: String,
        /// Dependency that is absent.
        dependency: String,
    },

    /// The package could not be stored or re-fetched.
    #[error("cache failure for {feature}: {source}")]
    Cache {
        /// Feature identifier.
        feature: String,
        /// Underlying cache error.
        source: CacheError,
    },
}

/// A cycle among hard (`dependsOn`) feature edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cyclic feature dependency: {}", render_cycle(.cycle))]
pub struct CyclicDependencyError {
    /// Feature ids forming the cycle, each depending on the next and the
    /// last depending on the first. Every member appears once.
    pub cycle: Vec<String>,
}

/// Errors raised while executing the install plan.
///
/// Every variant records the features that had already installed
/// successfully. Installation is not transactional, so those stay in place.
#[derive(Debug, Error)]
pub enum InstallationError {
    /// The install script exited with a non-zero status.
    #[error("install script for {feature} exited with code {exit_code}")]
    ScriptFailed {
        /// Feature whose script failed.
        feature: String,
        /// Exit code reported by the exec collaborator.
        exit_code: i32,
        /// Standard error captured from the script.
        stderr: String,
        /// Features installed before the failure, in order.
        succeeded: Vec<String>,
    },

    /// The exec collaborator could not run the script at all.
    #[error("failed to execute install script for {feature}: {message}")]
    Exec {
        /// Feature being installed.
        feature: String,
        /// Collaborator diagnostic.
        message: String,
        /// Features installed before the failure, in order.
        succeeded: Vec<String>,
    },

    /// The package could not be staged inside the container.
    #[error("failed to stage package for {feature}: {message}")]
    Materialize {
        /// Feature being installed.
        feature: String,
        /// Collaborator diagnostic.
        message: String,
        /// Features installed before the failure, in order.
        succeeded: Vec<String>,
    },
}

impl InstallationError {
    /// Returns the feature whose installation failed.
    #[must_use]
    pub fn feature(&self) -> &str {
        match self {
            Self::ScriptFailed { feature, .. }
            | Self::Exec { feature, .. }
            | Self::Materialize { feature, .. } => feature,
        }
    }

    /// Returns the features that installed successfully before the failure.
    #[must_use]
    pub fn succeeded(&self) -> &[String] {
        match self {
            Self::ScriptFailed { succeeded, .. }
            | Self::Exec { succeeded, .. }
            | Self::Materialize { succeeded, .. } => succeeded,
        }
    }
}

/// Errors raised by the content-addressed package cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Stored or downloaded bytes do not hash to their digest.
    #[error("corrupt cache entry {digest}: content hashes to {actual}")]
    Corrupt {
        /// Digest the content was stored under.
        digest: String,
        /// Digest actually computed.
        actual: String,
    },

    /// A cache file operation failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A package archive could not be unpacked.
    #[error("failed to extract package {digest}: {message}")]
    Extract {
        /// Digest of the package.
        digest: String,
        /// Extraction diagnostic.
        message: String,
    },

    /// An index record on disk cannot be parsed.
    #[error("unreadable cache record {path}: {message}")]
    InvalidRecord {
        /// Record path.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
}

impl CacheError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Self::Io { path, source }
    }
}

fn render_cycle(cycle: &[String]) -> String {
    let mut members = cycle.to_vec();
    if let Some(first) = cycle.first() {
        members.push(first.clone());
    }
    members.join(" -> ")
}

fn render_paths(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
