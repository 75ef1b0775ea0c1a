//! Feature metadata resolution.
//!
//! Registry features go through the reference records and package cache
//! before touching the registry. Local features are read from disk on every
//! call so edits show up immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use devforge_common::config::Settings;
use devforge_common::constants::{FEATURE_INSTALL_SCRIPT, FEATURE_MANIFEST_FILE};
use devforge_common::error::FeatureResolutionError;
use devforge_common::types::Sha256Digest;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{CacheEntry, FetchError, PackageCache, RefRecord};
use crate::manifest::{FeatureManifest, FeatureMetadata};
use crate::reference::FeatureRef;
use crate::registry::{RegistryClient, RegistryError};
use crate::version::VersionConstraint;

/// Version recorded for local features that declare none.
const LOCAL_VERSION: &str = "local";

/// Resolves feature references into manifests.
///
/// Cloning is cheap: the registry client and cache are shared.
#[derive(Clone)]
pub struct FeatureResolver {
    registry: Arc<dyn RegistryClient>,
    cache: Arc<PackageCache>,
    shorthand_namespace: String,
    parallelism: usize,
    base_dir: PathBuf,
    refresh: bool,
}

impl std::fmt::Debug for FeatureResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureResolver")
            .field("cache", &self.cache.root())
            .field("shorthand_namespace", &self.shorthand_namespace)
            .field("parallelism", &self.parallelism)
            .field("base_dir", &self.base_dir)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl FeatureResolver {
    /// Creates a resolver. Local references resolve against `base_dir`,
    /// normally the directory holding the configuration file.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        cache: Arc<PackageCache>,
        settings: &Settings,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            cache,
            shorthand_namespace: settings.shorthand_namespace.clone(),
            parallelism: settings.fetch_parallelism(),
            base_dir: base_dir.into(),
            refresh: false,
        }
    }

    /// Ignores recorded tag resolutions and asks the registry again.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// The shared package cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    /// Parses a reference using this resolver's namespace and base directory.
    ///
    /// # Errors
    ///
    /// Returns `FeatureResolutionError::InvalidReference` for malformed text.
    pub fn parse_ref(&self, raw: &str) -> Result<FeatureRef, FeatureResolutionError> {
        self.parse_ref_from(raw, &self.base_dir)
    }

    /// Parses a reference whose local paths are relative to `base_dir`.
    ///
    /// Used for `dependsOn` entries of local features, which point at
    /// siblings of the declaring feature rather than of the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FeatureResolutionError::InvalidReference` for malformed text.
    pub fn parse_ref_from(&self, raw: &str, base_dir: &Path) -> Result<FeatureRef, FeatureResolutionError> {
        FeatureRef::parse(raw, &self.shorthand_namespace, base_dir)
    }

    /// Resolves one reference.
    ///
    /// # Errors
    ///
    /// Returns not-found, version-unsatisfiable, invalid-manifest, registry,
    /// or cache errors. Nothing is retried here.
    pub async fn resolve(&self, reference: &FeatureRef) -> Result<FeatureManifest, FeatureResolutionError> {
        if reference.is_local() {
            self.resolve_local(reference).await
        } else {
            self.resolve_registry(reference).await
        }
    }

    /// Resolves a batch concurrently, at most `max_parallel_fetches` at a time.
    ///
    /// Results come back in input order. If any reference fails, the error
    /// of the earliest failing one is returned and nothing else.
    ///
    /// # Errors
    ///
    /// Returns the first failure in input order.
    pub async fn resolve_all(
        &self,
        references: &[FeatureRef],
    ) -> Result<Vec<FeatureManifest>, FeatureResolutionError> {
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        for (index, reference) in references.iter().cloned().enumerate() {
            let resolver = self.clone();
            let permits = Arc::clone(&permits);
            let _ = tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, Err(closed(&reference)));
                };
                (index, resolver.resolve(&reference).await)
            });
        }

        let mut results: Vec<Option<Result<FeatureManifest, FeatureResolutionError>>> =
            references.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "feature resolution task failed"),
            }
        }
        results
            .into_iter()
            .zip(references)
            .map(|(result, reference)| result.unwrap_or_else(|| Err(closed(reference))))
            .collect()
    }

    async fn resolve_local(&self, reference: &FeatureRef) -> Result<FeatureManifest, FeatureResolutionError> {
        let label = reference.to_string();
        let dir = PathBuf::from(&reference.identifier);
        let manifest_path = dir.join(FEATURE_MANIFEST_FILE);
        tracing::debug!(feature = %label, path = %manifest_path.display(), "reading local feature");
        let bytes = tokio::fs::read(&manifest_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FeatureResolutionError::NotFound {
                feature: label.clone(),
            },
            _ => FeatureResolutionError::InvalidManifest {
                feature: label.clone(),
                message: format!("{}: {e}", manifest_path.display()),
            },
        })?;
        let metadata = FeatureMetadata::parse(&label, &bytes)?;
        require_install_script(&label, &dir)?;
        let resolved_version = metadata
            .version
            .as_ref()
            .map_or_else(|| LOCAL_VERSION.to_string(), ToString::to_string);
        Ok(FeatureManifest {
            id: reference.id(),
            reference: reference.clone(),
            metadata,
            resolved_version,
            package_digest: None,
            package_dir: dir,
        })
    }

    async fn resolve_registry(
        &self,
        reference: &FeatureRef,
    ) -> Result<FeatureManifest, FeatureResolutionError> {
        let label = reference.to_string();
        let constraint = reference.constraint.to_string();

        if !self.refresh {
            if let Some(record) = self.cache.lookup_ref(&reference.identifier, &constraint) {
                let cached = self
                    .cache
                    .lookup(&record.digest)
                    .map_err(|source| FeatureResolutionError::Cache {
                        feature: label.clone(),
                        source,
                    })?;
                if let Some(entry) = cached {
                    tracing::debug!(feature = %label, digest = %record.digest, "resolved from cache");
                    let metadata = FeatureMetadata::parse(&label, record.manifest.as_bytes())?;
                    return Ok(manifest(reference, metadata, &record.reference, entry));
                }
            }
        }

        let tag = self.select_reference(reference, &label).await?;
        tracing::info!(feature = %label, reference = %tag, "fetching feature manifest");
        let fetched = self
            .registry
            .fetch_manifest(&reference.identifier, &tag)
            .await
            .map_err(|e| registry_error(&label, e))?;
        if let VersionConstraint::Digest(pinned) = &reference.constraint {
            if pinned != &fetched.digest {
                return Err(FeatureResolutionError::Registry {
                    feature: label,
                    message: format!("registry returned package {} for {pinned}", fetched.digest),
                });
            }
        }
        let metadata = FeatureMetadata::parse(&label, &fetched.manifest_bytes)?;

        let entry = self.fetch_package(reference, &label, &fetched.digest).await?;
        if let Err(e) = require_install_script(&label, &entry.local_path) {
            if let Err(evict) = self.cache.evict(&fetched.digest) {
                tracing::warn!(digest = %fetched.digest, error = %evict, "failed to evict invalid package");
            }
            return Err(e);
        }

        let record = RefRecord {
            identifier: reference.identifier.clone(),
            constraint,
            reference: tag.clone(),
            digest: fetched.digest.clone(),
            manifest: String::from_utf8_lossy(&fetched.manifest_bytes).into_owned(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.cache.record_ref(&record) {
            tracing::warn!(feature = %label, error = %e, "failed to record resolved reference");
        }
        Ok(manifest(reference, metadata, &tag, entry))
    }

    async fn fetch_package(
        &self,
        reference: &FeatureRef,
        label: &str,
        digest: &Sha256Digest,
    ) -> Result<CacheEntry, FeatureResolutionError> {
        self.cache
            .get_or_fetch(digest, || self.registry.fetch_layer(&reference.identifier, digest))
            .await
            .map_err(|e| match e {
                FetchError::Cache(source) => FeatureResolutionError::Cache {
                    feature: label.to_string(),
                    source,
                },
                FetchError::Source(e) => registry_error(label, e),
            })
    }

    /// Picks the tag or digest to fetch for the reference's constraint.
    async fn select_reference(
        &self,
        reference: &FeatureRef,
        label: &str,
    ) -> Result<String, FeatureResolutionError> {
        if let VersionConstraint::Digest(digest) = &reference.constraint {
            return Ok(digest.to_string());
        }
        let tags = self
            .registry
            .list_tags(&reference.identifier)
            .await
            .map_err(|e| registry_error(label, e))?;
        reference
            .constraint
            .select(&tags)
            .ok_or_else(|| FeatureResolutionError::VersionUnsatisfiable {
                feature: reference.identifier.clone(),
                constraint: reference.constraint.to_string(),
                available: tags,
            })
    }
}

fn manifest(
    reference: &FeatureRef,
    metadata: FeatureMetadata,
    tag: &str,
    entry: CacheEntry,
) -> FeatureManifest {
    let resolved_version = metadata
        .version
        .as_ref()
        .map_or_else(|| tag.to_string(), ToString::to_string);
    FeatureManifest {
        id: reference.id(),
        reference: reference.clone(),
        metadata,
        resolved_version,
        package_digest: Some(entry.digest),
        package_dir: entry.local_path,
    }
}

fn require_install_script(label: &str, dir: &Path) -> Result<(), FeatureResolutionError> {
    for file in [FEATURE_MANIFEST_FILE, FEATURE_INSTALL_SCRIPT] {
        if !dir.join(file).is_file() {
            return Err(FeatureResolutionError::InvalidManifest {
                feature: label.to_string(),
                message: format!("package has no {file}"),
            });
        }
    }
    Ok(())
}

fn registry_error(label: &str, error: RegistryError) -> FeatureResolutionError {
    match error {
        RegistryError::NotFound(_) => FeatureResolutionError::NotFound {
            feature: label.to_string(),
        },
        RegistryError::Transport(message) => FeatureResolutionError::Registry {
            feature: label.to_string(),
            message,
        },
    }
}

fn closed(reference: &FeatureRef) -> FeatureResolutionError {
    FeatureResolutionError::Registry {
        feature: reference.to_string(),
        message: "resolution was interrupted".into(),
    }
}
