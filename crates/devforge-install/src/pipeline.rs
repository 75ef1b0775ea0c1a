//! End-to-end pipeline: configuration, feature resolution, planning, and
//! installation.
//!
//! Everything up to and including the plan happens before the container is
//! touched, so configuration, resolution, and cycle errors never leave a
//! partially modified container behind.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use devforge_common::config::Settings;
use devforge_common::error::Result;
use devforge_common::types::{ContainerTarget, FeatureId};
use devforge_config::extends::FsSource;
use devforge_config::{EffectiveConfig, ResolveInputs, SubstitutionContext, resolve_configuration};
use devforge_features::cache::CacheStats;
use devforge_features::{
    DependencyGraph, FeatureRequest, FeatureResolver, InstallPlan, PackageCache, RegistryClient,
    plan,
};
use tokio_util::sync::CancellationToken;

use crate::exec::ContainerExec;
use crate::orchestrator::{InstallReport, Orchestrator};

/// A configuration together with the plan for installing its features.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    /// Effective configuration before any feature contributions.
    pub config: EffectiveConfig,
    /// Features in install order.
    pub plan: InstallPlan,
}

/// Wires the stages together around one shared package cache.
pub struct Pipeline {
    settings: Settings,
    registry: Arc<dyn RegistryClient>,
    cache: Arc<PackageCache>,
    refresh: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Opens the package cache named by `settings`.
    ///
    /// # Errors
    ///
    /// Returns a cache error if the cache directory cannot be created.
    pub fn open(settings: Settings, registry: Arc<dyn RegistryClient>) -> Result<Self> {
        let cache = Arc::new(PackageCache::open(&settings.cache_dir)?);
        Ok(Self {
            settings,
            registry,
            cache,
            refresh: false,
        })
    }

    /// Re-resolves floating tags instead of trusting recorded resolutions.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared package cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    /// A resolver whose local references are relative to `base_dir`.
    #[must_use]
    pub fn resolver(&self, base_dir: &Path) -> FeatureResolver {
        FeatureResolver::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            &self.settings,
            base_dir,
        )
        .with_refresh(self.refresh)
    }

    /// Loads and merges the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error.
    pub fn load_config(
        &self,
        path: &Path,
        inputs: &ResolveInputs,
        ctx: &SubstitutionContext,
    ) -> Result<EffectiveConfig> {
        tracing::info!(path = %path.display(), "reading configuration");
        Ok(resolve_configuration(FsSource, path, inputs, ctx)?)
    }

    /// Resolves the enabled features of `config` and orders them.
    ///
    /// # Errors
    ///
    /// Returns a resolution error or a cycle error. Nothing is installed.
    pub async fn plan(&self, config: &EffectiveConfig, base_dir: &Path) -> Result<InstallPlan> {
        let resolver = self.resolver(base_dir);
        let mut requests = Vec::new();
        for (key, value) in config.enabled_features() {
            requests.push(FeatureRequest {
                reference: resolver.parse_ref(key)?,
                options: value.selected_options(),
            });
        }
        let declared: Vec<FeatureId> = requests.iter().map(|r| r.reference.id()).collect();

        let mut explicit = Vec::new();
        for raw in config.override_feature_install_order.iter().flatten() {
            match resolver.parse_ref(raw) {
                Ok(reference) => explicit.push(reference.id()),
                Err(e) => tracing::warn!(entry = %raw, error = %e, "ignoring install order override"),
            }
        }

        let graph = DependencyGraph::resolve(&resolver, &requests).await?;
        Ok(plan(&graph, &explicit, &declared))
    }

    /// Loads the configuration at `path` and plans its features.
    ///
    /// Local feature paths are relative to the configuration's directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration, resolution, or cycle error.
    pub async fn prepare(
        &self,
        path: &Path,
        inputs: &ResolveInputs,
        ctx: &SubstitutionContext,
    ) -> Result<Prepared> {
        let config = self.load_config(path, inputs, ctx)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let plan = self.plan(&config, base_dir).await?;
        Ok(Prepared { config, plan })
    }

    /// Installs a prepared plan into `target`.
    ///
    /// # Errors
    ///
    /// Returns an installation error naming the failed feature.
    pub async fn install(
        &self,
        prepared: Prepared,
        exec: &dyn ContainerExec,
        target: ContainerTarget,
        cancel: CancellationToken,
    ) -> Result<InstallReport> {
        let orchestrator = Orchestrator::new(exec, target, self.settings.staging_root.clone())
            .with_cancellation(cancel);
        Ok(orchestrator.install(&prepared.plan, prepared.config).await?)
    }

    /// Runs the post-container substitution pass with the container's
    /// environment.
    ///
    /// If the environment cannot be read, container variables resolve to
    /// empty strings and a warning is logged.
    pub async fn finalize(
        &self,
        config: &EffectiveConfig,
        ctx: SubstitutionContext,
        exec: &dyn ContainerExec,
        target: &ContainerTarget,
    ) -> EffectiveConfig {
        let container_env = read_container_env(exec, target).await;
        config.resolve_container_phase(&ctx.into_post_container(container_env))
    }

    /// Ends the cache session and returns its counters.
    pub fn close(&self) -> CacheStats {
        self.cache.close()
    }
}

/// Reads the container environment with `env -0`, which keeps multi-line
/// values intact. Falls back to plain `env` for images whose `env` lacks `-0`.
async fn read_container_env(exec: &dyn ContainerExec, target: &ContainerTarget) -> BTreeMap<String, String> {
    let no_env = BTreeMap::new();
    match exec.exec(target, "env", &["-0".to_string()], &no_env, "/").await {
        Ok(output) if output.success() => return parse_env(&output.stdout, '\0'),
        Ok(output) => tracing::debug!(exit_code = output.exit_code, "env -0 unsupported, retrying without it"),
        Err(e) => {
            tracing::warn!(error = %e, "could not read container environment");
            return no_env;
        }
    }
    match exec.exec(target, "env", &[], &no_env, "/").await {
        Ok(output) if output.success() => parse_env(&output.stdout, '\n'),
        Ok(output) => {
            tracing::warn!(exit_code = output.exit_code, "could not read container environment");
            no_env
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not read container environment");
            no_env
        }
    }
}

/// Parses `env` output split on `separator`. With newline separation, lines
/// without `=` continue a multi-line value and are dropped.
fn parse_env(output: &str, separator: char) -> BTreeMap<String, String> {
    output
        .split(separator)
        .filter_map(|record| record.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
