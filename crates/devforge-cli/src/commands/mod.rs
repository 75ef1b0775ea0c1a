//! CLI command definitions and dispatch.

pub mod cache;
pub mod install;
pub mod plan;
pub mod read_configuration;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use devforge_common::config::Settings;
use devforge_config::id::workspace_devcontainer_id;
use devforge_config::{FeatureValue, HookKind, Overrides, ResolveInputs, SubstitutionContext};
use devforge_features::DirectoryRegistry;
use devforge_install::Pipeline;
use indexmap::IndexMap;

/// Default configuration location inside a workspace.
const DEFAULT_CONFIG_PATH: &str = ".devcontainer/devcontainer.json";

/// Directory under the cache root used as the registry mirror by default.
const DEFAULT_MIRROR_DIR: &str = "mirror";

/// devforge: dev container configuration and feature installer.
#[derive(Parser, Debug)]
#[command(name = "devforge", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON file with settings; flags below override it.
    #[arg(long, global = true, env = "DEVFORGE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Package cache directory.
    #[arg(long, global = true, env = devforge_common::constants::CACHE_DIR_ENV)]
    pub cache_dir: Option<PathBuf>,

    /// Upper bound on concurrent feature fetches.
    #[arg(long, global = true)]
    pub max_parallel_fetches: Option<usize>,

    /// Directory mirroring the feature registry (`<id>/<tag>.tgz`).
    #[arg(long, global = true, env = "DEVFORGE_REGISTRY_MIRROR")]
    pub registry_mirror: Option<PathBuf>,

    /// Re-resolve floating tags instead of using recorded resolutions.
    #[arg(long, global = true)]
    pub refresh: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration as JSON.
    ReadConfiguration(read_configuration::ReadConfigurationArgs),
    /// Resolve features and print the install order.
    Plan(plan::PlanArgs),
    /// Install features into a running container.
    Install(install::InstallArgs),
    /// Inspect or clear the package cache.
    Cache(cache::CacheArgs),
}

/// Options shared by every command that reads a configuration.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Workspace folder on the host.
    #[arg(long, default_value = ".")]
    pub workspace_folder: PathBuf,

    /// Configuration file; defaults to `.devcontainer/devcontainer.json`
    /// inside the workspace.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON object of extra features, e.g. `{"node": "20"}`.
    #[arg(long)]
    pub additional_features: Option<String>,

    /// Lifecycle hook that must not run (repeatable), e.g. `postCreate`.
    #[arg(long = "skip-hook")]
    pub skip_hooks: Vec<HookKind>,

    /// Replaces `overrideFeatureInstallOrder` (repeatable).
    #[arg(long = "install-order")]
    pub install_order: Vec<String>,

    /// File holding the base image's `devcontainer.metadata` label.
    #[arg(long)]
    pub image_metadata: Option<PathBuf>,
}

impl ConfigArgs {
    /// Absolute workspace folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory is unavailable.
    pub fn workspace(&self) -> anyhow::Result<PathBuf> {
        if self.workspace_folder.is_absolute() {
            return Ok(self.workspace_folder.clone());
        }
        let cwd = std::env::current_dir().context("current directory is unavailable")?;
        Ok(cwd.join(&self.workspace_folder))
    }

    /// Configuration path, resolved against the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be determined.
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        let workspace = self.workspace()?;
        Ok(match &self.config {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => workspace.join(path),
            None => workspace.join(DEFAULT_CONFIG_PATH),
        })
    }

    /// Merge inputs built from the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if `--additional-features` is not a JSON object of
    /// feature values or the metadata file cannot be read.
    pub fn inputs(&self) -> anyhow::Result<ResolveInputs> {
        let mut additional_features = IndexMap::new();
        if let Some(text) = &self.additional_features {
            let value: serde_json::Value =
                serde_json::from_str(text).context("--additional-features is not valid JSON")?;
            let object = value
                .as_object()
                .context("--additional-features must be a JSON object")?;
            for (id, selector) in object {
                let feature = FeatureValue::from_value(selector)
                    .map_err(|e| anyhow::anyhow!("--additional-features \"{id}\": {e}"))?;
                let _ = additional_features.insert(id.clone(), feature);
            }
        }
        let image_metadata = self
            .image_metadata
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))
            })
            .transpose()?;
        Ok(ResolveInputs {
            defaults: None,
            overrides: Overrides {
                layer: None,
                additional_features,
                skip_hooks: self.skip_hooks.iter().copied().collect::<BTreeSet<_>>(),
                feature_install_order: (!self.install_order.is_empty())
                    .then(|| self.install_order.clone()),
            },
            image_metadata,
        })
    }

    /// Pre-container substitution context from the host environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be determined.
    pub fn context(&self) -> anyhow::Result<SubstitutionContext> {
        let workspace = self.workspace()?.display().to_string();
        let config = self.config_path()?;
        let env: BTreeMap<String, String> = std::env::vars().collect();
        Ok(
            SubstitutionContext::pre_container(workspace.clone(), env)
                .with_devcontainer_id(workspace_devcontainer_id(&workspace, &config)),
        )
    }
}

impl Cli {
    /// Settings from the optional file, overridden by flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be read or parsed.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid settings in {}", path.display()))?
            }
            None => Settings::default(),
        };
        if let Some(dir) = &self.cache_dir {
            settings = settings.with_cache_dir(dir);
        }
        if let Some(n) = self.max_parallel_fetches {
            settings.max_parallel_fetches = n;
        }
        Ok(settings)
    }

    /// Pipeline over the configured cache and registry mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if settings cannot be loaded or the cache opened.
    pub fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let settings = self.settings()?;
        let mirror = self
            .registry_mirror
            .clone()
            .unwrap_or_else(|| settings.cache_dir.join(DEFAULT_MIRROR_DIR));
        tracing::debug!(mirror = %mirror.display(), "using registry mirror");
        let pipeline = Pipeline::open(settings, Arc::new(DirectoryRegistry::new(mirror)))?;
        Ok(pipeline.with_refresh(self.refresh))
    }
}

/// A single-use async runtime for one command.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Directory local feature paths are relative to.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path.parent().unwrap_or_else(|| Path::new("."))
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::ReadConfiguration(args) => read_configuration::execute(&cli, args),
        Command::Plan(args) => plan::execute(&cli, args),
        Command::Install(args) => install::execute(&cli, args),
        Command::Cache(args) => cache::execute(&cli, args),
    }
}
