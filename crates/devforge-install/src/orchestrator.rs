//! Sequential feature installation.
//!
//! Features are installed one at a time in plan order. The first failure
//! stops the run; nothing already installed is rolled back.

use std::collections::BTreeMap;

use devforge_common::constants::{
    CONTAINER_USER_ENV, FEATURE_ID_ENV, FEATURE_PATH_ENV, REMOTE_USER_ENV,
};
use devforge_common::error::InstallationError;
use devforge_common::types::{ContainerTarget, FeatureId};
use devforge_config::EffectiveConfig;
use devforge_features::graph::FeatureNode;
use devforge_features::options::option_env;
use devforge_features::InstallPlan;
use tokio_util::sync::CancellationToken;

use crate::exec::ContainerExec;

/// Shell used to run install scripts.
const INSTALL_SHELL: &str = "/bin/sh";

/// Marks the script executable and runs it from the staging directory.
const INSTALL_SCRIPT: &str = "chmod +x ./install.sh && ./install.sh";

/// Outcome of an installation run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    /// Features installed, in order.
    pub installed: Vec<FeatureId>,
    /// Features not attempted because the run was cancelled.
    pub skipped: Vec<FeatureId>,
    /// Whether cancellation stopped the run early.
    pub cancelled: bool,
    /// The configuration with every installed feature's contribution folded in.
    pub config: EffectiveConfig,
}

/// Installs an [`InstallPlan`] into one container.
pub struct Orchestrator<'a> {
    exec: &'a dyn ContainerExec,
    target: ContainerTarget,
    staging_root: String,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("target", &self.target)
            .field("staging_root", &self.staging_root)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator that stages packages under `staging_root`.
    pub fn new(
        exec: &'a dyn ContainerExec,
        target: ContainerTarget,
        staging_root: impl Into<String>,
    ) -> Self {
        Self {
            exec,
            target,
            staging_root: staging_root.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to stop between features.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Installs every feature of `plan` in order and folds each one's
    /// contribution into `config`.
    ///
    /// Cancellation is checked before each feature: the feature in progress
    /// always finishes, the rest are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns an `InstallationError` for the first feature whose package
    /// cannot be staged or whose script fails, listing the features that
    /// were installed before it.
    pub async fn install(
        &self,
        plan: &InstallPlan,
        mut config: EffectiveConfig,
    ) -> Result<InstallReport, InstallationError> {
        let mut installed: Vec<FeatureId> = Vec::new();
        let mut skipped = Vec::new();
        let mut cancelled = false;

        for (index, node) in plan.features.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                skipped = plan.features[index..]
                    .iter()
                    .map(|n| n.id().clone())
                    .collect();
                tracing::warn!(skipped = skipped.len(), "installation cancelled");
                break;
            }
            self.install_one(index, node, &config, &installed).await?;

            let kept = config.absorb(&node.manifest.contribution());
            for key in kept {
                tracing::debug!(feature = %node.id(), key = %key, "containerEnv already set, keeping existing value");
            }
            installed.push(node.id().clone());
        }

        tracing::info!(
            installed = installed.len(),
            skipped = skipped.len(),
            "feature installation finished"
        );
        Ok(InstallReport {
            installed,
            skipped,
            cancelled,
            config,
        })
    }

    async fn install_one(
        &self,
        index: usize,
        node: &FeatureNode,
        config: &EffectiveConfig,
        installed: &[FeatureId],
    ) -> Result<(), InstallationError> {
        let feature = node.id().to_string();
        let succeeded = || installed.iter().map(ToString::to_string).collect::<Vec<_>>();
        let staging = staging_path(&self.staging_root, node.id(), index);
        tracing::info!(
            feature = %feature,
            version = %node.manifest.resolved_version,
            staging = %staging,
            "installing feature"
        );

        self.exec
            .copy_dir(&self.target, &node.manifest.package_dir, &staging)
            .await
            .map_err(|e| InstallationError::Materialize {
                feature: feature.clone(),
                message: e.to_string(),
                succeeded: succeeded(),
            })?;

        let env = script_env(node, config, &staging);
        let output = self
            .exec
            .exec(
                &self.target,
                INSTALL_SHELL,
                &["-c".to_string(), INSTALL_SCRIPT.to_string()],
                &env,
                &staging,
            )
            .await
            .map_err(|e| InstallationError::Exec {
                feature: feature.clone(),
                message: e.to_string(),
                succeeded: succeeded(),
            })?;

        if !output.success() {
            tracing::error!(feature = %feature, exit_code = output.exit_code, "install script failed");
            return Err(InstallationError::ScriptFailed {
                feature,
                exit_code: output.exit_code,
                stderr: output.stderr,
                succeeded: succeeded(),
            });
        }
        tracing::info!(feature = %feature, "feature installed");
        Ok(())
    }
}

/// `<root>/<short name>_<index>`, with anything but ASCII alphanumerics,
/// `-` and `.` in the name replaced by `_`.
fn staging_path(root: &str, id: &FeatureId, index: usize) -> String {
    let name: String = id
        .short_name()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{name}_{index}", root.trim_end_matches('/'))
}

/// Install-time environment: option variables, then the fixed variables,
/// which win on collision.
fn script_env(node: &FeatureNode, config: &EffectiveConfig, staging: &str) -> BTreeMap<String, String> {
    let mut env = option_env(&node.options);
    let _ = env.insert(FEATURE_ID_ENV.into(), node.id().to_string());
    let _ = env.insert(FEATURE_PATH_ENV.into(), staging.into());
    if let Some(user) = &config.remote_user {
        let _ = env.insert(REMOTE_USER_ENV.into(), user.clone());
    }
    if let Some(user) = &config.container_user {
        let _ = env.insert(CONTAINER_USER_ENV.into(), user.clone());
    }
    env
}
