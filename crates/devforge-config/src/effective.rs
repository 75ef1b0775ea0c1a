//! The effective configuration handed to feature installation and to the
//! container runtime.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::feature_value::FeatureValue;
use crate::lifecycle::{HookEntry, HookKind, LifecycleCommand, LifecycleHooks};
use crate::substitution::{SubstitutionContext, resolve_str};

/// Fully merged configuration.
///
/// After hand-off to installation, fields may only grow: features append
/// environment variables, mounts, capabilities, and hook commands, but never
/// replace values the user or an earlier feature set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Workspace folder inside the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,
    /// Mount specification of the workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_mount: Option<String>,
    /// User for tools and lifecycle commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    /// User the container runs as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_user: Option<String>,
    /// Whether the image command is replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_command: Option<bool>,
    /// Whether the container runs privileged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    /// Whether an init process is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
    /// What happens to the container on disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_action: Option<String>,
    /// Extra runtime arguments, concatenated across layers.
    pub run_args: Vec<String>,
    /// Added capabilities, concatenated across layers.
    pub cap_add: Vec<String>,
    /// Security options, concatenated across layers.
    pub security_opt: Vec<String>,
    /// Mounts, concatenated across layers.
    pub mounts: Vec<Value>,
    /// Forwarded ports, concatenated across layers.
    pub forward_ports: Vec<Value>,
    /// Container environment, merged key-wise.
    pub container_env: BTreeMap<String, String>,
    /// Tool environment, merged key-wise.
    pub remote_env: BTreeMap<String, String>,
    /// Requested features in first-declaration order.
    pub features: IndexMap<String, FeatureValue>,
    /// Explicit feature install order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_feature_install_order: Option<Vec<String>>,
    /// Lifecycle hook commands.
    pub lifecycle: LifecycleHooks,
    /// Hook kinds the caller asked to skip.
    pub skipped_hooks: BTreeSet<HookKind>,
    /// Fields not interpreted here, last writer wins.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// `${devcontainerId}` used by the pre-container pass, reused by the
    /// post-container pass when its context has none.
    #[serde(skip)]
    pub devcontainer_id: Option<String>,
}

/// What one installed feature adds to the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureContribution {
    /// Feature id, recorded as the origin of its hook commands.
    pub origin: String,
    /// Container environment variables.
    pub container_env: BTreeMap<String, String>,
    /// Mounts to add.
    pub mounts: Vec<Value>,
    /// Capabilities to add.
    pub cap_add: Vec<String>,
    /// Security options to add.
    pub security_opt: Vec<String>,
    /// Requests a privileged container.
    pub privileged: Option<bool>,
    /// Requests an init process.
    pub init: Option<bool>,
    /// Hook commands.
    pub hooks: BTreeMap<HookKind, LifecycleCommand>,
}

impl EffectiveConfig {
    /// Enabled features in declaration order.
    pub fn enabled_features(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.features
            .iter()
            .filter(|(_, v)| v.is_enabled())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Commands to run for `kind`, in order, honoring skipped kinds.
    #[must_use]
    pub fn lifecycle_commands(&self, kind: HookKind) -> Vec<HookEntry> {
        self.lifecycle.runnable(kind, &self.skipped_hooks)
    }

    /// Folds a feature's contribution in without overwriting anything.
    ///
    /// Returns the container environment keys that were left unchanged
    /// because a value was already set.
    pub fn absorb(&mut self, contribution: &FeatureContribution) -> Vec<String> {
        let mut kept = Vec::new();
        for (key, value) in &contribution.container_env {
            if self.container_env.contains_key(key) {
                kept.push(key.clone());
            } else {
                let _ = self.container_env.insert(key.clone(), value.clone());
            }
        }
        self.mounts.extend(contribution.mounts.iter().cloned());
        self.cap_add.extend(contribution.cap_add.iter().cloned());
        self.security_opt
            .extend(contribution.security_opt.iter().cloned());
        if self.privileged.is_none() {
            self.privileged = contribution.privileged;
        }
        if self.init.is_none() {
            self.init = contribution.init;
        }
        for (kind, command) in &contribution.hooks {
            self.lifecycle
                .contribute(*kind, contribution.origin.clone(), command.clone());
        }
        kept
    }

    /// Runs the post-container substitution pass over the fields deferred
    /// until the container's environment is known.
    #[must_use]
    pub fn resolve_container_phase(&self, ctx: &SubstitutionContext) -> Self {
        let ctx = match (&ctx.devcontainer_id, &self.devcontainer_id) {
            (None, Some(id)) => ctx.clone().with_devcontainer_id(id.clone()),
            _ => ctx.clone(),
        };
        let substitute = |s: &str| resolve_str(s, &ctx);
        Self {
            remote_env: self
                .remote_env
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v)))
                .collect(),
            lifecycle: self.lifecycle.map_strings(&substitute),
            ..self.clone()
        }
    }

    /// Serializes the configuration for the container runtime collaborator.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use devforge_common::types::Phase;

    use super::*;

    #[test]
    fn absorb_unions_container_env() {
        let mut config = EffectiveConfig {
            container_env: BTreeMap::from([("X".to_string(), "1".to_string())]),
            ..EffectiveConfig::default()
        };
        let contribution = FeatureContribution {
            origin: "f".into(),
            container_env: BTreeMap::from([("Y".to_string(), "2".to_string())]),
            ..FeatureContribution::default()
        };
        let kept = config.absorb(&contribution);
        assert!(kept.is_empty());
        assert_eq!(
            config.container_env,
            BTreeMap::from([
                ("X".to_string(), "1".to_string()),
                ("Y".to_string(), "2".to_string())
            ])
        );
    }

    #[test]
    fn absorb_never_overwrites() {
        let mut config = EffectiveConfig {
            container_env: BTreeMap::from([("X".to_string(), "user".to_string())]),
            privileged: Some(false),
            ..EffectiveConfig::default()
        };
        let contribution = FeatureContribution {
            origin: "f".into(),
            container_env: BTreeMap::from([("X".to_string(), "feature".to_string())]),
            privileged: Some(true),
            init: Some(true),
            cap_add: vec!["SYS_PTRACE".into()],
            ..FeatureContribution::default()
        };
        let kept = config.absorb(&contribution);
        assert_eq!(kept, vec!["X"]);
        assert_eq!(config.container_env["X"], "user");
        assert_eq!(config.privileged, Some(false));
        assert_eq!(config.init, Some(true));
        assert_eq!(config.cap_add, vec!["SYS_PTRACE"]);
    }

    #[test]
    fn feature_hooks_precede_user_hook() {
        let mut config = EffectiveConfig::default();
        config
            .lifecycle
            .set_user(HookKind::PostCreate, LifecycleCommand::Shell("user".into()));
        for origin in ["f1", "f2"] {
            let contribution = FeatureContribution {
                origin: origin.into(),
                hooks: BTreeMap::from([(
                    HookKind::PostCreate,
                    LifecycleCommand::Shell(origin.into()),
                )]),
                ..FeatureContribution::default()
            };
            let _ = config.absorb(&contribution);
        }
        let origins: Vec<_> = config
            .lifecycle_commands(HookKind::PostCreate)
            .into_iter()
            .map(|e| e.origin)
            .collect();
        assert_eq!(origins, vec!["f1", "f2", "user"]);
    }

    #[test]
    fn container_phase_resolves_deferred_fields() {
        let mut config = EffectiveConfig {
            remote_env: BTreeMap::from([(
                "PATH".to_string(),
                "${containerEnv:PATH}:/extra".to_string(),
            )]),
            ..EffectiveConfig::default()
        };
        config.lifecycle.set_user(
            HookKind::PostStart,
            LifecycleCommand::Shell("echo ${containerEnv:HOME}".into()),
        );
        let ctx = SubstitutionContext::pre_container("/w", BTreeMap::new()).into_post_container(
            BTreeMap::from([
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ]),
        );
        assert_eq!(ctx.phase, Phase::PostContainer);
        let resolved = config.resolve_container_phase(&ctx);
        assert_eq!(resolved.remote_env["PATH"], "/usr/bin:/extra");
        assert_eq!(
            resolved.lifecycle_commands(HookKind::PostStart)[0].command,
            LifecycleCommand::Shell("echo /root".into())
        );
    }

    #[test]
    fn enabled_features_skip_disabled() {
        let mut config = EffectiveConfig::default();
        let _ = config.features.insert("a".into(), FeatureValue::Enabled(true));
        let _ = config.features.insert("b".into(), FeatureValue::Enabled(false));
        let ids: Vec<_> = config.enabled_features().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
