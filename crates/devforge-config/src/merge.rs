//! Layer folding.
//!
//! Layers are applied as defaults, then bases, then the user's file, then
//! overrides, then image metadata. Scalars are last-writer-wins, lists are
//! concatenated, and maps are merged key by key. Merging never fails: every
//! shape check already happened when the layers were built.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::effective::EffectiveConfig;
use crate::feature_value::FeatureValue;
use crate::image_metadata::entry_origin;
use crate::layer::ConfigLayer;
use crate::lifecycle::HookKind;

/// Caller-supplied adjustments applied after the user's configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// A partial configuration layered over the user's file.
    pub layer: Option<ConfigLayer>,
    /// Features added on top of the configured ones.
    pub additional_features: IndexMap<String, FeatureValue>,
    /// Hook kinds that must not run.
    pub skip_hooks: BTreeSet<HookKind>,
    /// Replaces `overrideFeatureInstallOrder` when set.
    pub feature_install_order: Option<Vec<String>>,
}

/// How a layer's hook commands enter the lifecycle slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookPolicy {
    /// Layer replaces the user command.
    User,
    /// Layer appends a contribution attributed to its origin.
    Contributed,
}

/// Folds all layers into one effective configuration.
#[must_use]
pub fn merge(
    defaults: Option<&ConfigLayer>,
    bases: &[ConfigLayer],
    raw: &ConfigLayer,
    overrides: &Overrides,
    image_metadata: &[ConfigLayer],
) -> EffectiveConfig {
    let mut config = EffectiveConfig::default();

    for layer in defaults.into_iter().chain(bases).chain(std::iter::once(raw)) {
        apply(&mut config, layer, HookPolicy::User);
    }

    if let Some(layer) = &overrides.layer {
        apply(&mut config, layer, HookPolicy::User);
    }
    for (id, value) in &overrides.additional_features {
        let _ = config.features.insert(id.clone(), value.clone());
    }
    if let Some(order) = &overrides.feature_install_order {
        config.override_feature_install_order = Some(order.clone());
    }

    for layer in image_metadata {
        apply(&mut config, layer, HookPolicy::Contributed);
    }

    config.skipped_hooks.extend(overrides.skip_hooks.iter().copied());
    tracing::debug!(
        layers = bases.len() + image_metadata.len() + 1,
        features = config.features.len(),
        "merged configuration"
    );
    config
}

fn apply(config: &mut EffectiveConfig, layer: &ConfigLayer, hooks: HookPolicy) {
    let scalar = |slot: &mut Option<String>, value: &Option<String>| {
        if value.is_some() {
            slot.clone_from(value);
        }
    };
    scalar(&mut config.name, &layer.name);
    scalar(&mut config.image, &layer.image);
    scalar(&mut config.workspace_folder, &layer.workspace_folder);
    scalar(&mut config.workspace_mount, &layer.workspace_mount);
    scalar(&mut config.remote_user, &layer.remote_user);
    scalar(&mut config.container_user, &layer.container_user);
    scalar(&mut config.shutdown_action, &layer.shutdown_action);
    config.override_command = layer.override_command.or(config.override_command);
    config.privileged = layer.privileged.or(config.privileged);
    config.init = layer.init.or(config.init);
    if layer.override_feature_install_order.is_some() {
        config
            .override_feature_install_order
            .clone_from(&layer.override_feature_install_order);
    }

    config.run_args.extend(layer.run_args.iter().cloned());
    config.cap_add.extend(layer.cap_add.iter().cloned());
    config.security_opt.extend(layer.security_opt.iter().cloned());
    config.mounts.extend(layer.mounts.iter().cloned());
    config.forward_ports.extend(layer.forward_ports.iter().cloned());

    config
        .container_env
        .extend(layer.container_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    config
        .remote_env
        .extend(layer.remote_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    // IndexMap::insert keeps the first position of an existing key.
    for (id, value) in &layer.features {
        let _ = config.features.insert(id.clone(), value.clone());
    }

    match hooks {
        HookPolicy::User => {
            for (kind, command) in &layer.hooks {
                config.lifecycle.set_user(*kind, command.clone());
            }
        }
        HookPolicy::Contributed => {
            let origin = entry_origin(layer);
            for (kind, command) in &layer.hooks {
                config.lifecycle.contribute(*kind, origin.clone(), command.clone());
            }
        }
    }

    for (key, value) in &layer.extra {
        let _ = config.extra.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::lifecycle::LifecycleCommand;

    fn layer(value: &serde_json::Value, source: &str) -> ConfigLayer {
        ConfigLayer::from_value(value, source).expect("layer")
    }

    #[test]
    fn later_scalar_wins() {
        let defaults = layer(&json!({"name": "defaults", "image": "debian"}), "defaults");
        let base = layer(&json!({"name": "base", "remoteUser": "base"}), "base.json");
        let raw = layer(&json!({"name": "raw"}), "devcontainer.json");
        let overrides = Overrides {
            layer: Some(layer(&json!({"remoteUser": "override"}), "overrides")),
            ..Overrides::default()
        };
        let config = merge(Some(&defaults), &[base], &raw, &overrides, &[]);
        assert_eq!(config.name.as_deref(), Some("raw"));
        assert_eq!(config.image.as_deref(), Some("debian"));
        assert_eq!(config.remote_user.as_deref(), Some("override"));
    }

    #[test]
    fn image_metadata_dominates_scalars() {
        let raw = layer(&json!({"remoteUser": "me"}), "devcontainer.json");
        let meta = layer(&json!({"remoteUser": "vscode"}), "devcontainer.metadata[0]");
        let config = merge(None, &[], &raw, &Overrides::default(), &[meta]);
        assert_eq!(config.remote_user.as_deref(), Some("vscode"));
    }

    #[test]
    fn arrays_concatenate_in_layer_order() {
        let base = layer(
            &json!({"mounts": ["source=a,target=/a,type=bind"], "runArgs": ["--init"]}),
            "base.json",
        );
        let raw = layer(
            &json!({"mounts": ["source=b,target=/b,type=bind", "source=a,target=/a,type=bind"],
                    "runArgs": ["--init"]}),
            "devcontainer.json",
        );
        let config = merge(None, &[base], &raw, &Overrides::default(), &[]);
        assert_eq!(
            config.mounts,
            vec![
                json!("source=a,target=/a,type=bind"),
                json!("source=b,target=/b,type=bind"),
                json!("source=a,target=/a,type=bind"),
            ]
        );
        assert_eq!(config.run_args, vec!["--init", "--init"]);
    }

    #[test]
    fn maps_merge_key_wise() {
        let base = layer(&json!({"containerEnv": {"A": "base", "B": "base"}}), "base.json");
        let raw = layer(&json!({"containerEnv": {"B": "raw", "C": "raw"}}), "devcontainer.json");
        let config = merge(None, &[base], &raw, &Overrides::default(), &[]);
        assert_eq!(config.container_env["A"], "base");
        assert_eq!(config.container_env["B"], "raw");
        assert_eq!(config.container_env["C"], "raw");
    }

    #[test]
    fn features_keep_first_declaration_position() {
        let base = layer(&json!({"features": {"node": true, "go": true}}), "base.json");
        let raw = layer(&json!({"features": {"python": true, "node": "20"}}), "devcontainer.json");
        let overrides = Overrides {
            additional_features: IndexMap::from([("rust".to_string(), FeatureValue::Enabled(true))]),
            ..Overrides::default()
        };
        let config = merge(None, &[base], &raw, &overrides, &[]);
        let keys: Vec<_> = config.features.keys().cloned().collect();
        assert_eq!(keys, vec!["node", "go", "python", "rust"]);
        assert_eq!(config.features["node"], FeatureValue::Version("20".into()));
    }

    #[test]
    fn config_hooks_replace_metadata_hooks_append() {
        let base = layer(&json!({"postCreateCommand": "base"}), "base.json");
        let raw = layer(&json!({"postCreateCommand": "raw"}), "devcontainer.json");
        let meta = layer(
            &json!({"id": "ghcr.io/acme/features/node:1", "postCreateCommand": "npm ci"}),
            "devcontainer.metadata[0]",
        );
        let config = merge(None, &[base], &raw, &Overrides::default(), &[meta]);
        let entries = config.lifecycle_commands(HookKind::PostCreate);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].origin, "ghcr.io/acme/features/node:1");
        assert_eq!(entries[1].command, LifecycleCommand::Shell("raw".into()));
    }

    #[test]
    fn overrides_control_order_and_skips() {
        let raw = layer(
            &json!({"overrideFeatureInstallOrder": ["a"], "postStartCommand": "x"}),
            "devcontainer.json",
        );
        let overrides = Overrides {
            skip_hooks: BTreeSet::from([HookKind::PostStart]),
            feature_install_order: Some(vec!["b".into(), "a".into()]),
            ..Overrides::default()
        };
        let config = merge(None, &[], &raw, &overrides, &[]);
        assert_eq!(
            config.override_feature_install_order,
            Some(vec!["b".to_string(), "a".to_string()])
        );
        assert!(config.lifecycle_commands(HookKind::PostStart).is_empty());
    }

    #[test]
    fn unknown_fields_survive() {
        let base = layer(&json!({"customizations": {"a": 1}, "hostRequirements": {"cpus": 2}}), "b");
        let raw = layer(&json!({"customizations": {"b": 2}}), "r");
        let config = merge(None, &[base], &raw, &Overrides::default(), &[]);
        assert_eq!(config.extra["customizations"], json!({"b": 2}));
        assert_eq!(config.extra["hostRequirements"], json!({"cpus": 2}));
    }
}
