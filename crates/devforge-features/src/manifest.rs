//! Feature manifests (`devcontainer-feature.json`).
//!
//! The document is validated once, when it is read, so that later stages
//! only ever see typed values.

use std::collections::BTreeMap;
use std::path::PathBuf;

use devforge_common::error::FeatureResolutionError;
use devforge_common::types::{FeatureId, Sha256Digest};
use devforge_config::effective::FeatureContribution;
use devforge_config::{FeatureValue, HookKind, LifecycleCommand, OptionValue};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::options::OptionSpec;
use crate::reference::FeatureRef;

/// Validated contents of a feature manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMetadata {
    /// Feature id as declared by its author.
    pub id: String,
    /// Declared version.
    pub version: Option<semver::Version>,
    /// Display name.
    pub name: Option<String>,
    /// Declared options, in manifest order.
    pub options: IndexMap<String, OptionSpec>,
    /// Hard dependencies: reference → options to install it with.
    pub depends_on: IndexMap<String, BTreeMap<String, OptionValue>>,
    /// Soft ordering hints.
    pub installs_after: Vec<String>,
    /// Container environment the feature contributes.
    pub container_env: BTreeMap<String, String>,
    /// Mounts the feature contributes.
    pub mounts: Vec<Value>,
    /// Capabilities the feature needs.
    pub cap_add: Vec<String>,
    /// Security options the feature needs.
    pub security_opt: Vec<String>,
    /// Whether the feature needs a privileged container.
    pub privileged: Option<bool>,
    /// Whether the feature needs an init process.
    pub init: Option<bool>,
    /// Lifecycle commands the feature contributes.
    pub hooks: BTreeMap<HookKind, LifecycleCommand>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    id: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    options: IndexMap<String, OptionSpec>,
    #[serde(default)]
    depends_on: IndexMap<String, Value>,
    #[serde(default)]
    installs_after: Vec<String>,
    #[serde(default)]
    container_env: BTreeMap<String, String>,
    #[serde(default)]
    mounts: Vec<Value>,
    #[serde(default)]
    cap_add: Vec<String>,
    #[serde(default)]
    security_opt: Vec<String>,
    #[serde(default)]
    privileged: Option<bool>,
    #[serde(default)]
    init: Option<bool>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl FeatureMetadata {
    /// Parses and validates manifest bytes. `feature` labels errors.
    ///
    /// # Errors
    ///
    /// Returns `FeatureResolutionError::InvalidManifest` describing the
    /// first structural problem found.
    pub fn parse(feature: &str, bytes: &[u8]) -> Result<Self, FeatureResolutionError> {
        let invalid = |message: String| FeatureResolutionError::InvalidManifest {
            feature: feature.to_string(),
            message,
        };
        let text = std::str::from_utf8(bytes).map_err(|e| invalid(format!("not UTF-8: {e}")))?;
        let value = devforge_common::jsonc::parse(text).map_err(invalid)?;
        let raw: RawMetadata =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

        if raw.id.trim().is_empty() {
            return Err(invalid("\"id\" must not be empty".into()));
        }
        let version = raw
            .version
            .as_deref()
            .map(semver::Version::parse)
            .transpose()
            .map_err(|e| invalid(format!("\"version\" is not a semantic version: {e}")))?;
        for (name, spec) in &raw.options {
            spec.validate()
                .map_err(|e| invalid(format!("option \"{name}\": {e}")))?;
        }

        let mut depends_on = IndexMap::new();
        for (dependency, selector) in &raw.depends_on {
            let value = FeatureValue::from_value(selector)
                .map_err(|e| invalid(format!("dependsOn \"{dependency}\": {e}")))?;
            if !value.is_enabled() {
                return Err(invalid(format!(
                    "dependsOn \"{dependency}\" cannot disable its dependency"
                )));
            }
            let _ = depends_on.insert(dependency.clone(), value.selected_options());
        }

        for (i, mount) in raw.mounts.iter().enumerate() {
            let ok = mount.is_string()
                || mount.get("target").is_some_and(Value::is_string);
            if !ok {
                return Err(invalid(format!("mounts[{i}] needs a string or a \"target\"")));
            }
        }

        let mut hooks = BTreeMap::new();
        for (key, value) in &raw.rest {
            let Some(kind) = HookKind::from_field(key) else {
                continue;
            };
            if kind.runs_on_host() {
                return Err(invalid(format!("features cannot declare \"{key}\"")));
            }
            let command = LifecycleCommand::from_value(value, true)
                .map_err(|e| invalid(format!("\"{key}\": {e}")))?;
            let _ = hooks.insert(kind, command);
        }

        Ok(Self {
            id: raw.id,
            version,
            name: raw.name,
            options: raw.options,
            depends_on,
            installs_after: raw.installs_after,
            container_env: raw.container_env,
            mounts: raw.mounts,
            cap_add: raw.cap_add,
            security_opt: raw.security_opt,
            privileged: raw.privileged,
            init: raw.init,
            hooks,
        })
    }
}

/// A feature resolved to a specific package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureManifest {
    /// Canonical graph identity.
    pub id: FeatureId,
    /// Reference the feature was resolved from.
    pub reference: FeatureRef,
    /// Validated manifest contents.
    pub metadata: FeatureMetadata,
    /// Version actually selected.
    pub resolved_version: String,
    /// Digest of the package archive; `None` for local features.
    pub package_digest: Option<Sha256Digest>,
    /// Host directory holding the unpacked package.
    pub package_dir: PathBuf,
}

impl FeatureManifest {
    /// What installing this feature adds to the effective configuration.
    #[must_use]
    pub fn contribution(&self) -> FeatureContribution {
        FeatureContribution {
            origin: self.id.to_string(),
            container_env: self.metadata.container_env.clone(),
            mounts: self.metadata.mounts.clone(),
            cap_add: self.metadata.cap_add.clone(),
            security_opt: self.metadata.security_opt.clone(),
            privileged: self.metadata.privileged,
            init: self.metadata.init,
            hooks: self.metadata.hooks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"{
        // comments are fine
        "id": "node",
        "version": "1.4.0",
        "options": {
            "version": {"type": "string", "default": "lts", "proposals": ["lts"]},
            "pnpm": {"type": "boolean", "default": false}
        },
        "dependsOn": {"ghcr.io/acme/features/common:1": {"user": "dev"}},
        "installsAfter": ["ghcr.io/acme/features/git"],
        "containerEnv": {"NODE_HOME": "/usr/local/node"},
        "postCreateCommand": ["npm", "ci"],
        "customizations": {"vscode": {}}
    }"#;

    #[test]
    fn parses_full_manifest() {
        let meta = FeatureMetadata::parse("node", NODE.as_bytes()).expect("parse");
        assert_eq!(meta.id, "node");
        assert_eq!(meta.version, Some(semver::Version::new(1, 4, 0)));
        assert_eq!(meta.options.keys().collect::<Vec<_>>(), vec!["version", "pnpm"]);
        assert_eq!(
            meta.depends_on["ghcr.io/acme/features/common:1"]["user"],
            OptionValue::String("dev".into())
        );
        assert_eq!(meta.installs_after, vec!["ghcr.io/acme/features/git"]);
        assert_eq!(
            meta.hooks[&HookKind::PostCreate],
            LifecycleCommand::Exec(vec!["npm".into(), "ci".into()])
        );
    }

    #[test]
    fn id_is_required() {
        assert!(FeatureMetadata::parse("x", br#"{"version": "1.0.0"}"#).is_err());
        assert!(FeatureMetadata::parse("x", br#"{"id": " "}"#).is_err());
    }

    #[test]
    fn version_must_be_semver() {
        let err = FeatureMetadata::parse("x", br#"{"id": "x", "version": "one"}"#)
            .expect_err("version");
        assert!(err.to_string().contains("semantic version"), "got: {err}");
    }

    #[test]
    fn host_side_hook_is_rejected() {
        let err = FeatureMetadata::parse("x", br#"{"id": "x", "initializeCommand": "rm -rf /"}"#)
            .expect_err("host hook");
        assert!(err.to_string().contains("initializeCommand"), "got: {err}");
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        assert!(FeatureMetadata::parse("x", br#"{"id": "x", "installsAfter": "git"}"#).is_err());
        assert!(FeatureMetadata::parse("x", br#"{"id": "x", "containerEnv": {"A": 1}}"#).is_err());
        assert!(
            FeatureMetadata::parse("x", br#"{"id": "x", "options": {"o": {"type": "number"}}}"#)
                .is_err()
        );
        assert!(FeatureMetadata::parse("x", br#"{"id": "x", "dependsOn": {"y": false}}"#).is_err());
        assert!(FeatureMetadata::parse("x", br#"{"id": "x", "mounts": [{"source": "/a"}]}"#).is_err());
    }

    #[test]
    fn contribution_carries_env_and_hooks() {
        let metadata = FeatureMetadata::parse("node", NODE.as_bytes()).expect("parse");
        let manifest = FeatureManifest {
            id: FeatureId::new("ghcr.io/acme/features/node"),
            reference: FeatureRef::parse(
                "ghcr.io/acme/features/node:1",
                "ghcr.io/devcontainers/features",
                std::path::Path::new("/"),
            )
            .expect("ref"),
            metadata,
            resolved_version: "1.4.0".into(),
            package_digest: None,
            package_dir: PathBuf::from("/cache/node"),
        };
        let contribution = manifest.contribution();
        assert_eq!(contribution.origin, "ghcr.io/acme/features/node");
        assert_eq!(contribution.container_env["NODE_HOME"], "/usr/local/node");
        assert!(contribution.hooks.contains_key(&HookKind::PostCreate));
    }
}
