//! Typed view of one configuration source.
//!
//! A layer is built from an already-substituted JSON object. Every known
//! field is checked for shape here so the merger can stay infallible.
//! Errors name the offending value as `source#/json/pointer`.

use std::collections::BTreeMap;

use devforge_common::error::ConfigurationError;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::feature_value::FeatureValue;
use crate::lifecycle::{HookKind, LifecycleCommand};

/// Field naming base configurations; consumed by the extends loader.
pub const EXTENDS_FIELD: &str = "extends";

/// Fields whose values are substituted only after the container exists.
#[must_use]
pub fn is_container_phase_field(name: &str) -> bool {
    name == "remoteEnv" || HookKind::from_field(name).is_some()
}

/// One partial configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    /// Where this layer came from, for diagnostics.
    pub source: String,
    /// Display name.
    pub name: Option<String>,
    /// Image reference.
    pub image: Option<String>,
    /// Workspace folder inside the container.
    pub workspace_folder: Option<String>,
    /// Mount specification of the workspace.
    pub workspace_mount: Option<String>,
    /// User that lifecycle commands and tools run as.
    pub remote_user: Option<String>,
    /// User the container runs as.
    pub container_user: Option<String>,
    /// Whether the image command is replaced by a sleep loop.
    pub override_command: Option<bool>,
    /// Whether the container runs privileged.
    pub privileged: Option<bool>,
    /// Whether an init process is used.
    pub init: Option<bool>,
    /// What happens to the container when the tool disconnects.
    pub shutdown_action: Option<String>,
    /// Extra runtime arguments.
    pub run_args: Vec<String>,
    /// Added Linux capabilities.
    pub cap_add: Vec<String>,
    /// Security options.
    pub security_opt: Vec<String>,
    /// Mounts, as strings or mount objects.
    pub mounts: Vec<Value>,
    /// Forwarded ports, as numbers or `host:port` strings.
    pub forward_ports: Vec<Value>,
    /// Environment of the container itself.
    pub container_env: BTreeMap<String, String>,
    /// Environment of tools and lifecycle commands.
    pub remote_env: BTreeMap<String, String>,
    /// Requested features, in declaration order.
    pub features: IndexMap<String, FeatureValue>,
    /// Explicit feature install order.
    pub override_feature_install_order: Option<Vec<String>>,
    /// Lifecycle hook commands.
    pub hooks: BTreeMap<HookKind, LifecycleCommand>,
    /// Fields this crate does not interpret.
    pub extra: Map<String, Value>,
}

impl ConfigLayer {
    /// Builds a layer from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Malformed` naming the first field with
    /// the wrong shape.
    pub fn from_value(value: &Value, source: impl Into<String>) -> Result<Self, ConfigurationError> {
        let source = source.into();
        let Value::Object(map) = value else {
            return Err(malformed(&source, "", "a configuration must be a JSON object"));
        };
        let mut layer = Self {
            source,
            ..Self::default()
        };
        for (key, v) in map {
            layer.read_field(key, v)?;
        }
        Ok(layer)
    }

    fn read_field(&mut self, key: &str, v: &Value) -> Result<(), ConfigurationError> {
        let src = self.source.clone();
        match key {
            EXTENDS_FIELD => {}
            "name" => self.name = Some(string(&src, key, v)?),
            "image" => self.image = Some(string(&src, key, v)?),
            "workspaceFolder" => self.workspace_folder = Some(string(&src, key, v)?),
            "workspaceMount" => self.workspace_mount = Some(string(&src, key, v)?),
            "remoteUser" => self.remote_user = Some(string(&src, key, v)?),
            "containerUser" => self.container_user = Some(string(&src, key, v)?),
            "shutdownAction" => self.shutdown_action = Some(string(&src, key, v)?),
            "overrideCommand" => self.override_command = Some(boolean(&src, key, v)?),
            "privileged" => self.privileged = Some(boolean(&src, key, v)?),
            "init" => self.init = Some(boolean(&src, key, v)?),
            "runArgs" => self.run_args = string_list(&src, key, v)?,
            "capAdd" => self.cap_add = string_list(&src, key, v)?,
            "securityOpt" => self.security_opt = string_list(&src, key, v)?,
            "mounts" => self.mounts = mounts(&src, v)?,
            "forwardPorts" => self.forward_ports = forward_ports(&src, v)?,
            "containerEnv" => self.container_env = string_map(&src, key, v)?,
            "remoteEnv" => self.remote_env = string_map(&src, key, v)?,
            "features" => self.features = features(&src, v)?,
            "overrideFeatureInstallOrder" => {
                self.override_feature_install_order = Some(string_list(&src, key, v)?);
            }
            _ => {
                if let Some(kind) = HookKind::from_field(key) {
                    let command = LifecycleCommand::from_value(v, true)
                        .map_err(|e| malformed(&src, key, &e))?;
                    let _ = self.hooks.insert(kind, command);
                } else {
                    let _ = self.extra.insert(key.to_string(), v.clone());
                }
            }
        }
        Ok(())
    }
}

/// Builds a `Malformed` error for `source#/pointer`.
pub(crate) fn malformed(source: &str, pointer: &str, message: &str) -> ConfigurationError {
    ConfigurationError::Malformed {
        location: format!("{source}#/{pointer}"),
        message: message.to_string(),
    }
}

fn string(src: &str, key: &str, v: &Value) -> Result<String, ConfigurationError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(src, key, "expected a string"))
}

fn boolean(src: &str, key: &str, v: &Value) -> Result<bool, ConfigurationError> {
    v.as_bool()
        .ok_or_else(|| malformed(src, key, "expected a boolean"))
}

fn string_list(src: &str, key: &str, v: &Value) -> Result<Vec<String>, ConfigurationError> {
    let items = v
        .as_array()
        .ok_or_else(|| malformed(src, key, "expected an array of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(src, &format!("{key}/{i}"), "expected a string"))
        })
        .collect()
}

fn string_map(
    src: &str,
    key: &str,
    v: &Value,
) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let map = v
        .as_object()
        .ok_or_else(|| malformed(src, key, "expected an object of strings"))?;
    map.iter()
        .map(|(name, value)| {
            value
                .as_str()
                .map(|s| (name.clone(), s.to_string()))
                .ok_or_else(|| malformed(src, &format!("{key}/{name}"), "expected a string"))
        })
        .collect()
}

fn mounts(src: &str, v: &Value) -> Result<Vec<Value>, ConfigurationError> {
    let items = v
        .as_array()
        .ok_or_else(|| malformed(src, "mounts", "expected an array"))?;
    for (i, item) in items.iter().enumerate() {
        let ok = match item {
            Value::String(_) => true,
            Value::Object(m) => m.get("target").is_some_and(Value::is_string),
            _ => false,
        };
        if !ok {
            return Err(malformed(
                src,
                &format!("mounts/{i}"),
                "expected a mount string or an object with a string \"target\"",
            ));
        }
    }
    Ok(items.clone())
}

fn forward_ports(src: &str, v: &Value) -> Result<Vec<Value>, ConfigurationError> {
    let items = v
        .as_array()
        .ok_or_else(|| malformed(src, "forwardPorts", "expected an array"))?;
    for (i, item) in items.iter().enumerate() {
        let ok = item.as_u64().is_some_and(|p| p <= u64::from(u16::MAX)) || item.is_string();
        if !ok {
            return Err(malformed(
                src,
                &format!("forwardPorts/{i}"),
                "expected a port number or a \"host:port\" string",
            ));
        }
    }
    Ok(items.clone())
}

fn features(src: &str, v: &Value) -> Result<IndexMap<String, FeatureValue>, ConfigurationError> {
    let map = v
        .as_object()
        .ok_or_else(|| malformed(src, "features", "expected an object"))?;
    let mut out = IndexMap::new();
    for (id, value) in map {
        let parsed =
            FeatureValue::from_value(value).map_err(|e| malformed(src, &format!("features/{id}"), &e))?;
        let _ = out.insert(id.clone(), parsed);
    }
    Ok(out)
}
