//! `${...}` variable substitution.
//!
//! Substitution is textual and single-pass: the replacement text of a
//! variable is never scanned again. Variables whose source is not available
//! in the current phase resolve to the empty string. Unknown variable names
//! are left exactly as written.

use std::collections::BTreeMap;
use std::path::Path;

use devforge_common::types::Phase;
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_until},
    sequence::delimited,
};
use serde_json::Value;

/// Values available to one substitution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionContext {
    /// Which pass is running.
    pub phase: Phase,
    /// Workspace folder on the host.
    pub local_workspace_folder: Option<String>,
    /// Workspace folder inside the container.
    pub container_workspace_folder: Option<String>,
    /// Host environment.
    pub local_env: BTreeMap<String, String>,
    /// Container environment, only consulted after the container exists.
    pub container_env: BTreeMap<String, String>,
    /// Stable id derived from the container's identifying labels.
    pub devcontainer_id: Option<String>,
}

impl SubstitutionContext {
    /// Creates a pre-container context.
    #[must_use]
    pub fn pre_container(
        local_workspace_folder: impl Into<String>,
        local_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            phase: Phase::PreContainer,
            local_workspace_folder: Some(local_workspace_folder.into()),
            container_workspace_folder: None,
            local_env,
            container_env: BTreeMap::new(),
            devcontainer_id: None,
        }
    }

    /// Sets the in-container workspace folder.
    #[must_use]
    pub fn with_container_workspace_folder(mut self, folder: impl Into<String>) -> Self {
        self.container_workspace_folder = Some(folder.into());
        self
    }

    /// Sets the devcontainer id.
    #[must_use]
    pub fn with_devcontainer_id(mut self, id: impl Into<String>) -> Self {
        self.devcontainer_id = Some(id.into());
        self
    }

    /// Derives the post-container context once the container's environment is known.
    #[must_use]
    pub fn into_post_container(self, container_env: BTreeMap<String, String>) -> Self {
        Self {
            phase: Phase::PostContainer,
            container_env,
            ..self
        }
    }

    fn lookup(&self, name: &str, argument: Option<&str>, default: Option<&str>) -> Option<String> {
        let env_value = |env: &BTreeMap<String, String>| {
            argument
                .and_then(|key| env.get(key).cloned())
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default()
        };
        match (name, argument) {
            ("localWorkspaceFolder", None) => Some(self.local_workspace_folder.clone().unwrap_or_default()),
            ("localWorkspaceFolderBasename", None) => {
                Some(basename(self.local_workspace_folder.as_deref()))
            }
            ("containerWorkspaceFolder", None) => {
                Some(self.container_workspace_folder.clone().unwrap_or_default())
            }
            ("containerWorkspaceFolderBasename", None) => {
                Some(basename(self.container_workspace_folder.as_deref()))
            }
            ("devcontainerId", None) => Some(self.devcontainer_id.clone().unwrap_or_default()),
            ("localEnv" | "env", Some(_)) => Some(env_value(&self.local_env)),
            ("containerEnv", Some(_)) => Some(match self.phase {
                Phase::PreContainer => String::new(),
                Phase::PostContainer => env_value(&self.container_env),
            }),
            _ => None,
        }
    }
}

fn basename(path: Option<&str>) -> String {
    path.and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parses the body of one `${...}` reference.
fn variable(input: &str) -> IResult<&str, &str> {
    delimited(tag("${"), take_until("}"), tag("}")).parse(input)
}

/// Substitutes every variable in `input`.
#[must_use]
pub fn resolve_str(input: &str, ctx: &SubstitutionContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let Ok((remaining, body)) = variable(candidate) else {
            out.push_str(candidate);
            return out;
        };
        let mut parts = body.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let argument = parts.next();
        let default = parts.next();
        match ctx.lookup(name, argument, default) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&candidate[..candidate.len() - remaining.len()]),
        }
        rest = remaining;
    }
    out.push_str(rest);
    out
}

/// Substitutes every string value in a JSON tree, leaving keys untouched.
#[must_use]
pub fn resolve_value(value: &Value, ctx: &SubstitutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}
