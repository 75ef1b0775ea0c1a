//! Loading, pre-container substitution, and merging in one call.

use std::path::Path;

use devforge_common::error::ConfigurationError;
use serde_json::{Map, Value};

use crate::effective::EffectiveConfig;
use crate::extends::{ConfigSource, ExtendsLoader};
use crate::id::workspace_devcontainer_id;
use crate::image_metadata::{entries, entry_source};
use crate::layer::{ConfigLayer, is_container_phase_field};
use crate::merge::{Overrides, merge};
use crate::substitution::{SubstitutionContext, resolve_str, resolve_value};

/// Root of in-container workspaces when the configuration names none.
const DEFAULT_CONTAINER_WORKSPACE_ROOT: &str = "/workspaces";

/// Everything besides the configuration file that feeds the merge.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs {
    /// Tool defaults, applied first.
    pub defaults: Option<Value>,
    /// Caller overrides.
    pub overrides: Overrides,
    /// Raw `devcontainer.metadata` label of the base image, if known.
    pub image_metadata: Option<String>,
}

/// Resolves the configuration at `path` into its effective form.
///
/// Every layer gets the pre-container substitution pass, except the fields
/// that can only be resolved once the container exists. If `ctx` carries no
/// in-container workspace folder, one is derived from the last
/// `workspaceFolder` in merge order or from the host folder's name. If it
/// carries no devcontainer id, one is derived from the host folder and `path`.
///
/// # Errors
///
/// Returns a `ConfigurationError` if any file in the `extends` chain cannot
/// be read or parsed, the chain has a cycle, or a field is malformed.
pub fn resolve_configuration<S: ConfigSource>(
    source: S,
    path: &Path,
    inputs: &ResolveInputs,
    ctx: &SubstitutionContext,
) -> Result<EffectiveConfig, ConfigurationError> {
    let loaded = ExtendsLoader::new(source).load(path)?;
    let declared_folder = inputs
        .defaults
        .iter()
        .chain(loaded.bases.iter().map(|base| &base.value))
        .chain(std::iter::once(&loaded.raw.value))
        .filter_map(|layer| layer.get("workspaceFolder").and_then(Value::as_str))
        .chain(
            inputs
                .overrides
                .layer
                .as_ref()
                .and_then(|layer| layer.workspace_folder.as_deref()),
        )
        .last();
    let ctx = with_devcontainer_id(&with_container_workspace(ctx, declared_folder), path);

    let defaults = inputs
        .defaults
        .as_ref()
        .map(|value| ConfigLayer::from_value(&substitute_layer(value, &ctx), "defaults"))
        .transpose()?;
    let bases = loaded
        .bases
        .iter()
        .map(|base| {
            ConfigLayer::from_value(
                &substitute_layer(&base.value, &ctx),
                base.path.display().to_string(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    let raw = ConfigLayer::from_value(
        &substitute_layer(&loaded.raw.value, &ctx),
        loaded.raw.path.display().to_string(),
    )?;
    let metadata = match &inputs.image_metadata {
        Some(label) => entries(label)?
            .iter()
            .enumerate()
            .map(|(i, entry)| ConfigLayer::from_value(&substitute_layer(entry, &ctx), entry_source(i)))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    tracing::info!(
        path = %path.display(),
        bases = bases.len(),
        metadata_entries = metadata.len(),
        "resolved configuration layers"
    );
    let mut config = merge(defaults.as_ref(), &bases, &raw, &inputs.overrides, &metadata);
    config.devcontainer_id.clone_from(&ctx.devcontainer_id);
    Ok(config)
}

/// Runs the pre-container pass over every field that does not wait for the container.
fn substitute_layer(value: &Value, ctx: &SubstitutionContext) -> Value {
    let Value::Object(map) = value else {
        return resolve_value(value, ctx);
    };
    let substituted: Map<String, Value> = map
        .iter()
        .map(|(key, v)| {
            let v = if is_container_phase_field(key) {
                v.clone()
            } else {
                resolve_value(v, ctx)
            };
            (key.clone(), v)
        })
        .collect();
    Value::Object(substituted)
}

fn with_container_workspace(ctx: &SubstitutionContext, declared: Option<&str>) -> SubstitutionContext {
    if ctx.container_workspace_folder.is_some() {
        return ctx.clone();
    }
    let folder = declared
        .filter(|f| !f.contains("${containerWorkspaceFolder"))
        .map(|f| resolve_str(f, ctx))
        .or_else(|| {
            let local = ctx.local_workspace_folder.as_deref()?;
            let name = Path::new(local).file_name()?.to_string_lossy().into_owned();
            Some(format!("{DEFAULT_CONTAINER_WORKSPACE_ROOT}/{name}"))
        });
    match folder {
        Some(folder) => ctx.clone().with_container_workspace_folder(folder),
        None => ctx.clone(),
    }
}

fn with_devcontainer_id(ctx: &SubstitutionContext, config_path: &Path) -> SubstitutionContext {
    match (&ctx.devcontainer_id, &ctx.local_workspace_folder) {
        (None, Some(local)) => ctx
            .clone()
            .with_devcontainer_id(workspace_devcontainer_id(local, config_path)),
        _ => ctx.clone(),
    }
}
