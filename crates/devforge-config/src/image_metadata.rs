//! Configuration metadata carried by an image label.
//!
//! Images built with features record the configuration they contribute in
//! the `devcontainer.metadata` label: a JSON array of partial
//! configurations, one per contributor, in the order they were applied.

use devforge_common::constants::IMAGE_METADATA_LABEL;
use devforge_common::error::ConfigurationError;
use serde_json::Value;

use crate::layer::{ConfigLayer, malformed};

/// Parses the metadata label into its raw JSON entries.
///
/// A single object is accepted as a one-entry array.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the label is not JSON or is neither an
/// array nor an object.
pub fn entries(label: &str) -> Result<Vec<Value>, ConfigurationError> {
    let value = devforge_common::jsonc::parse(label).map_err(|message| ConfigurationError::Parse {
        path: IMAGE_METADATA_LABEL.into(),
        message,
    })?;
    match value {
        Value::Array(items) => Ok(items),
        obj @ Value::Object(_) => Ok(vec![obj]),
        _ => Err(malformed(
            IMAGE_METADATA_LABEL,
            "",
            "expected an array of configuration objects",
        )),
    }
}

/// Source name of the metadata entry at `index`.
#[must_use]
pub fn entry_source(index: usize) -> String {
    format!("{IMAGE_METADATA_LABEL}[{index}]")
}

/// Parses the metadata label into one layer per entry, without substitution.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the label cannot be read or an entry
/// has a malformed field.
pub fn parse_label(label: &str) -> Result<Vec<ConfigLayer>, ConfigurationError> {
    entries(label)?
        .iter()
        .enumerate()
        .map(|(i, entry)| ConfigLayer::from_value(entry, entry_source(i)))
        .collect()
}

/// Label used as the hook origin for a metadata entry.
#[must_use]
pub fn entry_origin(layer: &ConfigLayer) -> String {
    layer
        .extra
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| layer.source.clone(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_label() {
        let layers = parse_label(
            r#"[{"id": "ghcr.io/acme/features/node:1", "containerEnv": {"NODE": "1"}},
                {"remoteUser": "dev"}]"#,
        )
        .expect("parse");
        assert_eq!(layers.len(), 2);
        assert_eq!(entry_origin(&layers[0]), "ghcr.io/acme/features/node:1");
        assert_eq!(entry_origin(&layers[1]), "devcontainer.metadata[1]");
        assert_eq!(layers[1].remote_user.as_deref(), Some("dev"));
    }

    #[test]
    fn single_object_is_accepted() {
        let layers = parse_label(r#"{"remoteUser": "root"}"#).expect("parse");
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn scalar_label_is_rejected() {
        assert!(parse_label("42").is_err());
        assert!(parse_label("not json").is_err());
    }

    #[test]
    fn malformed_entry_names_index() {
        let err = parse_label(r#"[{}, {"capAdd": "SYS_PTRACE"}]"#).expect_err("malformed");
        assert!(err.to_string().contains("devcontainer.metadata[1]#/capAdd"), "got: {err}");
    }
}
