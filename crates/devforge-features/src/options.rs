//! Feature options: declared specs, user selection, and install-time
//! environment variables.

use std::collections::BTreeMap;

use devforge_common::error::FeatureResolutionError;
use devforge_config::OptionValue;
use indexmap::IndexMap;
use serde::Deserialize;

/// An option declared by a feature manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionSpec {
    /// A `true`/`false` switch.
    Boolean {
        /// Value used when the user selects nothing.
        #[serde(default)]
        default: Option<bool>,
        /// Human-readable description.
        #[serde(default)]
        description: Option<String>,
    },
    /// A free-form or enumerated string.
    String {
        /// Value used when the user selects nothing.
        #[serde(default)]
        default: Option<String>,
        /// Allowed values; anything else is rejected.
        #[serde(default, rename = "enum")]
        allowed: Option<Vec<String>>,
        /// Suggested values; anything else is still accepted.
        #[serde(default)]
        proposals: Vec<String>,
        /// Human-readable description.
        #[serde(default)]
        description: Option<String>,
    },
}

impl OptionSpec {
    /// Default value, if declared.
    #[must_use]
    pub fn default_value(&self) -> Option<OptionValue> {
        match self {
            Self::Boolean { default, .. } => default.map(OptionValue::Bool),
            Self::String { default, .. } => default.clone().map(OptionValue::String),
        }
    }

    /// Checks the spec itself: a strict `enum` must contain the default.
    ///
    /// # Errors
    ///
    /// Returns a description of the inconsistency.
    pub fn validate(&self) -> Result<(), String> {
        if let Self::String {
            default: Some(default),
            allowed: Some(allowed),
            ..
        } = self
        {
            if !allowed.contains(default) {
                return Err(format!(
                    "default \"{default}\" is not one of the allowed values [{}]",
                    allowed.join(", ")
                ));
            }
        }
        Ok(())
    }

    /// Checks a user-selected value against this spec.
    fn accept(&self, value: &OptionValue) -> Result<OptionValue, String> {
        match (self, value) {
            (Self::Boolean { .. }, OptionValue::Bool(_)) => Ok(value.clone()),
            (Self::Boolean { .. }, OptionValue::String(s)) => match s.as_str() {
                "true" => Ok(OptionValue::Bool(true)),
                "false" => Ok(OptionValue::Bool(false)),
                _ => Err(format!("expected a boolean, got \"{s}\"")),
            },
            (Self::String { allowed, .. }, _) => {
                let text = value.to_string();
                match allowed {
                    Some(allowed) if !allowed.contains(&text) => Err(format!(
                        "\"{text}\" is not one of [{}]",
                        allowed.join(", ")
                    )),
                    _ => Ok(OptionValue::String(text)),
                }
            }
        }
    }
}

/// Validates `selected` against `specs` and fills in defaults.
///
/// Unknown option names are dropped with a warning. Options the user left
/// unset and the manifest gives no default for are omitted.
///
/// # Errors
///
/// Returns `FeatureResolutionError::InvalidOptions` naming the first value
/// of the wrong type or outside a strict `enum`.
pub fn resolve_options(
    feature: &str,
    specs: &IndexMap<String, OptionSpec>,
    selected: &BTreeMap<String, OptionValue>,
) -> Result<BTreeMap<String, OptionValue>, FeatureResolutionError> {
    let mut resolved = BTreeMap::new();
    for (name, value) in selected {
        let Some(spec) = specs.get(name) else {
            tracing::warn!(feature, option = %name, "ignoring unknown feature option");
            continue;
        };
        let accepted = spec
            .accept(value)
            .map_err(|e| FeatureResolutionError::InvalidOptions {
                feature: feature.to_string(),
                message: format!("option \"{name}\": {e}"),
            })?;
        let _ = resolved.insert(name.clone(), accepted);
    }
    for (name, spec) in specs {
        if resolved.contains_key(name) {
            continue;
        }
        if let Some(default) = spec.default_value() {
            let _ = resolved.insert(name.clone(), default);
        }
    }
    Ok(resolved)
}

/// Environment variable name for an option.
///
/// Non-word characters become `_`, a leading run of digits and
/// underscores collapses to one `_`, and the result is upper-cased.
#[must_use]
pub fn env_name(option: &str) -> String {
    let replaced: String = option
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let body = replaced.trim_start_matches(|c: char| c.is_ascii_digit() || c == '_');
    let prefix = if body.len() == replaced.len() { "" } else { "_" };
    format!("{prefix}{body}").to_ascii_uppercase()
}

/// Install-time environment for resolved options.
#[must_use]
pub fn option_env(options: &BTreeMap<String, OptionValue>) -> BTreeMap<String, String> {
    options
        .iter()
        .map(|(name, value)| (env_name(name), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn specs() -> IndexMap<String, OptionSpec> {
        serde_json::from_value(json!({
            "version": {"type": "string", "default": "lts", "proposals": ["lts", "20"]},
            "channel": {"type": "string", "enum": ["stable", "beta"], "default": "stable"},
            "installTools": {"type": "boolean", "default": true},
            "extra": {"type": "string"}
        }))
        .expect("specs")
    }

    #[test]
    fn defaults_fill_unset_options() {
        let resolved = resolve_options("f", &specs(), &BTreeMap::new()).expect("resolve");
        assert_eq!(resolved["version"], OptionValue::String("lts".into()));
        assert_eq!(resolved["installTools"], OptionValue::Bool(true));
        assert!(!resolved.contains_key("extra"));
    }

    #[test]
    fn proposals_are_advisory_enum_is_strict() {
        let ok = BTreeMap::from([("version".to_string(), OptionValue::String("18".into()))]);
        assert!(resolve_options("f", &specs(), &ok).is_ok());
        let bad = BTreeMap::from([("channel".to_string(), OptionValue::String("nightly".into()))]);
        let err = resolve_options("f", &specs(), &bad).expect_err("strict");
        assert!(err.to_string().contains("channel"), "got: {err}");
    }

    #[test]
    fn boolean_accepts_textual_booleans_only() {
        let text = BTreeMap::from([("installTools".to_string(), OptionValue::String("false".into()))]);
        let resolved = resolve_options("f", &specs(), &text).expect("resolve");
        assert_eq!(resolved["installTools"], OptionValue::Bool(false));
        let bad = BTreeMap::from([("installTools".to_string(), OptionValue::String("yes".into()))]);
        assert!(resolve_options("f", &specs(), &bad).is_err());
    }

    #[test]
    fn unknown_options_are_dropped() {
        let selected = BTreeMap::from([("nope".to_string(), OptionValue::Bool(true))]);
        let resolved = resolve_options("f", &specs(), &selected).expect("resolve");
        assert!(!resolved.contains_key("nope"));
    }

    #[test]
    fn spec_default_must_be_allowed() {
        let spec: OptionSpec =
            serde_json::from_value(json!({"type": "string", "enum": ["a"], "default": "b"}))
                .expect("spec");
        assert!(spec.validate().is_err());
        let mistyped = serde_json::from_value::<OptionSpec>(json!({"type": "boolean", "default": "x"}));
        assert!(mistyped.is_err());
    }

    #[test]
    fn env_names_are_sanitized() {
        assert_eq!(env_name("version"), "VERSION");
        assert_eq!(env_name("install-tools"), "INSTALL_TOOLS");
        assert_eq!(env_name("node.version"), "NODE_VERSION");
        assert_eq!(env_name("9lives"), "_LIVES");
        assert_eq!(env_name("__1x"), "_X");
    }

    #[test]
    fn option_env_renders_values() {
        let env = option_env(&BTreeMap::from([
            ("installTools".to_string(), OptionValue::Bool(true)),
            ("version".to_string(), OptionValue::String("20".into())),
        ]));
        assert_eq!(env["INSTALLTOOLS"], "true");
        assert_eq!(env["VERSION"], "20");
    }
}
