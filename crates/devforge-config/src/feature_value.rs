//! Values of the `features` map.
//!
//! Each entry is `true`/`false`, a version string, or a mapping of option
//! names to boolean or string values. Anything else is rejected when the
//! configuration is loaded.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A user-selected option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean option.
    Bool(bool),
    /// String option.
    String(String),
}

impl OptionValue {
    /// Parses an option value.
    ///
    /// # Errors
    ///
    /// Returns a description if the value is neither boolean nor string.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::String(s) => Ok(Self::String(s.clone())),
            other => Err(format!("option values must be boolean or string, got {other}")),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// How a feature is requested in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// `true` enables with defaults, `false` disables.
    Enabled(bool),
    /// Shorthand for `{"version": "..."}`.
    Version(String),
    /// Explicit option selection.
    Options(BTreeMap<String, OptionValue>),
}

impl FeatureValue {
    /// Parses a `features` map entry.
    ///
    /// # Errors
    ///
    /// Returns a description of the shape mismatch.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(Self::Enabled(*b)),
            Value::String(s) => Ok(Self::Version(s.clone())),
            Value::Object(map) => {
                let mut options = BTreeMap::new();
                for (name, v) in map {
                    let parsed =
                        OptionValue::from_value(v).map_err(|e| format!("option \"{name}\": {e}"))?;
                    let _ = options.insert(name.clone(), parsed);
                }
                Ok(Self::Options(options))
            }
            other => Err(format!(
                "feature values must be boolean, string, or an options object, got {other}"
            )),
        }
    }

    /// Whether the feature should be installed.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Enabled(false))
    }

    /// Returns the options the user selected.
    #[must_use]
    pub fn selected_options(&self) -> BTreeMap<String, OptionValue> {
        match self {
            Self::Enabled(_) => BTreeMap::new(),
            Self::Version(v) => BTreeMap::from([("version".to_string(), OptionValue::String(v.clone()))]),
            Self::Options(options) => options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_the_three_shapes() {
        assert_eq!(FeatureValue::from_value(&json!(true)), Ok(FeatureValue::Enabled(true)));
        assert_eq!(
            FeatureValue::from_value(&json!("lts")),
            Ok(FeatureValue::Version("lts".into()))
        );
        let opts = FeatureValue::from_value(&json!({"version": "18", "pnpm": true})).expect("opts");
        assert_eq!(
            opts.selected_options().get("pnpm"),
            Some(&OptionValue::Bool(true))
        );
    }

    #[test]
    fn rejects_other_shapes_early() {
        assert!(FeatureValue::from_value(&json!(1)).is_err());
        assert!(FeatureValue::from_value(&json!(null)).is_err());
        assert!(FeatureValue::from_value(&json!(["a"])).is_err());
        assert!(FeatureValue::from_value(&json!({"n": 3})).is_err());
        assert!(FeatureValue::from_value(&json!({"nested": {"a": "b"}})).is_err());
    }

    #[test]
    fn version_string_becomes_version_option() {
        let options = FeatureValue::Version("20".into()).selected_options();
        assert_eq!(options.get("version"), Some(&OptionValue::String("20".into())));
    }

    #[test]
    fn false_disables() {
        assert!(!FeatureValue::Enabled(false).is_enabled());
        assert!(FeatureValue::Enabled(true).is_enabled());
        assert!(FeatureValue::Options(BTreeMap::new()).is_enabled());
    }
}
