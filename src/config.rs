//! Flattener configuration
//!
//! A configuration bundles the path table, the payload to flatten and the
//! strict-mode switch. Options this crate does not recognize are kept in
//! `extra` rather than rejected.

use crate::error::FlattenError;
use crate::flattener::{flatten, FlatRecord, PathMappedFlattener};
use crate::path::PathTable;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Options for one flattening run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenerConfig {
    /// Flat key to nested path table; the sign-in telemetry table by default
    #[serde(default)]
    pub field_mapping: PathTable,
    /// Payload to flatten
    #[serde(default = "empty_object")]
    pub input_data: Value,
    /// Validate `input_data` against the declared schema before flattening
    #[serde(default)]
    pub is_validate: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for FlattenerConfig {
    fn default() -> Self {
        Self {
            field_mapping: PathTable::default_mapping(),
            input_data: empty_object(),
            is_validate: false,
            extra: Map::new(),
        }
    }
}

impl FlattenerConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, FlattenError> {
        let config: Self = serde_json::from_str(json)?;
        debug!(
            fields = config.field_mapping.len(),
            strict = config.is_validate,
            unknown_options = config.extra.len(),
            "loaded flattener config"
        );
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlattenError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading flattener config");
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Flattener bound to this configuration's table
    pub fn flattener(&self) -> PathMappedFlattener {
        PathMappedFlattener::new(self.field_mapping.clone())
    }

    /// Flatten `input_data` with the configured table and mode
    pub fn flatten(&self) -> Result<FlatRecord, FlattenError> {
        flatten(&self.input_data, &self.field_mapping, self.is_validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flattener::FlatValue;
    use serde_json::json;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = FlattenerConfig::from_json("{}").unwrap();
        assert_eq!(config, FlattenerConfig::default());
        assert_eq!(config.field_mapping.len(), 12);
        assert!(!config.is_validate);
    }

    #[test]
    fn test_custom_mapping_overrides_default() {
        let config = FlattenerConfig::from_json(
            r#"{
                "field_mapping": { "clicks": ["metrics", "mouse", "clicks"] },
                "input_data": { "metrics": { "mouse": { "clicks": [{ "button": 1 }] } } }
            }"#,
        )
        .unwrap();

        let flat = config.flatten().unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(
            flat.get("clicks"),
            Some(&FlatValue::Present(json!([{ "button": 1 }])))
        );
    }

    #[test]
    fn test_strict_flag_is_honored() {
        let config = FlattenerConfig::from_json(
            r#"{ "is_validate": true, "input_data": { "user_id": 17 } }"#,
        )
        .unwrap();

        assert!(matches!(
            config.flatten(),
            Err(FlattenError::SchemaValidation { ref field, .. }) if field == "user_id"
        ));
    }

    #[test]
    fn test_unknown_options_preserved() {
        let config = FlattenerConfig::from_json(r#"{ "drop_empty": true }"#).unwrap();
        assert_eq!(config.extra.get("drop_empty"), Some(&json!(true)));

        let dumped = serde_json::to_value(&config).unwrap();
        assert_eq!(dumped["drop_empty"], true);
    }

    #[test]
    fn test_invalid_mapping_rejected() {
        let result = FlattenerConfig::from_json(r#"{ "field_mapping": {} }"#);
        assert!(matches!(result, Err(FlattenError::Json(_))));

        let result = FlattenerConfig::from_json(r#"{ "field_mapping": { "a": ["x", ""] } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = FlattenerConfig::load("/nonexistent/hb-flatten/config.json");
        assert!(matches!(result, Err(FlattenError::Io(_))));
    }
}
