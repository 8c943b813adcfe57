// SPDX-License-Identifier: MIT

//! State schema definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Schema defining the workflow state structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StateSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: HashMap<String, StateFieldDef>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with no default
    pub fn field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(
            name.to_string(),
            StateFieldDef {
                field_type,
                reducer: ReducerType::Overwrite,
            },
        );
        self
    }

    /// Declare a field whose writes go through `reducer`
    pub fn reduced_field(
        mut self,
        name: &str,
        field_type: FieldType,
        reducer: ReducerType,
    ) -> Self {
        self.fields
            .insert(name.to_string(), StateFieldDef { field_type, reducer });
        self
    }

    pub fn reducer(&self, name: &str) -> ReducerType {
        self.get(name).map(|d| d.reducer).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&StateFieldDef> {
        self.fields.get(name)
    }
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateFieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
}

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Whether `value` is acceptable for this type. Null means "unset" and
    /// is accepted everywhere.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// JSON type name of a value, for error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Deep merge objects
    Merge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_schema_deserialize() {
        let yaml = r#"
            item:
              type: string
            peak_temp_c:
              type: number
              reducer: max
            attempt_log:
              type: array
              reducer: append
            attempts:
              type: number
        "#;
        let schema: StateSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.fields.len(), 4);
        assert_eq!(schema.fields["item"].field_type, FieldType::String);
        assert_eq!(schema.fields["peak_temp_c"].reducer, ReducerType::Max);
        assert_eq!(schema.fields["attempt_log"].reducer, ReducerType::Append);
        assert_eq!(schema.fields["attempts"].reducer, ReducerType::Overwrite);
    }

    #[test]
    fn test_builder_defaults_to_overwrite() {
        let schema = StateSchema::new()
            .field("status", FieldType::String)
            .reduced_field("heartbeats", FieldType::Array, ReducerType::Append);

        assert_eq!(schema.get("status").unwrap().reducer, ReducerType::Overwrite);
        assert_eq!(schema.get("heartbeats").unwrap().reducer, ReducerType::Append);
        assert!(schema.get("missing").is_none());
    }

    #[test]
    fn test_field_type_matches() {
        assert!(FieldType::String.matches(&json!("calm")));
        assert!(FieldType::Number.matches(&json!(42)));
        assert!(FieldType::Number.matches(&json!(1.5)));
        assert!(FieldType::Boolean.matches(&json!(true)));
        assert!(FieldType::Array.matches(&json!([1, 2])));
        assert!(FieldType::Object.matches(&json!({"a": 1})));

        assert!(!FieldType::Number.matches(&json!("42")));
        assert!(!FieldType::String.matches(&json!(7)));
        assert!(!FieldType::Object.matches(&json!([])));
    }

    #[test]
    fn test_null_matches_every_type() {
        for ty in [
            FieldType::String,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Array,
            FieldType::Object,
        ] {
            assert!(ty.matches(&Value::Null));
        }
    }
}
