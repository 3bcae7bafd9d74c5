// SPDX-License-Identifier: MIT

//! Output schema shared by extraction and validation
//!
//! A schema is an ordered list of typed fields with optional numeric bounds,
//! length bounds and defaults. It deserializes from a YAML/JSON list so that
//! pipeline files keep field order stable.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::state::value_kind;

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    #[serde(alias = "number")]
    Float,
    String,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// True if the value has this type without any conversion
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    fn json_schema_type(&self) -> &'static str {
        match self {
            FieldType::Float => "number",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a single output field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            default: None,
            description: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Inclusive numeric bounds
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Inclusive length bounds for strings and arrays
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check one value against this field. `None` and `null` count as absent.
    pub fn check(&self, value: Option<&Value>) -> Option<Violation> {
        let value = match value {
            None | Some(Value::Null) => {
                return self.required.then(|| Violation::Missing {
                    field: self.name.clone(),
                });
            }
            Some(v) => v,
        };

        if !self.field_type.matches(value) {
            return Some(Violation::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type,
                found: value_kind(value),
            });
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Some(Violation::BelowMinimum {
                        field: self.name.clone(),
                        min,
                        value: n,
                    });
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Some(Violation::AboveMaximum {
                        field: self.name.clone(),
                        max,
                        value: n,
                    });
                }
            }
        }

        let len = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        };
        if let Some(len) = len {
            if let Some(min_length) = self.min_length {
                if len < min_length {
                    return Some(Violation::TooShort {
                        field: self.name.clone(),
                        min_length,
                        len,
                    });
                }
            }
            if let Some(max_length) = self.max_length {
                if len > max_length {
                    return Some(Violation::TooLong {
                        field: self.name.clone(),
                        max_length,
                        len,
                    });
                }
            }
        }

        None
    }

    /// One-line human description used in prompts
    pub fn summary(&self) -> String {
        let mut out = format!("{} ({}", self.name, self.field_type);
        match (self.min, self.max) {
            (Some(min), Some(max)) => out.push_str(&format!(", {} to {}", min, max)),
            (Some(min), None) => out.push_str(&format!(", >= {}", min)),
            (None, Some(max)) => out.push_str(&format!(", <= {}", max)),
            (None, None) => {}
        }
        if !self.required {
            out.push_str(", optional");
        }
        out.push(')');
        if let Some(description) = &self.description {
            out.push_str(": ");
            out.push_str(description);
        }
        out
    }
}

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("field '{field}' is missing")]
    Missing { field: String },

    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("field '{field}' value {value} is below minimum {min}")]
    BelowMinimum { field: String, min: f64, value: f64 },

    #[error("field '{field}' value {value} is above maximum {max}")]
    AboveMaximum { field: String, max: f64, value: f64 },

    #[error("field '{field}' length {len} is shorter than {min_length}")]
    TooShort {
        field: String,
        min_length: usize,
        len: usize,
    },

    #[error("field '{field}' length {len} is longer than {max_length}")]
    TooLong {
        field: String,
        max_length: usize,
        len: usize,
    },
}

impl Violation {
    pub fn field(&self) -> &str {
        match self {
            Violation::Missing { field }
            | Violation::TypeMismatch { field, .. }
            | Violation::BelowMinimum { field, .. }
            | Violation::AboveMaximum { field, .. }
            | Violation::TooShort { field, .. }
            | Violation::TooLong { field, .. } => field,
        }
    }
}

/// Ordered set of output fields
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct OutputSchema {
    fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All violations in field order; empty means the record is valid
    pub fn validate(&self, record: &Map<String, Value>) -> Vec<Violation> {
        self.fields
            .iter()
            .filter_map(|f| f.check(record.get(&f.name)))
            .collect()
    }

    /// True if the record declares at least one schema field, or the schema
    /// has no fields at all
    pub fn recognises(&self, record: &Map<String, Value>) -> bool {
        self.is_empty() || self.field_names().any(|name| record.contains_key(name))
    }

    /// JSON Schema rendering for providers with structured output
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(field.field_type.json_schema_type()));
            if let Some(min) = field.min {
                prop.insert("minimum".into(), json!(min));
            }
            if let Some(max) = field.max {
                prop.insert("maximum".into(), json!(max));
            }
            if let Some(description) = &field.description {
                prop.insert("description".into(), json!(description));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
            if field.required {
                required.push(json!(field.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Bullet list of fields for prompt text
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("- {}", f.summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
