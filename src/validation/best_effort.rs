// SPDX-License-Identifier: MIT

//! Best-effort validation: mechanical repairs, then one re-validation
//!
//! Per violating field:
//! - numbers outside `[min, max]` are clamped to the nearest bound
//! - missing fields take their declared default
//! - wrong-typed values are coerced when the conversion is lossless,
//!   otherwise replaced by the default (or dropped if optional)
//! - over-long strings and arrays are truncated
//!
//! Every repair is recorded as a warning.

use async_trait::async_trait;
use serde_json::{Number, Value};

use super::ValidationStrategy;
use crate::error::IevError;
use crate::node::NodeContext;
use crate::repair::Record;
use crate::schema::{FieldSpec, FieldType, OutputSchema, Violation};

#[derive(Debug, Default, Clone, Copy)]
pub struct BestEffort;

impl BestEffort {
    fn repair_field(field: &FieldSpec, violation: &Violation, record: &mut Record, cx: &mut NodeContext) {
        let name = field.name.as_str();
        match violation {
            Violation::BelowMinimum { min, value, .. } => {
                let clamped = bound_value(field.field_type, *min, true);
                cx.warn(format!("clamped '{}' from {} to minimum {}", name, value, clamped));
                record.insert(name.to_string(), clamped);
            }
            Violation::AboveMaximum { max, value, .. } => {
                let clamped = bound_value(field.field_type, *max, false);
                cx.warn(format!("clamped '{}' from {} to maximum {}", name, value, clamped));
                record.insert(name.to_string(), clamped);
            }
            Violation::Missing { .. } => {
                if let Some(default) = &field.default {
                    cx.warn(format!("filled missing '{}' with default {}", name, default));
                    record.insert(name.to_string(), default.clone());
                }
            }
            Violation::TypeMismatch { expected, found, .. } => {
                let current = record.get(name).cloned().unwrap_or(Value::Null);
                if let Some(coerced) = coerce(*expected, &current) {
                    cx.warn(format!("coerced '{}' from {} {} to {}", name, found, current, coerced));
                    record.insert(name.to_string(), coerced);
                } else if let Some(default) = &field.default {
                    cx.warn(format!(
                        "replaced '{}' ({} {}) with default {}",
                        name, found, current, default
                    ));
                    record.insert(name.to_string(), default.clone());
                } else if !field.required {
                    cx.warn(format!("dropped '{}': cannot convert {} to {}", name, found, expected));
                    record.remove(name);
                }
            }
            Violation::TooLong { max_length, len, .. } => {
                let truncated = match record.get(name) {
                    Some(Value::String(s)) => Some(Value::String(s.chars().take(*max_length).collect())),
                    Some(Value::Array(items)) => {
                        Some(Value::Array(items.iter().take(*max_length).cloned().collect()))
                    }
                    _ => None,
                };
                if let Some(truncated) = truncated {
                    cx.warn(format!("truncated '{}' from length {} to {}", name, len, max_length));
                    record.insert(name.to_string(), truncated);
                }
            }
            Violation::TooShort { .. } => {}
        }
    }
}

#[async_trait]
impl ValidationStrategy for BestEffort {
    fn name(&self) -> &str {
        "best-effort"
    }

    async fn validate(
        &self,
        mut record: Record,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, IevError> {
        // A coerced value can still be out of range, so fix type first, then bounds
        for _pass in 0..2 {
            let mut repaired = false;
            for field in schema.fields() {
                if let Some(violation) = field.check(record.get(&field.name)) {
                    Self::repair_field(field, &violation, &mut record, cx);
                    repaired = true;
                }
            }
            if !repaired {
                break;
            }
        }

        // Absent optional fields are not violations, so they never reach repair_field
        for field in schema.fields().iter().filter(|f| !f.required) {
            if let (Some(default), None) = (&field.default, record.get(&field.name)) {
                cx.warn(format!("filled missing '{}' with default {}", field.name, default));
                record.insert(field.name.clone(), default.clone());
            }
        }

        let violations = schema.validate(&record);
        if violations.is_empty() {
            Ok(record)
        } else {
            Err(IevError::validation(cx.node_name(), violations))
        }
    }
}

/// A bound as a value of the field's type
fn bound_value(field_type: FieldType, bound: f64, is_min: bool) -> Value {
    if field_type == FieldType::Integer {
        let whole = if is_min { bound.ceil() } else { bound.floor() };
        return Value::from(whole as i64);
    }
    Number::from_f64(bound)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Lossless conversion of a value to the target type, if one exists
pub fn coerce(target: FieldType, value: &Value) -> Option<Value> {
    match (target, value) {
        (FieldType::Integer, Value::Number(n)) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| Value::from(f as i64))
        }
        (FieldType::Integer, Value::String(s)) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            let f = s.parse::<f64>().ok()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| Value::from(f as i64))
        }
        (FieldType::Float, Value::String(s)) => {
            let f = s.trim().parse::<f64>().ok()?;
            Number::from_f64(f).map(Value::Number)
        }
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::Array | FieldType::Object, Value::String(s)) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(|v| target.matches(v)),
        _ => None,
    }
}
