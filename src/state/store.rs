// SPDX-License-Identifier: MIT

//! Runtime state storage for workflow execution

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Violations of the append-only state law
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    /// Key already holds a different value
    #[error("State key '{key}' is already written and cannot be overwritten")]
    Conflict { key: String },

    /// Key already holds a value of another JSON kind
    #[error("State key '{key}' holds {existing}, refusing to write {attempted}")]
    TypeMismatch {
        key: String,
        existing: &'static str,
        attempted: &'static str,
    },

    /// Append targeted a key that is not an array
    #[error("State key '{key}' is not an array")]
    NotAnArray { key: String },

    /// Initial state was not a JSON object
    #[error("Initial state must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Append-only workflow state
///
/// Keys keep insertion order. A key, once written, can never be removed or
/// replaced; arrays may only grow through [`State::append`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    fields: Map<String, Value>,
}

impl State {
    /// Create an empty State
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Build a State from a JSON object
    pub fn from_json(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(StateError::NotAnObject(value_kind(&other))),
        }
    }

    /// Write a new key
    ///
    /// Re-writing an identical value is accepted; anything else on an existing
    /// key is rejected.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        let key = key.into();
        if let Some(existing) = self.fields.get(&key) {
            if existing == &value {
                return Ok(());
            }
            if value_kind(existing) != value_kind(&value) {
                return Err(StateError::TypeMismatch {
                    key,
                    existing: value_kind(existing),
                    attempted: value_kind(&value),
                });
            }
            return Err(StateError::Conflict { key });
        }
        self.fields.insert(key, value);
        Ok(())
    }

    /// Builder-style [`State::insert`]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Result<Self, StateError> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Append an item to an array key, creating the array if absent
    pub fn append(&mut self, key: impl Into<String>, item: Value) -> Result<(), StateError> {
        let key = key.into();
        let entry = self
            .fields
            .entry(key.clone())
            .or_insert_with(|| Value::Array(vec![]));
        match entry {
            Value::Array(items) => {
                items.push(item);
                Ok(())
            }
            _ => Err(StateError::NotAnArray { key }),
        }
    }

    /// Merge another branch's state into this one
    ///
    /// Keys missing here are added. Arrays are treated as append logs: the
    /// other side's entries past the common prefix are appended. Any other
    /// disagreement is a conflict.
    pub fn merge(&mut self, other: &State) -> Result<(), StateError> {
        for (key, theirs) in &other.fields {
            match self.fields.get_mut(key) {
                None => {
                    self.fields.insert(key.clone(), theirs.clone());
                }
                Some(ours) if ours == theirs => {}
                Some(Value::Array(ours)) => {
                    let Value::Array(theirs) = theirs else {
                        return Err(StateError::TypeMismatch {
                            key: key.clone(),
                            existing: "array",
                            attempted: value_kind(theirs),
                        });
                    };
                    let common = ours
                        .iter()
                        .zip(theirs.iter())
                        .take_while(|(a, b)| a == b)
                        .count();
                    ours.extend(theirs[common..].iter().cloned());
                }
                Some(_) => return Err(StateError::Conflict { key: key.clone() }),
            }
        }
        Ok(())
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Get a nested field value using dot notation (e.g., "validated.score")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// True if the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keys present here but not in `before`, in insertion order
    pub fn added_keys(&self, before: &State) -> Vec<String> {
        self.fields
            .keys()
            .filter(|k| !before.contains_key(k))
            .cloned()
            .collect()
    }

    /// True if this state is `before` plus additions: every earlier key is
    /// still present, unchanged, or (for arrays) extended past its prefix.
    pub fn extends(&self, before: &State) -> bool {
        before.fields.iter().all(|(key, old)| match (old, self.get(key)) {
            (_, None) => false,
            (Value::Array(old), Some(Value::Array(new))) => new.starts_with(old),
            (old, Some(new)) => old == new,
        })
    }

    /// Convert state to JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for State {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

/// Human name of a JSON value's kind
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_state() {
        let state = State::new();
        assert!(state.get("anything").is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(State::from_json(json!({"event": "x"})).is_ok());
        assert_eq!(
            State::from_json(json!([1, 2])),
            Err(StateError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_insert_is_append_only() {
        let mut state = State::new();
        state.insert("value", json!("first")).unwrap();

        // Identical re-write is a no-op
        state.insert("value", json!("first")).unwrap();

        assert_eq!(
            state.insert("value", json!("second")),
            Err(StateError::Conflict {
                key: "value".to_string()
            })
        );
        assert!(matches!(
            state.insert("value", json!(3)),
            Err(StateError::TypeMismatch { .. })
        ));
        assert_eq!(state.get("value"), Some(&json!("first")));
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let state = State::new()
            .with("zeta", json!(1))
            .unwrap()
            .with("alpha", json!(2))
            .unwrap();
        let keys: Vec<_> = state.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_append() {
        let mut state = State::new();
        state.append("history", json!("a")).unwrap();
        state.append("history", json!("b")).unwrap();
        assert_eq!(state.get("history"), Some(&json!(["a", "b"])));

        state.insert("scalar", json!(1)).unwrap();
        assert!(matches!(
            state.append("scalar", json!(2)),
            Err(StateError::NotAnArray { .. })
        ));
    }

    #[test]
    fn test_merge_branches() {
        let base = State::new()
            .with("event", json!("x"))
            .unwrap()
            .with("history", json!(["p"]))
            .unwrap();

        let mut left = base.clone();
        left.insert("a", json!(1)).unwrap();
        left.append("history", json!("l")).unwrap();

        let mut right = base.clone();
        right.insert("b", json!(2)).unwrap();
        right.append("history", json!("r")).unwrap();

        left.merge(&right).unwrap();
        assert_eq!(left.get("a"), Some(&json!(1)));
        assert_eq!(left.get("b"), Some(&json!(2)));
        assert_eq!(left.get("history"), Some(&json!(["p", "l", "r"])));
        assert!(left.extends(&base));
    }

    #[test]
    fn test_merge_conflict() {
        let mut left = State::new().with("k", json!("a")).unwrap();
        let right = State::new().with("k", json!("b")).unwrap();
        assert!(matches!(left.merge(&right), Err(StateError::Conflict { .. })));
    }

    #[test]
    fn test_extends_and_added_keys() {
        let before = State::new().with("event", json!("x")).unwrap();
        let mut after = before.clone();
        after.insert("analysis", json!("text")).unwrap();

        assert!(after.extends(&before));
        assert!(!before.extends(&after));
        assert_eq!(after.added_keys(&before), vec!["analysis".to_string()]);
    }

    #[test]
    fn test_get_path() {
        let state = State::new()
            .with("result", json!({"data": {"value": 42}}))
            .unwrap();

        assert_eq!(state.get_path("result.data"), Some(&json!({"value": 42})));
        assert_eq!(state.get_path("result.data.value"), Some(&json!(42)));
        assert_eq!(state.get_path("result.nonexistent"), None);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let state = State::new().with("a", json!(1)).unwrap();
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({"a": 1}));
    }
}
