// SPDX-License-Identifier: MIT

//! Runtime state storage for workflow execution

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::schema::{type_name, ReducerType, StateSchema};
use crate::adk::error::StateError;
use crate::brigade::workflow::graph::START;

/// Fields a node wants written into state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    fields: Map<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Build an update from a typed record. `None` fields are left out so
    /// they don't clear values written earlier.
    pub fn from_serialize<T: Serialize>(record: &T) -> Result<Self, StateError> {
        match serde_json::to_value(record)? {
            Value::Object(obj) => Ok(Self {
                fields: obj.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            }),
            other => Err(StateError::NotAnObject(type_name(&other).to_string())),
        }
    }

    /// Fold another update in; later keys win
    pub fn extend(mut self, other: StateUpdate) -> Self {
        self.fields.extend(other.fields);
        self
    }

    /// Fold a later update in through the reducers of `schema`, so that
    /// applying the result once matches applying both in turn.
    pub fn combine(mut self, later: StateUpdate, schema: &StateSchema) -> Self {
        for (key, value) in later.fields {
            let combined = reduce(self.fields.get(&key), value, schema.reducer(&key));
            self.fields.insert(key, combined);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Runtime workflow state with reducer support
///
/// Fields keep insertion order. Every field remembers the node that last
/// wrote it so that joins can tell inherited values from concurrent writes.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    /// Current state values
    fields: Map<String, Value>,
    /// Last writer of each field
    writers: HashMap<String, String>,
    schema: Arc<StateSchema>,
}

impl WorkflowState {
    /// Create an empty WorkflowState governed by `schema`
    pub fn new(schema: Arc<StateSchema>) -> Self {
        Self {
            fields: Map::new(),
            writers: HashMap::new(),
            schema,
        }
    }

    /// Create an empty WorkflowState with no schema
    pub fn empty() -> Self {
        Self::new(Arc::new(StateSchema::default()))
    }

    /// Create the initial state of a run from its JSON input
    pub fn from_input(schema: Arc<StateSchema>, input: Value) -> Result<Self, StateError> {
        let Value::Object(obj) = input else {
            return Err(StateError::NotAnObject(type_name(&input).to_string()));
        };
        let mut state = Self::new(schema);
        let update = StateUpdate { fields: obj };
        state.apply(&update, START)?;
        Ok(state)
    }

    /// Apply an update on behalf of `writer`.
    ///
    /// All values are reduced and type-checked before any is stored, so a
    /// rejected update leaves the state untouched.
    pub fn apply(&mut self, update: &StateUpdate, writer: &str) -> Result<(), StateError> {
        let mut staged = Vec::with_capacity(update.len());

        for (key, value) in update.iter() {
            let def = self.schema.get(key);
            let reducer = def.map(|d| d.reducer).unwrap_or_default();
            let reduced = reduce(self.fields.get(key), value.clone(), reducer);

            if let Some(def) = def {
                if !def.field_type.matches(&reduced) {
                    return Err(StateError::FieldType {
                        field: key.clone(),
                        expected: def.field_type,
                        found: type_name(&reduced).to_string(),
                    });
                }
            }
            staged.push((key.clone(), reduced));
        }

        for (key, value) in staged {
            self.writers.insert(key.clone(), writer.to_string());
            self.fields.insert(key, value);
        }
        Ok(())
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Decode the state into a typed record
    pub fn record<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Node that last wrote `key`
    pub fn writer_of(&self, key: &str) -> Option<&str> {
        self.writers.get(key).map(String::as_str)
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Store a value as written by `writer` without reducing or checking it.
    /// Used by joins, whose inputs were already checked on their branches.
    pub(crate) fn adopt(&mut self, key: &str, value: Value, writer: &str) {
        self.writers.insert(key.to_string(), writer.to_string());
        self.fields.insert(key.to_string(), value);
    }

    /// Convert state to JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Get all field names, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::empty()
    }
}

pub(crate) fn reduce(current: Option<&Value>, value: Value, reducer: ReducerType) -> Value {
    match reducer {
        ReducerType::Overwrite => value,
        ReducerType::Append => {
            let mut items = match current {
                Some(Value::Array(a)) => a.clone(),
                _ => Vec::new(),
            };
            match value {
                Value::Array(new_items) => items.extend(new_items),
                other => items.push(other),
            }
            Value::Array(items)
        }
        ReducerType::Max | ReducerType::Min => {
            let (Some(cur), Some(new)) = (current.and_then(Value::as_f64), value.as_f64()) else {
                return if value.is_number() {
                    value
                } else {
                    current.cloned().unwrap_or(value)
                };
            };
            let keep_new = if reducer == ReducerType::Max {
                new > cur
            } else {
                new < cur
            };
            if keep_new {
                value
            } else {
                current.cloned().unwrap_or(value)
            }
        }
        ReducerType::Merge => match (current, value) {
            (Some(Value::Object(cur)), Value::Object(new_obj)) => {
                let mut merged = cur.clone();
                for (k, v) in new_obj {
                    merged.insert(k, v);
                }
                Value::Object(merged)
            }
            (_, other) => other,
        },
    }
}
