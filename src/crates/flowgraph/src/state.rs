//! State schema and reducer system for graph runs.
//!
//! Graph state is a JSON object whose fields each carry a **reducer**: a pure
//! function deciding how an incoming write combines with the current value.
//! Nodes return partial updates; the engine folds every updated field through
//! its reducer before the next node observes the state.
//!
//! # Built-in reducers
//!
//! | Reducer | Behavior | Typical field |
//! |---------|----------|---------------|
//! | [`OverwriteReducer`] | Last write wins | `sender`, decisions |
//! | [`AppendReducer`] | Concatenate sequences | conversation history |
//! | [`ConcatReducer`] | Join strings with a separator | agent scratch states |
//! | [`SumReducer`] | Add numbers | retry counters |
//!
//! # Example
//!
//! ```rust
//! use flowgraph::state::{StateSchema, AppendReducer, SumReducer};
//! use serde_json::json;
//!
//! let mut schema = StateSchema::new();
//! schema.add_field("internal_messages", Box::new(AppendReducer));
//! schema.add_field("retries", Box::new(SumReducer));
//!
//! let mut state = json!({"internal_messages": [], "retries": 0});
//! schema.apply(&mut state, &json!({"internal_messages": ["hi"], "retries": 1})).unwrap();
//! assert_eq!(state["internal_messages"], json!(["hi"]));
//! assert_eq!(state["retries"], json!(1));
//! ```

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{GraphError, Result};

/// A pure merge function for one state field.
///
/// Reducers must be total over the value shapes their field carries; a shape
/// mismatch is a fatal run error, not something to paper over.
pub trait Reducer: Send + Sync {
    /// Combine the current value (possibly `Null` on first write) with an
    /// incoming update.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Short name used in diagnostics.
    fn name(&self) -> &str;
}

/// Replaces the current value with the update. The default when a field has
/// no explicit reducer.
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "replace"
    }
}

/// Appends the update to the current array. A scalar update is pushed as a
/// single element; a `Null` current initializes the sequence.
#[derive(Debug, Clone)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(cur), Value::Array(upd)) => {
                let mut merged = cur.clone();
                merged.extend_from_slice(upd);
                Ok(Value::Array(merged))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(cur), single) => {
                let mut merged = cur.clone();
                merged.push(single.clone());
                Ok(Value::Array(merged))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            _ => Err(GraphError::State {
                field: String::new(),
                error: "append requires an array".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Accumulates strings by joining with a separator.
///
/// Left-associative: `concat(concat(a, b), c)` is the canonical grouping. An
/// empty or `Null` current yields the update unchanged, so the separator never
/// leads the accumulated string.
#[derive(Debug, Clone)]
pub struct ConcatReducer {
    separator: String,
}

impl ConcatReducer {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// The single-space variant used by agent scratch states.
    pub fn spaced() -> Self {
        Self::new(" ")
    }
}

impl Reducer for ConcatReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        let upd = update.as_str().ok_or_else(|| GraphError::State {
            field: String::new(),
            error: "concat requires a string update".to_string(),
        })?;
        match current {
            Value::Null => Ok(Value::String(upd.to_string())),
            Value::String(cur) if cur.is_empty() => Ok(Value::String(upd.to_string())),
            Value::String(cur) => Ok(Value::String(format!("{}{}{}", cur, self.separator, upd))),
            _ => Err(GraphError::State {
                field: String::new(),
                error: "concat requires a string current value".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "concat"
    }
}

/// Adds numeric values. Integers stay integers; any float involvement
/// promotes to float.
#[derive(Debug, Clone)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    Ok(Value::Number((x + y).into()))
                } else if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                    Ok(serde_json::Number::from_f64(x + y)
                        .map(Value::Number)
                        .unwrap_or(Value::Null))
                } else {
                    Err(GraphError::State {
                        field: String::new(),
                        error: "sum requires numeric values".to_string(),
                    })
                }
            }
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            _ => Err(GraphError::State {
                field: String::new(),
                error: "sum requires numeric values".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// Field-to-reducer mapping for a graph's state.
#[derive(Default)]
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
    default_reducer: Option<Box<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(name.into(), reducer);
    }

    /// Builder form of [`add_field`](Self::add_field).
    pub fn with_field(mut self, name: impl Into<String>, reducer: Box<dyn Reducer>) -> Self {
        self.add_field(name, reducer);
        self
    }

    pub fn with_default_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.default_reducer = Some(reducer);
        self
    }

    fn reducer_for(&self, field: &str) -> Option<&dyn Reducer> {
        self.fields
            .get(field)
            .map(|r| r.as_ref())
            .or_else(|| self.default_reducer.as_ref().map(|r| r.as_ref()))
    }

    /// Fold an update into `state`, field by field, through each reducer.
    /// Fields without a reducer are overwritten.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let state_obj = state.as_object_mut().ok_or_else(|| GraphError::State {
            field: String::new(),
            error: "state must be an object".to_string(),
        })?;
        let update_obj = update.as_object().ok_or_else(|| GraphError::State {
            field: String::new(),
            error: "update must be an object".to_string(),
        })?;

        for (field, incoming) in update_obj {
            let current = state_obj.get(field).cloned().unwrap_or(Value::Null);
            let merged = match self.reducer_for(field) {
                Some(reducer) => reducer.reduce(&current, incoming).map_err(|e| match e {
                    GraphError::State { error, .. } => GraphError::State {
                        field: field.clone(),
                        error,
                    },
                    other => other,
                })?,
                None => incoming.clone(),
            };
            state_obj.insert(field.clone(), merged);
        }
        Ok(())
    }

    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn overwrite_replaces() {
        let r = OverwriteReducer;
        assert_eq!(
            r.reduce(&json!("old"), &json!("new")).unwrap(),
            json!("new")
        );
    }

    #[test]
    fn append_merges_arrays() {
        let r = AppendReducer;
        assert_eq!(
            r.reduce(&json!([1, 2]), &json!([3])).unwrap(),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn append_pushes_scalar() {
        let r = AppendReducer;
        assert_eq!(r.reduce(&json!([1]), &json!(2)).unwrap(), json!([1, 2]));
    }

    #[test]
    fn append_initializes_from_null() {
        let r = AppendReducer;
        assert_eq!(
            r.reduce(&Value::Null, &json!(["x"])).unwrap(),
            json!(["x"])
        );
    }

    #[test]
    fn concat_joins_with_separator() {
        let r = ConcatReducer::spaced();
        assert_eq!(
            r.reduce(&json!("step one"), &json!("step two")).unwrap(),
            json!("step one step two")
        );
    }

    #[test]
    fn concat_skips_separator_on_empty_current() {
        let r = ConcatReducer::spaced();
        assert_eq!(r.reduce(&json!(""), &json!("first")).unwrap(), json!("first"));
        assert_eq!(
            r.reduce(&Value::Null, &json!("first")).unwrap(),
            json!("first")
        );
    }

    #[test]
    fn concat_is_left_associative() {
        let r = ConcatReducer::spaced();
        let ab = r.reduce(&json!("a"), &json!("b")).unwrap();
        let abc = r.reduce(&ab, &json!("c")).unwrap();
        assert_eq!(abc, json!("a b c"));
    }

    #[test]
    fn sum_adds_integers() {
        let r = SumReducer;
        assert_eq!(r.reduce(&json!(3), &json!(4)).unwrap(), json!(7));
    }

    #[test]
    fn schema_applies_per_field() {
        let mut schema = StateSchema::new();
        schema.add_field("log", Box::new(AppendReducer));
        schema.add_field("count", Box::new(SumReducer));

        let mut state = json!({"log": ["a"], "count": 1});
        schema
            .apply(&mut state, &json!({"log": ["b"], "count": 2}))
            .unwrap();
        assert_eq!(state["log"], json!(["a", "b"]));
        assert_eq!(state["count"], json!(3));
    }

    #[test]
    fn unknown_field_is_overwritten() {
        let schema = StateSchema::new();
        let mut state = json!({"x": 1});
        schema.apply(&mut state, &json!({"x": 2, "y": 3})).unwrap();
        assert_eq!(state["x"], json!(2));
        assert_eq!(state["y"], json!(3));
    }

    proptest! {
        // append is associative over arbitrary integer arrays
        #[test]
        fn append_associative(a in prop::collection::vec(any::<i64>(), 0..8),
                              b in prop::collection::vec(any::<i64>(), 0..8),
                              c in prop::collection::vec(any::<i64>(), 0..8)) {
            let r = AppendReducer;
            let (a, b, c) = (json!(a), json!(b), json!(c));
            let left = r.reduce(&r.reduce(&a, &b).unwrap(), &c).unwrap();
            let right = r.reduce(&a, &r.reduce(&b, &c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }

        // sum is associative over i32-range integers (no overflow in range)
        #[test]
        fn sum_associative(a in -1_000_000i64..1_000_000,
                           b in -1_000_000i64..1_000_000,
                           c in -1_000_000i64..1_000_000) {
            let r = SumReducer;
            let (a, b, c) = (json!(a), json!(b), json!(c));
            let left = r.reduce(&r.reduce(&a, &b).unwrap(), &c).unwrap();
            let right = r.reduce(&a, &r.reduce(&b, &c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }
    }
}
