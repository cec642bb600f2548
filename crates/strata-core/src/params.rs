//! Method parameters.
//!
//! A parameter value is either a literal or a string of the form
//! `${{step_id.side_outputs.name}}` naming another step's side output.
//! [`Value::as_reference`] makes that distinction; resolution against the
//! side-output table lives in `side_outputs`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A method parameter or side-output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

/// A parsed reference to another step's side output, the non-literal form
/// a string parameter can take.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub step_id: String,
    pub output: String,
}

impl OutputRef {
    /// Parse a `${{step_id.side_outputs.name}}` reference string.
    ///
    /// Returns `None` for anything that does not match the syntax exactly;
    /// such strings stay literals.
    pub fn parse(s: &str) -> Option<OutputRef> {
        let inner = s.strip_prefix("${{")?.strip_suffix("}}")?.trim();
        let mut parts = inner.splitn(3, '.');
        let step_id = parts.next()?;
        let keyword = parts.next()?;
        let output = parts.next()?;
        if keyword != "side_outputs" || step_id.is_empty() || output.is_empty() {
            return None;
        }
        Some(OutputRef {
            step_id: step_id.to_string(),
            output: output.to_string(),
        })
    }
}

impl Value {
    /// The side output this value refers to, when it is a reference string
    /// rather than a literal.
    pub fn as_reference(&self) -> Option<OutputRef> {
        self.as_str().and_then(OutputRef::parse)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Numeric view with integer widening, so a parameter written as `10`
    /// still feeds a method argument that wants a float.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(n) => Some(n),
            Value::Int(n) => Some(n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(arr: Vec<T>) -> Self {
        Value::Array(arr.into_iter().map(Into::into).collect())
    }
}

/// A step's parameter mapping. Order is preserved for reproducible plans.
pub type Params = IndexMap<String, Value>;

/// Extension trait for building `Params` ergonomically.
pub trait ParamsExt {
    fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self;
}

impl ParamsExt for Params {
    fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_strings_are_detected() {
        let r = Value::from("${{centering.side_outputs.cor}}")
            .as_reference()
            .unwrap();
        assert_eq!(r.step_id, "centering");
        assert_eq!(r.output, "cor");

        assert!(Value::from("raw").as_reference().is_none());
        assert!(Value::Float(64.5).as_reference().is_none());
    }

    #[test]
    fn test_malformed_references_stay_literal() {
        for s in [
            "centering.side_outputs.cor",
            "${{centering.outputs.cor}}",
            "${{centering.side_outputs}}",
            "${{.side_outputs.cor}}",
            "${{centering.side_outputs.}}",
        ] {
            assert!(Value::from(s).as_reference().is_none(), "{s}");
        }
    }

    #[test]
    fn test_int_parameters_widen_to_f64() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Int(7).as_str(), None);
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_params_builder_preserves_order() {
        let params = Params::new()
            .with("minus_log", true)
            .with("center", 64.5f64)
            .with("iterations", 10i64);

        let keys: Vec<_> = params.keys().map(String::as_str).collect();
        assert_eq!(keys, ["minus_log", "center", "iterations"]);
        assert_eq!(params.get("center").and_then(Value::as_f64), Some(64.5));
        assert_eq!(params.get("minus_log").and_then(Value::as_bool), Some(true));
    }
}
