//! Runtime argument vector model.
//!
//! Operations are invoked with a positional vector of [`ArgValue`]s matching
//! the declared parameter list. Values travel as JSON values: strings and
//! numbers are scalars, arrays are iterables, objects feed query-map and
//! header-map parameters.

use serde_json::Value;

use crate::request::Options;

/// One positional argument of an invocation.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// A plain value bound to named expressions, maps or the body.
    Value(Value),
    /// An absolute base URI overriding the target for this call.
    Uri(String),
    /// Per-call transport options overriding the operation defaults.
    Options(Options),
}

impl ArgValue {
    /// The JSON value, if this argument carries one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(values: Vec<String>) -> Self {
        Self::Value(Value::Array(
            values.into_iter().map(Value::String).collect(),
        ))
    }
}

impl From<Options> for ArgValue {
    fn from(options: Options) -> Self {
        Self::Options(options)
    }
}

/// Custom stringifier for one parameter's values.
pub trait Expander: Send + Sync {
    /// Render a single (non-iterable) value.
    fn expand(&self, value: &Value) -> String;
}

/// Default display-style stringification.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToStringExpander;

impl Expander for ToStringExpander {
    fn expand(&self, value: &Value) -> String {
        crate::template::stringify(value)
    }
}
