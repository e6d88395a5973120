//! Runtime value types

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::super::errors::ErrorInfo;
use super::super::stdlib::Builtin;
use super::ast::FunctionDef;
use crate::events::Subscription;

/// Runtime value type
#[derive(Debug, Clone)]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(BTreeMap<String, Val>),
    /// User function, shared with every value that refers to it
    Func(Arc<FunctionDef>),
    /// Host builtin
    Native(Builtin),
    /// Handle returned by `on`/`once`
    Subscription(Subscription),
    /// Error value with code and message
    Error(ErrorInfo),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::List(_) => "list",
            Val::Obj(_) => "object",
            Val::Func(_) | Val::Native(_) => "function",
            Val::Subscription(_) => "subscription",
            Val::Error(_) => "error",
        }
    }

    /// Convert to JSON; functions and handles become descriptive strings
    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Num(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Obj(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Val::Error(info) => serde_json::json!({ "code": info.code, "message": info.message }),
            other => JsonValue::String(other.to_string()),
        }
    }
}

impl From<JsonValue> for Val {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Val::Null,
            JsonValue::Bool(b) => Val::Bool(b),
            JsonValue::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Val::Str(s),
            JsonValue::Array(items) => Val::List(items.into_iter().map(Val::from).collect()),
            JsonValue::Object(fields) => {
                Val::Obj(fields.into_iter().map(|(k, v)| (k, Val::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::List(a), Val::List(b)) => a == b,
            (Val::Obj(a), Val::Obj(b)) => a == b,
            (Val::Func(a), Val::Func(b)) => Arc::ptr_eq(a, b),
            (Val::Native(a), Val::Native(b)) => a == b,
            (Val::Subscription(a), Val::Subscription(b)) => {
                a.id() == b.id() && a.topic() == b.topic()
            }
            (Val::Error(a), Val::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => f.write_str(s),
            other => write_nested(other, f),
        }
    }
}

/// Display form used inside containers, where strings are quoted
fn write_nested(val: &Val, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match val {
        Val::Null => f.write_str("null"),
        Val::Bool(b) => write!(f, "{}", b),
        Val::Num(n) => write_number(*n, f),
        Val::Str(s) => write!(f, "{:?}", s),
        Val::List(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_nested(item, f)?;
            }
            f.write_str("]")
        }
        Val::Obj(fields) => {
            f.write_str("{")?;
            for (i, (key, value)) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: ", key)?;
                write_nested(value, f)?;
            }
            f.write_str("}")
        }
        Val::Func(def) => match &def.name {
            Some(name) => write!(f, "<function {}>", name),
            None => f.write_str("<function>"),
        },
        Val::Native(builtin) => write!(f, "<builtin {}>", builtin.name()),
        Val::Subscription(sub) => write!(f, "<subscription {} #{}>", sub.topic(), sub.id().0),
        Val::Error(info) => write!(f, "{}: {}", info.code, info.message),
    }
}

fn write_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}
