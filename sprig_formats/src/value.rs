use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Values exchanged with behaviour scripts and stored in object data payloads.
///
/// The set of kinds is closed: anything a script produces outside of it is
/// rejected by the bridge rather than carried along opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
    #[default]
    Null,
}

impl ScriptValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "integer",
            ScriptValue::Float(_) => "float",
            ScriptValue::String(_) => "string",
            ScriptValue::List(_) => "list",
            ScriptValue::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ScriptValue>> {
        match self {
            ScriptValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, ScriptValue>> {
        match self {
            ScriptValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Equality that ignores the integer/float distinction.
    ///
    /// Lua 5.1 has a single number type, so a value pushed as `Float(2.0)`
    /// comes back as `Int(2)`. Empty lists and empty maps are also
    /// indistinguishable once they have been through a guest table.
    pub fn loosely_eq(&self, other: &ScriptValue) -> bool {
        match (self, other) {
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::List(a), ScriptValue::List(b)) => {
                let (a, b) = (without_trailing_nulls(a), without_trailing_nulls(b));
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (ScriptValue::Map(a), ScriptValue::Map(b)) => {
                let a = a.iter().filter(|(_, v)| !v.is_null());
                let b: Vec<_> = b.iter().filter(|(_, v)| !v.is_null()).collect();
                let a: Vec<_> = a.collect();
                a.len() == b.len()
                    && a.iter()
                        .zip(&b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loosely_eq(vb))
            }
            (ScriptValue::List(list), ScriptValue::Map(map))
            | (ScriptValue::Map(map), ScriptValue::List(list)) => {
                without_trailing_nulls(list).is_empty() && map.values().all(ScriptValue::is_null)
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

/// Guest tables cannot hold a nil past their last element, so trailing
/// nulls carry no information across the bridge.
fn without_trailing_nulls(items: &[ScriptValue]) -> &[ScriptValue] {
    let end = items.iter().rposition(|item| !item.is_null()).map_or(0, |last| last + 1);
    &items[..end]
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(value: Vec<ScriptValue>) -> Self {
        ScriptValue::List(value)
    }
}

impl From<BTreeMap<String, ScriptValue>> for ScriptValue {
    fn from(value: BTreeMap<String, ScriptValue>) -> Self {
        ScriptValue::Map(value)
    }
}
