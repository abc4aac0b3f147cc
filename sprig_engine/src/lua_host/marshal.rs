//! Conversion between [`ScriptValue`] graphs and Lua values.
//!
//! Lists are written from [`LIST_BASE`]. On the way back a table holding any
//! integer-like key is read as a list running from [`LIST_BASE`] to its
//! largest index, with holes read as null; string keys and indices below the
//! base are dropped. Tables with only string keys (including empty ones)
//! come back as maps.

use std::collections::BTreeMap;

use mlua::{Lua, Table, Value};
use sprig_formats::ScriptValue;
use thiserror::Error;

/// First index used when writing a list into a guest table.
pub const LIST_BASE: i64 = 1;

/// Nesting limit when reading guest tables; guards self-referential tables.
pub const MAX_PULL_DEPTH: usize = 64;

/// Largest list a guest table may expand to once its holes are filled.
pub const MAX_LIST_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("{site}: expected a table but the script produced {found}")]
    NotATable { site: String, found: &'static str },
    #[error("{site}: guest value of kind {kind} cannot cross into the host")]
    Unsupported { site: String, kind: &'static str },
    #[error("{site}: table key of kind {kind} is neither a string nor an integer")]
    UnsupportedKey { site: String, kind: &'static str },
    #[error("{site}: string is not valid UTF-8")]
    InvalidString { site: String },
    #[error("{site}: table nesting exceeds {MAX_PULL_DEPTH} levels")]
    TooDeep { site: String },
    #[error("{site}: list index {index} is beyond {MAX_LIST_LEN} entries")]
    TooSparse { site: String, index: i64 },
    #[error("{site}: {source}")]
    Lua {
        site: String,
        #[source]
        source: mlua::Error,
    },
}

fn lua_error(site: &str) -> impl FnOnce(mlua::Error) -> MarshalError + '_ {
    move |source| MarshalError::Lua {
        site: site.to_string(),
        source,
    }
}

/// Builds the guest representation of `value`.
///
/// Null map entries are omitted, so absent fields are simply missing on the
/// guest side.
pub fn push<'lua>(lua: &'lua Lua, value: &ScriptValue) -> mlua::Result<Value<'lua>> {
    Ok(match value {
        ScriptValue::Null => Value::Nil,
        ScriptValue::Bool(b) => Value::Boolean(*b),
        ScriptValue::Int(i) => Value::Integer(*i),
        ScriptValue::Float(f) => Value::Number(*f),
        ScriptValue::String(s) => Value::String(lua.create_string(s)?),
        ScriptValue::List(items) => {
            let table = lua.create_table()?;
            for (offset, item) in items.iter().enumerate() {
                table.raw_set(LIST_BASE + offset as i64, push(lua, item)?)?;
            }
            Value::Table(table)
        }
        ScriptValue::Map(entries) => Value::Table(push_map(lua, entries)?),
    })
}

pub fn push_map<'lua>(
    lua: &'lua Lua,
    entries: &BTreeMap<String, ScriptValue>,
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    for (key, item) in entries {
        if item.is_null() {
            continue;
        }
        table.raw_set(key.as_str(), push(lua, item)?)?;
    }
    Ok(table)
}

/// Reads a guest value back into the host. `site` names the caller for
/// diagnostics.
pub fn pull(value: Value<'_>, site: &str) -> Result<ScriptValue, MarshalError> {
    pull_at_depth(value, site, 0)
}

/// Like [`pull`], but the value must be a table read as a string-keyed map.
pub fn pull_table(value: Value<'_>, site: &str) -> Result<BTreeMap<String, ScriptValue>, MarshalError> {
    let Value::Table(table) = value else {
        return Err(MarshalError::NotATable {
            site: site.to_string(),
            found: value.type_name(),
        });
    };
    match pull_table_value(table, site, 0)? {
        ScriptValue::Map(map) => Ok(map),
        other => Err(MarshalError::NotATable {
            site: site.to_string(),
            found: other.kind(),
        }),
    }
}

fn pull_at_depth(value: Value<'_>, site: &str, depth: usize) -> Result<ScriptValue, MarshalError> {
    match value {
        Value::Nil => Ok(ScriptValue::Null),
        Value::Boolean(b) => Ok(ScriptValue::Bool(b)),
        Value::Integer(i) => Ok(ScriptValue::Int(i)),
        Value::Number(n) => Ok(ScriptValue::Float(n)),
        Value::String(s) => s
            .to_str()
            .map(|text| ScriptValue::String(text.to_string()))
            .map_err(|_| MarshalError::InvalidString {
                site: site.to_string(),
            }),
        Value::Table(table) => pull_table_value(table, site, depth),
        other => Err(MarshalError::Unsupported {
            site: site.to_string(),
            kind: other.type_name(),
        }),
    }
}

fn pull_table_value(table: Table<'_>, site: &str, depth: usize) -> Result<ScriptValue, MarshalError> {
    if depth >= MAX_PULL_DEPTH {
        return Err(MarshalError::TooDeep {
            site: site.to_string(),
        });
    }

    let mut indexed: Vec<(i64, Value)> = Vec::new();
    let mut named: Vec<(String, Value)> = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, item) = pair.map_err(lua_error(site))?;
        match key {
            Value::Integer(i) => indexed.push((i, item)),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => indexed.push((n as i64, item)),
            Value::String(s) => {
                let key = s.to_str().map_err(|_| MarshalError::InvalidString {
                    site: site.to_string(),
                })?;
                named.push((key.to_string(), item));
            }
            other => {
                return Err(MarshalError::UnsupportedKey {
                    site: site.to_string(),
                    kind: other.type_name(),
                })
            }
        }
    }

    if !indexed.is_empty() {
        let last = indexed.iter().map(|(index, _)| *index).max().unwrap_or(LIST_BASE - 1);
        let len = usize::try_from(last.saturating_sub(LIST_BASE).saturating_add(1)).unwrap_or(0);
        if len > MAX_LIST_LEN {
            return Err(MarshalError::TooSparse {
                site: site.to_string(),
                index: last,
            });
        }
        let mut items = vec![ScriptValue::Null; len];
        for (index, item) in indexed {
            if index < LIST_BASE {
                continue;
            }
            items[(index - LIST_BASE) as usize] = pull_at_depth(item, site, depth + 1)?;
        }
        return Ok(ScriptValue::List(items));
    }

    let mut map = BTreeMap::new();
    for (key, item) in named {
        map.insert(key, pull_at_depth(item, site, depth + 1)?);
    }
    Ok(ScriptValue::Map(map))
}
