pub mod marshal;
pub mod object_script;

use std::fmt;

use mlua::{Function, Lua, LuaOptions, StdLib, Value};
use sprig_formats::{Script, ScriptValue};

use crate::error::EngineError;
use marshal::MarshalError;

/// Name of the single global every behaviour script must define.
pub const DEFAULT_ENTRY_POINT: &str = "update";

/// One Lua interpreter bound to a live game session.
///
/// Sessions drop and recreate the host whenever their game is loaded or
/// replaced; the interpreter is never reset in place, so globals a script
/// defines cannot leak into another session.
pub struct ScriptHost {
    lua: Lua,
    entry_point: String,
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHost")
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

impl ScriptHost {
    pub fn new(entry_point: &str) -> Result<Self, EngineError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        Ok(ScriptHost {
            lua,
            entry_point: entry_point.to_string(),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn push_global(&self, name: &str, value: &ScriptValue) -> Result<(), EngineError> {
        let guest = marshal::push(&self.lua, value)?;
        self.lua.globals().set(name, guest)?;
        Ok(())
    }

    pub fn pull_global(&self, name: &str) -> Result<ScriptValue, MarshalError> {
        let site = format!("global {name}");
        let value: Value = self
            .lua
            .globals()
            .get(name)
            .map_err(|source| MarshalError::Lua {
                site: site.clone(),
                source,
            })?;
        marshal::pull(value, &site)
    }

    pub fn clear_global(&self, name: &str) -> Result<(), EngineError> {
        self.lua.globals().set(name, Value::Nil)?;
        Ok(())
    }

    /// Executes the script body and returns the entry point it defines.
    ///
    /// The previous binding is cleared first so a script without an entry
    /// point cannot silently reuse another script's function.
    pub fn bind_entry_point(&self, script: &Script, object_id: &str) -> Result<Function<'_>, EngineError> {
        let globals = self.lua.globals();
        globals.set(self.entry_point.as_str(), Value::Nil)?;

        self.lua
            .load(script.source.as_str())
            .set_name(format!("script:{}", script.id))
            .exec()
            .map_err(|source| EngineError::ScriptFailed {
                object: object_id.to_string(),
                script: script.id.clone(),
                source,
            })?;

        match globals.get::<_, Value>(self.entry_point.as_str())? {
            Value::Function(function) => Ok(function),
            other => Err(EngineError::ContractViolation {
                object: object_id.to_string(),
                script: script.id.clone(),
                reason: format!(
                    "global `{}` is {} instead of a function",
                    self.entry_point,
                    other.type_name()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScriptHost, DEFAULT_ENTRY_POINT};
    use crate::error::EngineError;
    use sprig_formats::{Script, ScriptValue};

    fn script(id: &str, source: &str) -> Script {
        Script {
            id: id.into(),
            name: id.into(),
            source: source.into(),
            includes: Vec::new(),
        }
    }

    #[test]
    fn globals_round_trip_through_the_host() {
        let host = ScriptHost::new(DEFAULT_ENTRY_POINT).expect("host");
        host.push_global("width", &ScriptValue::Float(320.5))
            .expect("push");
        host.lua()
            .load("width = width * 2")
            .exec()
            .expect("script runs");
        let width = host.pull_global("width").expect("pull");
        assert_eq!(width.as_f64(), Some(641.0));

        host.clear_global("width").expect("clear");
        assert!(host.pull_global("width").expect("pull").is_null());
    }

    #[test]
    fn missing_entry_point_is_a_contract_violation() {
        let host = ScriptHost::new(DEFAULT_ENTRY_POINT).expect("host");
        host.bind_entry_point(&script("ok", "function update(t) return t end"), "a")
            .expect("first script binds");
        let err = host
            .bind_entry_point(&script("empty", "local x = 1"), "b")
            .expect_err("stale entry point must not be reused");
        match err {
            EngineError::ContractViolation { object, script, .. } => {
                assert_eq!(object, "b");
                assert_eq!(script, "empty");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_carry_the_script_id() {
        let host = ScriptHost::new(DEFAULT_ENTRY_POINT).expect("host");
        let err = host
            .bind_entry_point(&script("broken", "function update("), "rock")
            .expect_err("syntax error");
        assert!(matches!(err, EngineError::ScriptFailed { ref script, .. } if script == "broken"));
    }

    #[test]
    fn fresh_hosts_do_not_share_globals() {
        let first = ScriptHost::new(DEFAULT_ENTRY_POINT).expect("host");
        first.lua().load("leak = 42").exec().expect("exec");
        let second = ScriptHost::new(DEFAULT_ENTRY_POINT).expect("host");
        assert!(second.pull_global("leak").expect("pull").is_null());
    }
}
