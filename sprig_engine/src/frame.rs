//! Per-frame exchange between a session's game and its interpreter.
//!
//! A frame samples input, runs the script pass against a working copy of
//! the game, merges the global namespace back and then applies reserved
//! controls. The working copy replaces the game only when the whole pass
//! succeeds.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sprig_formats::{Game, Object, Rasterizer, ScriptValue};

use crate::error::EngineError;
use crate::input::ReservedControl;
use crate::lua_host::object_script::{self, apply_recognized, merge_data, object_table, Target, RECOGNIZED_KEYS};
use crate::lua_host::ScriptHost;
use crate::session::Session;

pub const ID_GLOBAL: &str = "id";
pub const NAME_GLOBAL: &str = "name";
pub const DEBUG_GLOBAL: &str = "debug";
pub const WIDTH_GLOBAL: &str = "width";
pub const HEIGHT_GLOBAL: &str = "height";
pub const SUBJECT_GLOBAL: &str = "subject";
pub const OBJECTS_GLOBAL: &str = "objects";
pub const INPUT_GLOBAL: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub paused: bool,
    pub scripts_ran: usize,
    pub controls: Vec<ReservedControl>,
}

/// Values pushed into the global namespace at the start of the pass.
#[derive(Debug, Clone)]
struct GlobalSnapshot {
    id: ScriptValue,
    name: ScriptValue,
    width: ScriptValue,
    height: ScriptValue,
    subject: Option<BTreeMap<String, ScriptValue>>,
    objects: BTreeMap<String, BTreeMap<String, ScriptValue>>,
}

impl GlobalSnapshot {
    fn capture(game: &Game) -> Self {
        GlobalSnapshot {
            id: ScriptValue::String(game.id.clone()),
            name: ScriptValue::String(game.name.clone()),
            width: ScriptValue::Float(game.width),
            height: ScriptValue::Float(game.height),
            subject: game.subject.as_ref().map(object_table),
            objects: game
                .objects
                .iter()
                .map(|(id, object)| (id.clone(), object_table(object)))
                .collect(),
        }
    }

    fn push(&self, host: &ScriptHost, debug: bool, pressed: &BTreeSet<String>) -> Result<(), EngineError> {
        host.push_global(ID_GLOBAL, &self.id)?;
        host.push_global(NAME_GLOBAL, &self.name)?;
        host.push_global(DEBUG_GLOBAL, &ScriptValue::Bool(debug))?;
        host.push_global(WIDTH_GLOBAL, &self.width)?;
        host.push_global(HEIGHT_GLOBAL, &self.height)?;
        match &self.subject {
            Some(table) => host.push_global(SUBJECT_GLOBAL, &ScriptValue::Map(table.clone()))?,
            None => host.clear_global(SUBJECT_GLOBAL)?,
        }
        let objects = self
            .objects
            .iter()
            .map(|(id, table)| (id.clone(), ScriptValue::Map(table.clone())))
            .collect();
        host.push_global(OBJECTS_GLOBAL, &ScriptValue::Map(objects))?;
        let input = pressed
            .iter()
            .map(|key| (key.clone(), ScriptValue::Bool(true)))
            .collect();
        host.push_global(INPUT_GLOBAL, &ScriptValue::Map(input))?;
        Ok(())
    }
}

fn global_error(field: &str, reason: String) -> EngineError {
    EngineError::GlobalContract {
        field: field.to_string(),
        reason,
    }
}

/// Applies the fields of `pulled` that differ from `pushed` to `object`.
/// Data keys the pass removed are dropped from the payload.
fn merge_entity(
    field: &str,
    object: &mut Object,
    pushed: &BTreeMap<String, ScriptValue>,
    pulled: BTreeMap<String, ScriptValue>,
) -> Result<(), EngineError> {
    for (key, before) in pushed {
        if !pulled.contains_key(key) && !before.is_null() && !RECOGNIZED_KEYS.contains(&key.as_str()) {
            object.data.remove(key);
        }
    }
    for (key, value) in pulled {
        if pushed.get(&key).is_some_and(|before| before.loosely_eq(&value)) {
            continue;
        }
        if apply_recognized(object, &key, &value).map_err(|reason| global_error(field, reason))? {
            continue;
        }
        merge_data(object, &key, value);
    }
    Ok(())
}

fn merge_globals(host: &ScriptHost, game: &mut Game, snapshot: &GlobalSnapshot) -> Result<(), EngineError> {
    let id = host.pull_global(ID_GLOBAL)?;
    if !id.is_null() && !id.loosely_eq(&snapshot.id) {
        let text = id
            .as_str()
            .ok_or_else(|| global_error(ID_GLOBAL, format!("expected a string, got {}", id.kind())))?;
        game.id = text.to_string();
    }

    let name = host.pull_global(NAME_GLOBAL)?;
    if !name.is_null() && !name.loosely_eq(&snapshot.name) {
        let text = name
            .as_str()
            .ok_or_else(|| global_error(NAME_GLOBAL, format!("expected a string, got {}", name.kind())))?;
        game.name = text.to_string();
    }

    for (field, pushed, slot) in [
        (WIDTH_GLOBAL, &snapshot.width, &mut game.width),
        (HEIGHT_GLOBAL, &snapshot.height, &mut game.height),
    ] {
        let value = host.pull_global(field)?;
        if value.is_null() || value.loosely_eq(pushed) {
            continue;
        }
        *slot = value
            .as_f64()
            .ok_or_else(|| global_error(field, format!("expected a number, got {}", value.kind())))?;
    }

    let subject = host.pull_global(SUBJECT_GLOBAL)?;
    if let (Some(object), Some(pushed)) = (game.subject.as_mut(), snapshot.subject.as_ref()) {
        match subject {
            ScriptValue::Null => {}
            ScriptValue::Map(pulled) => merge_entity(SUBJECT_GLOBAL, object, pushed, pulled)?,
            other => {
                return Err(global_error(
                    SUBJECT_GLOBAL,
                    format!("expected a table, got {}", other.kind()),
                ))
            }
        }
    }

    match host.pull_global(OBJECTS_GLOBAL)? {
        ScriptValue::Null => {}
        ScriptValue::Map(pulled) => {
            for (id, entry) in pulled {
                let (Some(object), Some(pushed)) = (game.objects.get_mut(&id), snapshot.objects.get(&id)) else {
                    log::debug!("ignoring unknown object {id} in global objects");
                    continue;
                };
                let field = format!("{OBJECTS_GLOBAL}.{id}");
                match entry {
                    ScriptValue::Map(table) => merge_entity(&field, object, pushed, table)?,
                    other => return Err(global_error(&field, format!("expected a table, got {}", other.kind()))),
                }
            }
        }
        other => {
            return Err(global_error(
                OBJECTS_GLOBAL,
                format!("expected a table, got {}", other.kind()),
            ))
        }
    }

    Ok(())
}

/// Runs every object's script, then the subject's, and merges the global
/// namespace back. Returns how many scripts ran.
pub fn script_pass(
    host: &ScriptHost,
    game: &mut Game,
    pressed: &BTreeSet<String>,
    rasterizer: &dyn Rasterizer,
) -> Result<usize, EngineError> {
    let snapshot = GlobalSnapshot::capture(game);
    snapshot.push(host, game.debug, pressed)?;

    let mut ran = 0;
    let ids: Vec<String> = game.objects.keys().cloned().collect();
    let targets = ids
        .into_iter()
        .map(Target::Object)
        .chain(std::iter::once(Target::Subject));
    for target in targets {
        let scripted = match &target {
            Target::Subject => game.subject.as_ref().is_some_and(|s| s.script_id.is_some()),
            Target::Object(id) => game.objects.get(id).is_some_and(|o| o.script_id.is_some()),
        };
        if !scripted {
            continue;
        }
        object_script::run_object_script(host, game, &target, rasterizer)?;
        ran += 1;
    }

    merge_globals(host, game, &snapshot)?;
    host.clear_global(INPUT_GLOBAL)?;
    game.relink();
    Ok(ran)
}

impl Session {
    /// Advances the session by one frame with `pressed` as the input sample.
    pub fn tick(&mut self, pressed: &BTreeSet<String>) -> Result<FrameReport, EngineError> {
        let controls = self.input.advance(pressed, &self.config.controls);
        self.frame += 1;

        let mut scripts_ran = 0;
        if !self.game.pause {
            let mut working = self.game.clone();
            scripts_ran = script_pass(&self.host, &mut working, pressed, self.rasterizer.as_ref()).map_err(|err| {
                log::error!("frame {} of game {} aborted: {err}", self.frame, self.game.id);
                err
            })?;
            self.game = working;
        }

        for control in &controls {
            match control {
                ReservedControl::ToggleDebug => self.game.debug = !self.game.debug,
                ReservedControl::Save => self.save()?,
                ReservedControl::Load => {
                    self.load()?;
                    self.game.pause = true;
                }
                ReservedControl::TogglePause => self.game.pause = !self.game.pause,
            }
        }

        let report = FrameReport {
            frame: self.frame,
            paused: self.game.pause,
            scripts_ran,
            controls,
        };
        log::debug!(
            "frame {} of {}: {} scripts, controls {:?}",
            report.frame,
            self.game.id,
            report.scripts_ran,
            report.controls
        );
        Ok(report)
    }
}
