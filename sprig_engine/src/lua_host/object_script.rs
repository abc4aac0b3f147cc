use std::collections::BTreeMap;

use mlua::Value;
use sprig_formats::{Game, Include, Object, Rasterizer, ScriptValue};

use super::marshal::{self, MarshalError};
use super::ScriptHost;
use crate::error::EngineError;

/// Keys of the per-object table the host interprets itself. Everything else
/// belongs to the object's persisted data payload.
pub const RECOGNIZED_KEYS: &[&str] = &["id", "name", "x", "y", "z", "r", "width", "height", "hidden"];

/// Channel key carrying the hex-encoded vector source of the object's image.
pub const IMAGE_CHANNEL: &str = "image";

/// Channel key carrying the script's own source text.
pub const SCRIPT_CHANNEL: &str = "script";

/// Which entity of the game a script pass targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Subject,
    Object(String),
}

/// Flattened view of an object as scripts see it.
pub fn object_table(object: &Object) -> BTreeMap<String, ScriptValue> {
    let mut table = object.data.clone();
    table.insert("id".into(), ScriptValue::String(object.id.clone()));
    table.insert("name".into(), ScriptValue::String(object.name.clone()));
    table.insert("x".into(), ScriptValue::Float(object.position.x));
    table.insert("y".into(), ScriptValue::Float(object.position.y));
    if let Some(z) = object.position.z {
        table.insert("z".into(), ScriptValue::Float(z));
    }
    if let Some(r) = object.position.r {
        table.insert("r".into(), ScriptValue::Float(r));
    }
    table.insert("width".into(), ScriptValue::Float(object.size.width));
    table.insert("height".into(), ScriptValue::Float(object.size.height));
    table.insert("hidden".into(), ScriptValue::Bool(object.hidden));
    table
}

/// Writes one recognized field back onto `object`.
///
/// Returns `Ok(false)` when `key` is not a recognized field, and a reason
/// string when the value has the wrong kind.
pub fn apply_recognized(object: &mut Object, key: &str, value: &ScriptValue) -> Result<bool, String> {
    fn number(key: &str, value: &ScriptValue) -> Result<f64, String> {
        value
            .as_f64()
            .ok_or_else(|| format!("field `{key}` must be a number, got {}", value.kind()))
    }

    match key {
        "id" => {}
        "name" => {
            object.name = value
                .as_str()
                .ok_or_else(|| format!("field `name` must be a string, got {}", value.kind()))?
                .to_string();
        }
        "x" => object.position.x = number(key, value)?,
        "y" => object.position.y = number(key, value)?,
        "z" => object.position.z = Some(number(key, value)?),
        "r" => object.position.r = Some(number(key, value)?),
        "width" => object.size.width = number(key, value)?,
        "height" => object.size.height = number(key, value)?,
        "hidden" => {
            object.hidden = value
                .as_bool()
                .ok_or_else(|| format!("field `hidden` must be a boolean, got {}", value.kind()))?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Merges a value into the data payload, keeping the stored value when the
/// two only differ by number representation.
pub fn merge_data(object: &mut Object, key: &str, value: ScriptValue) {
    if let Some(existing) = object.data.get(key) {
        if existing.loosely_eq(&value) {
            return;
        }
    }
    object.data.insert(key.to_string(), value);
}

/// Runs the bound script of one entity and writes its results back into
/// `game`. Entities without a script are left untouched.
pub fn run_object_script(
    host: &ScriptHost,
    game: &mut Game,
    target: &Target,
    rasterizer: &dyn Rasterizer,
) -> Result<(), EngineError> {
    let Game {
        subject,
        objects,
        images,
        scripts,
        ..
    } = game;
    let object = match target {
        Target::Subject => subject.as_mut(),
        Target::Object(id) => objects.get_mut(id),
    };
    let Some(object) = object else {
        return Ok(());
    };
    let Some(script_id) = object.script_id.clone() else {
        return Ok(());
    };
    let object_id = object.id.clone();
    let script = scripts
        .get(&script_id)
        .cloned()
        .ok_or_else(|| EngineError::ScriptNotFound {
            object: object_id.clone(),
            script: script_id.clone(),
        })?;

    let violation = |reason: String| EngineError::ContractViolation {
        object: object_id.clone(),
        script: script_id.clone(),
        reason,
    };

    let wants_image = script.includes(Include::Image);
    let wants_script = script.includes(Include::Script);
    let image_id = match (wants_image, object.image_id.as_ref()) {
        (true, Some(image_id)) => {
            if !images.contains_key(image_id) {
                return Err(EngineError::ImageNotFound {
                    object: object_id.clone(),
                    image: image_id.clone(),
                });
            }
            Some(image_id.clone())
        }
        _ => None,
    };

    let mut args = object_table(object);
    if let Some(image) = image_id.as_ref().and_then(|id| images.get(id)) {
        args.insert(IMAGE_CHANNEL.into(), ScriptValue::String(hex::encode(&image.source)));
    }
    if wants_script {
        args.insert(SCRIPT_CHANNEL.into(), ScriptValue::String(script.source.clone()));
    }

    let site = format!("object {object_id} script {script_id}");
    let returned = {
        let entry = host.bind_entry_point(&script, &object_id)?;
        let table = marshal::push_map(host.lua(), &args)?;
        let result: Value = entry
            .call(table)
            .map_err(|source| EngineError::ScriptFailed {
                object: object_id.clone(),
                script: script_id.clone(),
                source,
            })?;
        marshal::pull_table(result, &site).map_err(|err| match err {
            MarshalError::NotATable { found, .. } => {
                violation(format!("entry point returned {found} instead of a table"))
            }
            other => EngineError::Marshal(other),
        })?
    };

    let mut rewritten_image = None;
    let mut rewritten_source = None;
    for (key, value) in returned {
        if wants_image && key == IMAGE_CHANNEL {
            if image_id.is_some() {
                let text = value
                    .as_str()
                    .ok_or_else(|| violation(format!("image channel must be a string, got {}", value.kind())))?;
                let bytes = hex::decode(text)
                    .map_err(|err| violation(format!("image channel is not valid hex: {err}")))?;
                rewritten_image = Some(bytes);
            }
            continue;
        }
        if wants_script && key == SCRIPT_CHANNEL {
            let text = value
                .as_str()
                .ok_or_else(|| violation(format!("script channel must be a string, got {}", value.kind())))?;
            rewritten_source = Some(text.to_string());
            continue;
        }
        if apply_recognized(object, &key, &value).map_err(violation)? {
            continue;
        }
        merge_data(object, &key, value);
    }

    if let (Some(image_id), Some(bytes)) = (image_id, rewritten_image) {
        if let Some(image) = images.get_mut(&image_id) {
            if image.source != bytes {
                let raster = rasterizer
                    .rasterize(&bytes)
                    .map_err(|source| EngineError::ImageRewrite {
                        image: image_id.clone(),
                        script: script_id.clone(),
                        source,
                    })?;
                image.source = bytes;
                match image.raster.as_mut() {
                    Some(existing) => existing.replace_with(raster),
                    None => image.raster = Some(raster),
                }
                log::debug!("script {script_id} rewrote image {image_id}");
            }
        }
    }

    if let Some(source) = rewritten_source {
        if let Some(stored) = scripts.get_mut(&script_id) {
            if stored.source != source {
                stored.source = source;
                log::debug!("script {script_id} rewrote its own source");
            }
        }
    }

    Ok(())
}
