use std::collections::BTreeMap;
use std::fs;

use sprig_formats::document::{encode, load};
use sprig_formats::{
    Audit, ExtentRasterizer, Game, GameStatus, Image, Include, Object, PromptExchange, Script,
    ScriptValue,
};
use tempfile::tempdir;
use time::macros::datetime;

fn two_object_game() -> Game {
    let mut game = Game::new("g-42", "Rock Garden");
    game.description = "a sprite pushes rocks around".into();
    game.icon = br#"<svg width="16" height="16"/>"#.to_vec();
    game.width = 640.0;
    game.height = 480.0;
    game.status = GameStatus::Active;
    game.commit = Some("abc123".into());
    game.audit = Audit::created("alice", datetime!(2026-03-01 12:30:00.25 UTC));
    game.prompts.history.push(PromptExchange {
        prompt: "add a rock".into(),
        response: "added".into(),
        thinking: String::new(),
    });

    let mut hero = Object::new("hero");
    hero.position.x = 10.0;
    hero.position.y = 20.5;
    hero.size.width = 8.0;
    hero.size.height = 8.0;
    game.subject = Some(hero);

    let mut rock = Object::new("rock");
    rock.position.z = Some(1.0);
    rock.image_id = Some("rock-art".into());
    rock.script_id = Some("roll".into());
    rock.data.insert("speed".into(), ScriptValue::Float(2.0));
    rock.data.insert(
        "path".into(),
        ScriptValue::List(vec![ScriptValue::Int(1), ScriptValue::Int(2)]),
    );
    game.insert_object(rock);

    let mut pebble = Object::new("pebble");
    pebble.hidden = true;
    let mut nested = BTreeMap::new();
    nested.insert("label".into(), ScriptValue::String("tiny".into()));
    pebble.data.insert("meta".into(), ScriptValue::Map(nested));
    game.insert_object(pebble);

    game.insert_image(Image {
        id: "rock-art".into(),
        name: "rock".into(),
        source: br#"<svg viewBox="0 0 12 12"><circle r="6"/></svg>"#.to_vec(),
        raster: None,
    });
    game.insert_script(Script {
        id: "roll".into(),
        name: "roll".into(),
        source: "function update(t) t.x = t.x + 1 return t end".into(),
        includes: vec![Include::Image],
    });
    game
}

#[test]
fn save_then_load_reproduces_every_field() {
    let original = two_object_game();
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("game.json");

    let first = encode(&original).expect("encode");
    fs::write(&path, &first).expect("write");
    let bytes = fs::read(&path).expect("read");
    let loaded = load(&bytes, &ExtentRasterizer).expect("load");

    let second = encode(&loaded).expect("re-encode");
    assert_eq!(first, second, "definition bytes changed across save/load");

    let raster = loaded.images["rock-art"]
        .raster
        .as_ref()
        .expect("raster derived on load");
    assert_eq!((raster.width, raster.height), (12, 12));
    assert_eq!(loaded.objects["rock"].owner(), Some("g-42"));
    assert_eq!(loaded.objects["rock"].data["speed"], ScriptValue::Float(2.0));
}
