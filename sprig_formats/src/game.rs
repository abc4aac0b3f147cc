use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::bytes::base64_bytes;
use crate::raster::{Raster, RasterError, Rasterizer};
use crate::value::ScriptValue;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("definition JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("game {id} must have positive dimensions (got {width}x{height})")]
    Dimensions { id: String, width: f64, height: f64 },
    #[error("game {id} has no subject")]
    MissingSubject { id: String },
    #[error("game {id} has no objects")]
    NoObjects { id: String },
    #[error("{kind} map entry {key} holds an entity with id {id}")]
    KeyMismatch {
        kind: &'static str,
        key: String,
        id: String,
    },
    #[error("game {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: GameStatus,
        to: GameStatus,
    },
    #[error("image {image} could not be rasterized: {source}")]
    Raster {
        image: String,
        #[source]
        source: RasterError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    New,
    Active,
    Inactive,
    Updating,
    Error,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::New => "new",
            GameStatus::Active => "active",
            GameStatus::Inactive => "inactive",
            GameStatus::Updating => "updating",
            GameStatus::Error => "error",
        }
    }

    pub fn can_transition_to(self, next: GameStatus) -> bool {
        use GameStatus::*;
        matches!(
            (self, next),
            (New, Active)
                | (New, Updating)
                | (Updating, Active)
                | (Updating, Error)
                | (Active, Inactive)
                | (Active, Error)
                | (Active, Updating)
                | (Inactive, Active)
                | (Error, Inactive)
        )
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    #[default]
    Authored,
    Imported,
    AiDerived,
}

/// Auxiliary channels a script may see and rewrite each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Include {
    Image,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Non-owning handle from an entity back to the game that holds it.
#[derive(Debug, Clone)]
pub struct GameLink(String);

impl GameLink {
    pub fn game_id(&self) -> &str {
        &self.0
    }
}

// Links are bookkeeping, never content.
impl PartialEq for GameLink {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Object {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, ScriptValue>,
    #[serde(skip)]
    link: Option<GameLink>,
}

impl Object {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Object {
            name: id.clone(),
            id,
            ..Object::default()
        }
    }

    /// Id of the owning game, once [`Game::relink`] has run.
    pub fn owner(&self) -> Option<&str> {
        self.link.as_ref().map(GameLink::game_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "base64_bytes", default)]
    pub source: Vec<u8>,
    #[serde(skip)]
    pub raster: Option<Raster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub includes: Vec<Include>,
}

impl Script {
    pub fn includes(&self, channel: Include) -> bool {
        self.includes.contains(&channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PromptExchange {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub thinking: String,
}

impl PromptExchange {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty() && self.response.is_empty() && self.thinking.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Prompts {
    #[serde(default)]
    pub current: PromptExchange,
    #[serde(default)]
    pub history: Vec<PromptExchange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provenance of a record mirrored from a content repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStamp {
    pub path: String,
    pub entry_revision: String,
    pub repository_revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Audit {
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Audit {
    pub fn created(actor: &str, now: OffsetDateTime) -> Self {
        Audit {
            created_at: Some(now),
            created_by: Some(actor.to_string()),
            updated_at: Some(now),
            updated_by: Some(actor.to_string()),
        }
    }

    pub fn touch(&mut self, actor: &str, now: OffsetDateTime) {
        self.updated_at = Some(now);
        self.updated_by = Some(actor.to_string());
    }
}

/// Top-level versioned game definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Game {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(with = "base64_bytes", default)]
    pub icon: Vec<u8>,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub pause: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub source: SourceTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Object>,
    #[serde(default)]
    pub objects: BTreeMap<String, Object>,
    #[serde(default)]
    pub images: BTreeMap<String, Image>,
    #[serde(default)]
    pub scripts: BTreeMap<String, Script>,
    #[serde(default)]
    pub prompts: Prompts,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub audit: Audit,
}

impl Game {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Game {
            id: id.into(),
            name: name.into(),
            ..Game::default()
        }
    }

    /// Fresh random record id.
    pub fn fresh_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn insert_object(&mut self, object: Object) {
        self.objects.insert(object.id.clone(), object);
    }

    pub fn insert_image(&mut self, image: Image) {
        self.images.insert(image.id.clone(), image);
    }

    pub fn insert_script(&mut self, script: Script) {
        self.scripts.insert(script.id.clone(), script);
    }

    /// Re-establishes every entity's back-reference to this game.
    pub fn relink(&mut self) {
        let link = GameLink(self.id.clone());
        if let Some(subject) = self.subject.as_mut() {
            subject.link = Some(link.clone());
        }
        for object in self.objects.values_mut() {
            object.link = Some(link.clone());
        }
    }

    /// Rebuilds every image raster from its vector source.
    pub fn derive_rasters(&mut self, rasterizer: &dyn Rasterizer) -> Result<(), DefinitionError> {
        for image in self.images.values_mut() {
            let raster =
                rasterizer
                    .rasterize(&image.source)
                    .map_err(|source| DefinitionError::Raster {
                        image: image.id.clone(),
                        source,
                    })?;
            image.raster = Some(raster);
        }
        Ok(())
    }

    /// Checks that every map key equals the id of the entity it holds.
    pub fn check_keys(&self) -> Result<(), DefinitionError> {
        fn check<'a>(
            kind: &'static str,
            entries: impl Iterator<Item = (&'a String, &'a str)>,
        ) -> Result<(), DefinitionError> {
            for (key, id) in entries {
                if key != id {
                    return Err(DefinitionError::KeyMismatch {
                        kind,
                        key: key.clone(),
                        id: id.to_string(),
                    });
                }
            }
            Ok(())
        }
        check("object", self.objects.iter().map(|(k, o)| (k, o.id.as_str())))?;
        check("image", self.images.iter().map(|(k, i)| (k, i.id.as_str())))?;
        check("script", self.scripts.iter().map(|(k, s)| (k, s.id.as_str())))
    }

    /// Moves the record along the status machine.
    pub fn transition(&mut self, next: GameStatus) -> Result<(), DefinitionError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DefinitionError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Copies the authorable content of `other` into this record, leaving
    /// identity, lineage, ownership and bookkeeping untouched.
    pub fn adopt_content(&mut self, other: &Game) {
        self.name = other.name.clone();
        self.description = other.description.clone();
        self.icon = other.icon.clone();
        self.width = other.width;
        self.height = other.height;
        self.debug = other.debug;
        self.pause = other.pause;
        self.subject = other.subject.clone();
        self.objects = other.objects.clone();
        self.images = other.images.clone();
        self.scripts = other.scripts.clone();
        self.relink();
    }

    /// Compares the authorable content of two records, ignoring ids.
    pub fn same_content(&self, other: &Game) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.icon == other.icon
            && self.width == other.width
            && self.height == other.height
            && self.subject == other.subject
            && self.objects == other.objects
            && self.scripts == other.scripts
            && self.images.len() == other.images.len()
            && self
                .images
                .iter()
                .zip(&other.images)
                .all(|((ka, a), (kb, b))| ka == kb && a.name == b.name && a.source == b.source)
    }
}

#[cfg(test)]
mod tests {
    use super::{DefinitionError, Game, GameStatus, Image, Include, Object, Script};
    use crate::raster::ExtentRasterizer;

    #[test]
    fn relink_points_entities_at_owner() {
        let mut game = Game::new("g1", "demo");
        game.subject = Some(Object::new("hero"));
        game.insert_object(Object::new("rock"));
        assert_eq!(game.objects["rock"].owner(), None);
        game.relink();
        assert_eq!(game.objects["rock"].owner(), Some("g1"));
        assert_eq!(game.subject.as_ref().and_then(Object::owner), Some("g1"));
    }

    #[test]
    fn key_mismatch_is_reported() {
        let mut game = Game::new("g1", "demo");
        game.objects.insert("a".into(), Object::new("b"));
        let err = game.check_keys().expect_err("mismatch detected");
        assert!(matches!(err, DefinitionError::KeyMismatch { kind: "object", .. }));
    }

    #[test]
    fn status_machine_rejects_shortcuts() {
        let mut game = Game::new("g1", "demo");
        game.transition(GameStatus::Active).expect("new -> active");
        game.transition(GameStatus::Inactive).expect("active -> inactive");
        game.transition(GameStatus::Active).expect("inactive -> active");
        let err = game
            .transition(GameStatus::New)
            .expect_err("active -> new is not allowed");
        assert!(matches!(err, DefinitionError::InvalidTransition { .. }));
        assert!(!GameStatus::Inactive.can_transition_to(GameStatus::Error));
        assert!(GameStatus::Error.can_transition_to(GameStatus::Inactive));
    }

    #[test]
    fn rasters_are_derived_not_serialized() {
        let mut game = Game::new("g1", "demo");
        game.insert_image(Image {
            id: "sprite".into(),
            name: "sprite".into(),
            source: br#"<svg width="4" height="2"></svg>"#.to_vec(),
            raster: None,
        });
        game.derive_rasters(&ExtentRasterizer).expect("rasters");
        let raster = game.images["sprite"].raster.as_ref().expect("raster set");
        assert_eq!((raster.width, raster.height), (4, 2));

        let text = serde_json::to_string(&game).expect("serialize");
        assert!(!text.contains("raster"));
        let back: Game = serde_json::from_str(&text).expect("parse");
        assert!(back.images["sprite"].raster.is_none());
    }

    #[test]
    fn includes_parse_from_lowercase_names() {
        let script: Script =
            serde_json::from_str(r#"{"id": "s", "source": "", "includes": ["image", "script"]}"#)
                .expect("script parses");
        assert!(script.includes(Include::Image));
        assert!(script.includes(Include::Script));
    }

    #[test]
    fn same_content_ignores_identity() {
        let mut a = Game::new("a", "demo");
        a.width = 10.0;
        a.insert_object(Object::new("rock"));
        let mut b = Game::new("b", "other");
        b.previous_id = Some("a".into());
        b.adopt_content(&a);
        assert!(a.same_content(&b));
        b.width = 11.0;
        assert!(!a.same_content(&b));
    }
}
