//! JSON definition form of a [`Game`] and the checks applied when a
//! definition is loaded into a playable session.

use crate::game::{DefinitionError, Game};
use crate::raster::Rasterizer;

/// Serializes a game into its exchanged/persisted JSON form.
pub fn encode(game: &Game) -> Result<Vec<u8>, DefinitionError> {
    Ok(serde_json::to_vec_pretty(game)?)
}

/// Parses a definition without applying playability checks.
pub fn decode(bytes: &[u8]) -> Result<Game, DefinitionError> {
    let mut game: Game = serde_json::from_slice(bytes)?;
    game.relink();
    Ok(game)
}

/// Rejects definitions a session cannot run.
pub fn validate_playable(game: &Game) -> Result<(), DefinitionError> {
    if !(game.width > 0.0 && game.height > 0.0) {
        return Err(DefinitionError::Dimensions {
            id: game.id.clone(),
            width: game.width,
            height: game.height,
        });
    }
    if game.subject.is_none() {
        return Err(DefinitionError::MissingSubject {
            id: game.id.clone(),
        });
    }
    if game.objects.is_empty() {
        return Err(DefinitionError::NoObjects {
            id: game.id.clone(),
        });
    }
    game.check_keys()
}

/// Decodes, validates, relinks and re-derives rasters.
pub fn load(bytes: &[u8], rasterizer: &dyn Rasterizer) -> Result<Game, DefinitionError> {
    let mut game = decode(bytes)?;
    validate_playable(&game)?;
    game.derive_rasters(rasterizer)?;
    Ok(game)
}
