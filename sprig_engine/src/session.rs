use sprig_formats::{document, ExtentRasterizer, Game, Rasterizer};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::input::InputTracker;
use crate::lua_host::ScriptHost;
use crate::persistence::Persistence;

/// One running game: its definition, the interpreter bound to it and the
/// adapter it saves through.
pub struct Session {
    pub(crate) game: Game,
    pub(crate) host: ScriptHost,
    pub(crate) persistence: Box<dyn Persistence>,
    pub(crate) config: EngineConfig,
    pub(crate) rasterizer: Box<dyn Rasterizer>,
    pub(crate) input: InputTracker,
    pub(crate) frame: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("game", &self.game.id)
            .field("persistence", &self.persistence.describe())
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(game: Game, persistence: Box<dyn Persistence>, config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_rasterizer(game, persistence, config, Box::new(ExtentRasterizer))
    }

    pub fn with_rasterizer(
        game: Game,
        persistence: Box<dyn Persistence>,
        config: EngineConfig,
        rasterizer: Box<dyn Rasterizer>,
    ) -> Result<Self, EngineError> {
        let game = prepare(game, rasterizer.as_ref())?;
        let host = ScriptHost::new(&config.entry_point)?;
        Ok(Session {
            game,
            host,
            persistence,
            config,
            rasterizer,
            input: InputTracker::new(),
            frame: 0,
        })
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of frames ticked so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_paused(&self) -> bool {
        self.game.pause
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.game.pause = paused;
    }

    pub fn save(&self) -> Result<(), EngineError> {
        self.persistence.save(&self.game)?;
        Ok(())
    }

    /// Re-reads the definition through the persistence adapter.
    ///
    /// On any failure the running game and interpreter stay as they were.
    pub fn load(&mut self) -> Result<(), EngineError> {
        let fetched = self.persistence.load(&self.game.id).map_err(|err| {
            log::error!("loading game {} from {} failed: {err}", self.game.id, self.persistence.describe());
            err
        })?;
        self.replace(fetched)?;
        log::info!("reloaded game {} from {}", self.game.id, self.persistence.describe());
        Ok(())
    }

    /// Swaps in a new definition with a fresh interpreter.
    pub fn replace(&mut self, game: Game) -> Result<(), EngineError> {
        let game = prepare(game, self.rasterizer.as_ref())?;
        let host = ScriptHost::new(&self.config.entry_point)?;
        self.game = game;
        self.host = host;
        Ok(())
    }

    pub fn into_game(self) -> Game {
        self.game
    }
}

fn prepare(mut game: Game, rasterizer: &dyn Rasterizer) -> Result<Game, EngineError> {
    document::validate_playable(&game)?;
    game.relink();
    game.derive_rasters(rasterizer)?;
    Ok(game)
}
