pub mod bytes;
pub mod document;
pub mod game;
pub mod raster;
pub mod value;

pub use game::{
    Audit, DefinitionError, Game, GameLink, GameStatus, Image, ImportStamp, Include, Object,
    Position, PromptExchange, Prompts, Script, Size, SourceTag,
};
pub use raster::{ExtentRasterizer, Raster, RasterError, Rasterizer};
pub use value::ScriptValue;
