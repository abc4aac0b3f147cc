//! Embedded Lua host for sprig games: value marshaling, per-object script
//! execution, the frame loop and the persistence adapter.

pub mod config;
pub mod error;
pub mod frame;
pub mod input;
pub mod lua_host;
pub mod persistence;
pub mod session;

pub use config::{ControlBindings, EngineConfig};
pub use error::EngineError;
pub use frame::FrameReport;
pub use input::{pressed_set, InputTracker, KeyCombo, ReservedControl};
pub use lua_host::ScriptHost;
pub use persistence::{LocalFile, Persistence, PersistenceError, RemoteEndpoint, RemoteSettings};
pub use session::Session;
