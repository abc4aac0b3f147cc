use sprig_formats::{DefinitionError, RasterError};
use thiserror::Error;

use crate::lua_host::marshal::MarshalError;
use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("script runtime error: {0}")]
    Lua(#[from] mlua::Error),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("object {object} references missing script {script}")]
    ScriptNotFound { object: String, script: String },
    #[error("object {object} references missing image {image}")]
    ImageNotFound { object: String, image: String },
    #[error("script {script} on object {object} broke the entry point contract: {reason}")]
    ContractViolation {
        object: String,
        script: String,
        reason: String,
    },
    #[error("global `{field}` written by the script pass is unusable: {reason}")]
    GlobalContract { field: String, reason: String },
    #[error("script {script} on object {object} failed: {source}")]
    ScriptFailed {
        object: String,
        script: String,
        #[source]
        source: mlua::Error,
    },
    #[error("image {image} rewritten by script {script} could not be rasterized: {source}")]
    ImageRewrite {
        image: String,
        script: String,
        #[source]
        source: RasterError,
    },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// Whether the error is a script contract violation that aborted a frame.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            EngineError::ContractViolation { .. }
                | EngineError::GlobalContract { .. }
                | EngineError::Marshal(MarshalError::NotATable { .. })
        )
    }
}
