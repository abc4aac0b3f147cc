use sprig_formats::{DefinitionError, GameStatus};
use thiserror::Error;

use crate::import::RepositoryError;
use crate::prompt::PromptError;
use crate::store::StoreError;

/// Coarse classification callers use to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Validation,
    NotFound,
    ContractViolation,
    Capacity,
    ExternalDependency,
    SizeLimit,
    Storage,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("game {0} not found")]
    GameNotFound(String),
    #[error("game {id} is {status}; {action} needs an active game")]
    NotActive {
        id: String,
        status: GameStatus,
        action: &'static str,
    },
    #[error("game {id} has nothing to {action}")]
    ChainEnd { id: String, action: &'static str },
    #[error("account {account} already holds {limit} games")]
    Capacity { account: String, limit: usize },
    #[error("an import for account {0} is already running")]
    ImportInProgress(String),
    #[error("no content repository is configured for account {0}")]
    NoRepository(String),
    #[error("prompt collaborator broke its contract: {0}")]
    Collaborator(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Definition(_)
            | ServiceError::Validation(_)
            | ServiceError::NotActive { .. }
            | ServiceError::ChainEnd { .. } => ErrorClass::Validation,
            ServiceError::GameNotFound(_) | ServiceError::NoRepository(_) => ErrorClass::NotFound,
            ServiceError::Collaborator(_) => ErrorClass::ContractViolation,
            ServiceError::Capacity { .. } | ServiceError::ImportInProgress(_) => ErrorClass::Capacity,
            ServiceError::Repository(_) | ServiceError::Prompt(_) => ErrorClass::ExternalDependency,
            ServiceError::Store(StoreError::DocumentTooLarge { .. }) => ErrorClass::SizeLimit,
            ServiceError::Store(_) => ErrorClass::Storage,
        }
    }

    /// Only collaborator outages are worth another attempt, and only on the
    /// next scheduled sweep.
    pub fn is_retryable_next_sweep(&self) -> bool {
        self.class() == ErrorClass::ExternalDependency
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorClass, ServiceError};
    use crate::import::RepositoryError;
    use crate::store::StoreError;

    #[test]
    fn size_limit_is_distinct_from_storage() {
        let too_large = ServiceError::Store(StoreError::DocumentTooLarge {
            id: "g".into(),
            size: 10,
            limit: 5,
        });
        assert_eq!(too_large.class(), ErrorClass::SizeLimit);
        let other = ServiceError::Store(StoreError::InvalidKey("../x".into()));
        assert_eq!(other.class(), ErrorClass::Storage);
    }

    #[test]
    fn only_collaborator_outages_retry() {
        let outage = ServiceError::Repository(RepositoryError::Unavailable("down".into()));
        assert!(outage.is_retryable_next_sweep());
        let capacity = ServiceError::Capacity {
            account: "a".into(),
            limit: 1,
        };
        assert_eq!(capacity.class(), ErrorClass::Capacity);
        assert!(!capacity.is_retryable_next_sweep());
    }
}
