//! Game record service: storage, the version chain, repository imports,
//! prompt orchestration and the background sweeps that tie them together.

pub mod chain;
pub mod config;
pub mod error;
pub mod import;
pub mod prompt;
pub mod scheduler;
pub mod service;
pub mod store;

pub use chain::{Derivation, VersionChain};
pub use config::ServiceConfig;
pub use error::{ErrorClass, ServiceError};
pub use import::{
    ContentRepository, DirectoryRepository, EntryRef, ImportReport, ImportSynchronizer,
    MemoryRepository, RepositoryError,
};
pub use prompt::{PromptEngine, PromptError, PromptOrchestrator, PromptReply, PromptRequest, PromptTicket};
pub use scheduler::{SweepSummary, Sweeper};
pub use service::{GameEdit, GameService, ListQuery, Page, SortKey};
pub use store::{AccountState, FileStore, GameStore, MemoryStore, StoreError};
