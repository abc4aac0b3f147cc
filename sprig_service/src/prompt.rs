//! AI-assisted revisions. A prompt derives an `updating` record right away
//! and hands the collaborator call to a detached blocking task; callers
//! poll the record's status to see the outcome.

use std::sync::Arc;

use sprig_formats::{document, Game, GameStatus, PromptExchange, SourceTag};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::chain::{Derivation, VersionChain};
use crate::error::ServiceError;
use crate::store::GameStore;

/// Actor recorded when a prompt completion lands.
pub const PROMPT_ACTOR: &str = "prompt";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("prompt collaborator rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    /// The definition the prompt applies to.
    pub game: Game,
    pub prompt: String,
    /// Earlier exchanges, oldest first.
    pub history: Vec<PromptExchange>,
}

#[derive(Debug, Clone)]
pub struct PromptReply {
    pub definition: Game,
    pub response: String,
    pub thinking: String,
}

/// Collaborator that turns a definition plus a prompt into a new definition.
pub trait PromptEngine: Send + Sync {
    fn complete(&self, request: &PromptRequest) -> Result<PromptReply, PromptError>;
}

/// Returned by [`PromptOrchestrator::submit`].
#[derive(Debug)]
pub struct PromptTicket {
    /// The new `updating` record.
    pub game: Game,
    /// Background completion, when a runtime was available to host it.
    pub task: Option<JoinHandle<()>>,
}

pub struct PromptOrchestrator {
    store: Arc<dyn GameStore>,
    engine: Arc<dyn PromptEngine>,
}

impl PromptOrchestrator {
    pub fn new(store: Arc<dyn GameStore>, engine: Arc<dyn PromptEngine>) -> Self {
        PromptOrchestrator { store, engine }
    }

    pub fn submit(&self, game_id: &str, prompt: &str, actor: &str, now: OffsetDateTime) -> Result<PromptTicket, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ServiceError::Validation("prompt text is empty".into()));
        }
        let chain = VersionChain::new(self.store.as_ref());
        let game = chain.derive(game_id, Derivation::Prompt, actor, now, |next| {
            let previous = std::mem::take(&mut next.prompts.current);
            if !previous.is_empty() {
                next.prompts.history.push(previous);
            }
            next.prompts.current.prompt = prompt.to_string();
            next.prompts.error = None;
            Ok(())
        })?;

        let request = PromptRequest {
            game: game.clone(),
            prompt: prompt.to_string(),
            history: game.prompts.history.clone(),
        };
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let id = game.id.clone();
        let task = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(move || {
                complete(store.as_ref(), engine.as_ref(), &id, &request, OffsetDateTime::now_utc())
            })),
            Err(_) => {
                log::debug!("no async runtime; completing prompt for {id} inline");
                complete(store.as_ref(), engine.as_ref(), &id, &request, OffsetDateTime::now_utc());
                None
            }
        };
        log::info!("prompt submitted for {game_id}; pending as {}", game.id);
        Ok(PromptTicket { game, task })
    }
}

/// Runs the collaborator and records its outcome on the pending record.
///
/// Failures are logged; the record's status carries them to callers.
pub fn complete(
    store: &dyn GameStore,
    engine: &dyn PromptEngine,
    id: &str,
    request: &PromptRequest,
    now: OffsetDateTime,
) {
    let outcome = engine.complete(request);
    if let Err(err) = apply_outcome(store, id, outcome, now) {
        log::error!("recording prompt outcome for {id} failed: {err}");
    }
}

fn apply_outcome(
    store: &dyn GameStore,
    id: &str,
    outcome: Result<PromptReply, PromptError>,
    now: OffsetDateTime,
) -> Result<(), ServiceError> {
    let Some(mut record) = store.get(id)? else {
        log::warn!("prompt finished for {id}, but the record is gone");
        return Ok(());
    };
    if record.status != GameStatus::Updating {
        log::warn!("prompt finished for {id}, but it is now {}; discarding", record.status);
        return Ok(());
    }

    let reply = outcome.map_err(ServiceError::from).and_then(|reply| {
        document::validate_playable(&reply.definition)
            .map_err(|err| ServiceError::Collaborator(format!("returned an unplayable definition: {err}")))?;
        Ok(reply)
    });

    match reply {
        Ok(reply) => {
            record.adopt_content(&reply.definition);
            record.prompts.current.response = reply.response;
            record.prompts.current.thinking = reply.thinking;
            record.prompts.error = None;
            record.source = SourceTag::AiDerived;
            record.transition(GameStatus::Active)?;
            log::info!("prompt for {id} completed");
        }
        Err(err) => {
            record.prompts.error = Some(err.to_string());
            record.transition(GameStatus::Error)?;
            log::warn!("prompt for {id} failed: {err}");
        }
    }
    record.audit.touch(PROMPT_ACTOR, now);
    store.put(&record)?;
    Ok(())
}
