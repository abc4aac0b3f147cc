//! Background sweeps: per-account imports and the prompt timeout safety net.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use sprig_formats::GameStatus;
use time::OffsetDateTime;
use tokio::task::JoinSet;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::import::{ContentRepository, ImportReport, ImportSynchronizer};
use crate::prompt::PROMPT_ACTOR;
use crate::store::GameStore;

/// Takes the import marker for `account` unless another run holds a fresh one.
///
/// The read and the write are separate store calls, so two processes racing
/// inside the same instant may both win; the marker only bounds how long a
/// crashed run can block the account.
pub fn claim_import(
    store: &dyn GameStore,
    account: &str,
    now: OffsetDateTime,
    staleness: time::Duration,
) -> Result<bool, ServiceError> {
    let mut state = store.account(account)?;
    if let Some(started) = state.import_started_at {
        if now - started < staleness {
            return Ok(false);
        }
        log::warn!("import marker for {account} from {started} is stale; taking over");
    }
    state.import_started_at = Some(now);
    store.put_account(&state)?;
    Ok(true)
}

pub fn release_import(store: &dyn GameStore, account: &str) -> Result<(), ServiceError> {
    let mut state = store.account(account)?;
    state.import_started_at = None;
    store.put_account(&state)?;
    Ok(())
}

/// Claims the marker, synchronizes, and releases the marker again.
pub fn run_import(
    store: &dyn GameStore,
    repository: &dyn ContentRepository,
    config: &ServiceConfig,
    account: &str,
    force: bool,
    now: OffsetDateTime,
) -> Result<ImportReport, ServiceError> {
    if !claim_import(store, account, now, config.import_staleness())? {
        return Err(ServiceError::ImportInProgress(account.to_string()));
    }
    let synchronizer = ImportSynchronizer::new(
        store,
        repository,
        &config.repository_prefix,
        config.max_games_per_account,
    );
    let result = synchronizer.sync(account, force, now);
    if let Err(err) = release_import(store, account) {
        log::error!("releasing import marker for {account} failed: {err}");
    }
    result
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub imports: Vec<ImportReport>,
    /// Accounts whose import failed, with the failure text.
    pub failures: BTreeMap<String, String>,
    pub timed_out: usize,
}

pub struct Sweeper {
    store: Arc<dyn GameStore>,
    repositories: BTreeMap<String, Arc<dyn ContentRepository>>,
    config: ServiceConfig,
    force: bool,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn GameStore>,
        repositories: BTreeMap<String, Arc<dyn ContentRepository>>,
        config: ServiceConfig,
    ) -> Self {
        Sweeper {
            store,
            repositories,
            config,
            force: false,
        }
    }

    /// Makes the import sweeps ignore the recorded repository revision.
    pub fn forcing(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// One import task per account, fanned out and joined. Failures are
    /// logged and collected, never returned.
    pub async fn sweep_imports(&self, now: OffsetDateTime) -> SweepSummary {
        let mut tasks = JoinSet::new();
        for (account, repository) in &self.repositories {
            let store = Arc::clone(&self.store);
            let repository = Arc::clone(repository);
            let config = self.config.clone();
            let account = account.clone();
            let force = self.force;
            tasks.spawn_blocking(move || {
                let result = run_import(store.as_ref(), repository.as_ref(), &config, &account, force, now);
                (account, result.map_err(|err| err.to_string()))
            });
        }

        let mut summary = SweepSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => summary.imports.push(report),
                Ok((account, Err(message))) => {
                    log::warn!("scheduled import for {account} failed: {message}");
                    summary.failures.insert(account, message);
                }
                Err(err) => log::error!("import task panicked or was cancelled: {err}"),
            }
        }
        summary.imports.sort_by(|a, b| a.account.cmp(&b.account));
        summary
    }

    /// Fails every `updating` record whose last touch is older than the
    /// prompt timeout. Returns how many records were failed.
    pub fn sweep_timeouts(&self, now: OffsetDateTime) -> Result<usize, ServiceError> {
        let timeout = self.config.prompt_timeout();
        let mut failed = 0;
        for mut record in self.store.records()? {
            if record.status != GameStatus::Updating {
                continue;
            }
            let Some(since) = record.audit.updated_at.or(record.audit.created_at) else {
                continue;
            };
            if now - since <= timeout {
                continue;
            }
            record.transition(GameStatus::Error)?;
            record.prompts.error = Some(format!(
                "prompt timed out after {} seconds",
                self.config.prompt_timeout_secs
            ));
            record.audit.touch(PROMPT_ACTOR, now);
            self.store.put(&record)?;
            log::warn!("prompt for {} timed out", record.id);
            failed += 1;
        }
        Ok(failed)
    }

    pub async fn sweep(&self, now: OffsetDateTime) -> SweepSummary {
        let mut summary = self.sweep_imports(now).await;
        match self.sweep_timeouts(now) {
            Ok(count) => summary.timed_out = count,
            Err(err) => log::error!("timeout sweep failed: {err}"),
        }
        summary
    }

    /// Sweeps on the configured interval until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    let summary = self.sweep(OffsetDateTime::now_utc()).await;
                    log::info!(
                        "sweep: {} imports, {} failed, {} prompts timed out",
                        summary.imports.len(),
                        summary.failures.len(),
                        summary.timed_out
                    );
                }
            }
        }
    }
}
