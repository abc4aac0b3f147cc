use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between background sweeps.
    #[serde(default = "ServiceConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Seconds after which an unreleased import marker may be taken over.
    #[serde(default = "ServiceConfig::default_import_staleness_secs")]
    pub import_staleness_secs: u64,
    /// Seconds a record may stay `updating` before the sweep fails it.
    #[serde(default = "ServiceConfig::default_prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,
    #[serde(default = "ServiceConfig::default_max_games_per_account")]
    pub max_games_per_account: usize,
    #[serde(default = "ServiceConfig::default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "ServiceConfig::default_repository_prefix")]
    pub repository_prefix: String,
}

impl ServiceConfig {
    const fn default_sweep_interval_secs() -> u64 {
        60
    }

    const fn default_import_staleness_secs() -> u64 {
        300
    }

    const fn default_prompt_timeout_secs() -> u64 {
        600
    }

    const fn default_max_games_per_account() -> usize {
        100
    }

    const fn default_max_document_bytes() -> usize {
        16 * 1024 * 1024
    }

    fn default_repository_prefix() -> String {
        "games/".to_string()
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn import_staleness(&self) -> time::Duration {
        time::Duration::seconds(self.import_staleness_secs as i64)
    }

    pub fn prompt_timeout(&self) -> time::Duration {
        time::Duration::seconds(self.prompt_timeout_secs as i64)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("reading service config {}", path.display()))?;
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing service config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("service config unavailable ({err:#}); using defaults");
                Self::default()
            }
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: Self::default_sweep_interval_secs(),
            import_staleness_secs: Self::default_import_staleness_secs(),
            prompt_timeout_secs: Self::default_prompt_timeout_secs(),
            max_games_per_account: Self::default_max_games_per_account(),
            max_document_bytes: Self::default_max_document_bytes(),
            repository_prefix: Self::default_repository_prefix(),
        }
    }
}
