use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sprig_service::{ContentRepository, DirectoryRepository, FileStore, GameStore, ServiceConfig, Sweeper};
use time::OffsetDateTime;

use crate::cli::Args;

pub async fn execute(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let store: Arc<dyn GameStore> = Arc::new(
        FileStore::open(&args.store, config.max_document_bytes)
            .with_context(|| format!("opening game store {}", args.store.display()))?,
    );
    let repositories: BTreeMap<String, Arc<dyn ContentRepository>> = args
        .accounts
        .iter()
        .map(|(name, dir)| {
            let repository: Arc<dyn ContentRepository> = Arc::new(DirectoryRepository::new(dir));
            (name.clone(), repository)
        })
        .collect();
    log::info!(
        "serving store {} with {} account repositories",
        args.store.display(),
        repositories.len()
    );

    if !args.once {
        let sweeper = Sweeper::new(store, repositories, config);
        sweeper
            .run(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    log::error!("listening for ctrl-c failed: {err}");
                }
            })
            .await;
        return Ok(());
    }

    let summary = Sweeper::new(store, repositories, config)
        .forcing(args.force)
        .sweep(OffsetDateTime::now_utc())
        .await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
