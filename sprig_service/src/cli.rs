use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Background worker that imports repository games and fails stalled prompts", version)]
pub struct Args {
    /// Directory holding the game store
    #[arg(long, env = "SPRIG_STORE")]
    pub store: PathBuf,

    /// Account to import, as NAME=DIR (repeatable)
    #[arg(long = "account", value_name = "NAME=DIR", value_parser = parse_account)]
    pub accounts: Vec<(String, PathBuf)>,

    /// Service configuration JSON
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run a single sweep, print its summary as JSON, and exit
    #[arg(long)]
    pub once: bool,

    /// Import even when a repository revision was already imported (requires --once)
    #[arg(long)]
    pub force: bool,
}

fn parse_account(raw: &str) -> Result<(String, PathBuf), String> {
    let Some((name, dir)) = raw.split_once('=') else {
        return Err(format!("expected NAME=DIR, got `{raw}`"));
    };
    let name = name.trim();
    if name.is_empty() || dir.trim().is_empty() {
        return Err(format!("expected NAME=DIR, got `{raw}`"));
    }
    Ok((name.to_string(), PathBuf::from(dir)))
}

pub fn parse() -> Result<Args> {
    let args = Args::parse();
    if args.force && !args.once {
        bail!("--force only applies together with --once");
    }
    let mut seen = std::collections::BTreeSet::new();
    for (name, _) in &args.accounts {
        if !seen.insert(name.as_str()) {
            bail!("account {name} is listed more than once");
        }
    }
    Ok(args)
}
