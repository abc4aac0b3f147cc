use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use sprig_engine::RemoteSettings;

#[derive(Parser, Debug)]
#[command(about = "Headless runner that ticks a sprig game definition", version)]
pub struct Args {
    /// Game definition JSON to run
    #[arg(long)]
    pub game: Option<PathBuf>,

    /// Id of a game to fetch from the remote endpoint instead of --game
    #[arg(long, value_name = "ID")]
    pub remote_id: Option<String>,

    /// Base URL of the backing service
    #[arg(long, env = "SPRIG_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Bearer token for the backing service
    #[arg(long, env = "SPRIG_REMOTE_TOKEN", hide_env_values = true)]
    pub remote_token: Option<String>,

    /// Account the remote requests act for
    #[arg(long, env = "SPRIG_ACCOUNT")]
    pub account: Option<String>,

    /// Request timeout for the remote endpoint, in seconds
    #[arg(long, default_value_t = 30)]
    pub remote_timeout: u64,

    /// Engine configuration JSON (control bindings, entry point)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of frames to tick
    #[arg(long, default_value_t = 1)]
    pub frames: u64,

    /// JSON array with one pressed-key array per frame
    #[arg(long)]
    pub input_plan: Option<PathBuf>,

    /// File a save control writes to (defaults to --game)
    #[arg(long)]
    pub save_path: Option<PathBuf>,

    /// Path to write the final definition JSON
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Path to write the per-frame run summary as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug)]
pub enum GameSource {
    Local { path: PathBuf, save_path: PathBuf },
    Remote { id: String, settings: RemoteSettings },
}

#[derive(Debug)]
pub struct RunArgs {
    pub source: GameSource,
    pub config: Option<PathBuf>,
    pub frames: u64,
    pub input_plan: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

pub fn parse() -> Result<RunArgs> {
    Args::parse().into_run_args()
}

impl Args {
    fn into_run_args(self) -> Result<RunArgs> {
        let source = match (self.game, self.remote_id) {
            (Some(_), Some(_)) => bail!("--game and --remote-id are mutually exclusive"),
            (None, None) => bail!("one of --game or --remote-id is required"),
            (Some(path), None) => {
                let save_path = self.save_path.unwrap_or_else(|| path.clone());
                GameSource::Local { path, save_path }
            }
            (None, Some(id)) => {
                if self.save_path.is_some() {
                    bail!("--save-path only applies to --game");
                }
                let Some(base_url) = self.remote_url else {
                    bail!("--remote-id requires --remote-url or SPRIG_REMOTE_URL");
                };
                let Some(token) = self.remote_token else {
                    bail!("--remote-id requires --remote-token or SPRIG_REMOTE_TOKEN");
                };
                let Some(account) = self.account else {
                    bail!("--remote-id requires --account or SPRIG_ACCOUNT");
                };
                GameSource::Remote {
                    id,
                    settings: RemoteSettings {
                        base_url,
                        token,
                        account,
                        timeout: Duration::from_secs(self.remote_timeout),
                    },
                }
            }
        };

        Ok(RunArgs {
            source,
            config: self.config,
            frames: self.frames,
            input_plan: self.input_plan,
            output: self.output,
            summary_json: self.summary_json,
        })
    }
}
