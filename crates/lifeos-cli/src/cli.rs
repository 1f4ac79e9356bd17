use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lifeos_core::sync::ConflictStrategy;
use lifeos_core::HttpMethod;

#[derive(Parser)]
#[command(name = "lifeos")]
#[command(about = "Inspect and drive the LifeOS offline sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// API origin (overrides LIFEOS_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Session bearer token (overrides LIFEOS_AUTH_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

impl Cli {
    pub fn api_overrides(&self) -> ApiOverrides {
        ApiOverrides {
            api_url: self.api_url.clone(),
            token: self.token.clone(),
        }
    }
}

/// Command-line values that take precedence over `LIFEOS_*` variables
#[derive(Debug, Clone, Default)]
pub struct ApiOverrides {
    pub api_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or modify the offline mutation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Send a mutation now, queueing it if the API cannot be reached
    Send {
        #[command(flatten)]
        mutation: MutationArgs,
    },
    /// Resolve a conflict between a local and a server entity
    Resolve {
        /// JSON file with the local copy
        local: PathBuf,
        /// JSON file with the server copy
        server: PathBuf,
        #[arg(long, value_enum, default_value_t = StrategyArg::Lww)]
        strategy: StrategyArg,
    },
    /// Report whether two copies of an entity conflict
    Conflict {
        /// JSON file with the local copy
        local: PathBuf,
        /// JSON file with the server copy
        server: PathBuf,
    },
    /// Print cache invalidations received from the realtime stream
    Watch,
    /// Run the sync daemon until interrupted
    Run,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending mutations in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a mutation without contacting the API
    Add {
        #[command(flatten)]
        mutation: MutationArgs,
    },
    /// Replay pending mutations against the API
    Drain {
        /// Stop at the first failed replay
        #[arg(long)]
        stop_on_error: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one pending mutation
    Remove {
        /// Queue item ID or unique ID prefix
        id: String,
    },
    /// Remove every pending mutation
    Clear,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MutationArgs {
    /// API path, e.g. /api/tasks/12
    #[arg(long, value_name = "PATH")]
    pub endpoint: String,
    #[arg(long, value_enum)]
    pub method: MethodArg,
    /// JSON request body
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum MethodArg {
    Post,
    Put,
    Patch,
    Delete,
}

impl From<MethodArg> for HttpMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Post => Self::Post,
            MethodArg::Put => Self::Put,
            MethodArg::Patch => Self::Patch,
            MethodArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    /// Last write wins
    Lww,
    /// Overlay newer local fields onto the server copy
    Merge,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Lww => Self::LastWriteWins,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
