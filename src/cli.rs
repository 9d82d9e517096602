use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "watchstate",
    version,
    about = "Keep favorites and play progress in sync across every open view"
)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Sqlite,
    Remote,
    Memory,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    #[arg(long, value_enum, env = "WATCHSTATE_BACKEND", default_value_t = BackendKind::Sqlite, global = true)]
    pub backend: BackendKind,

    /// SQLite database file (sqlite backend).
    #[arg(long, env = "WATCHSTATE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Base URL of the record service (remote backend).
    #[arg(long, env = "WATCHSTATE_REMOTE_URL", global = true)]
    pub remote_url: Option<String>,

    #[arg(long, default_value_t = 5000, global = true)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = 2, global = true)]
    pub attempts: usize,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Favorite a title, or refresh its metadata.
    Add(AddArgs),
    /// Un-favorite a title.
    Remove { source: String, id: String },
    /// Remove every favorite. Play progress is kept.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Record the current episode of a title.
    Progress {
        source: String,
        id: String,
        episode: u32,
    },
    /// Drop the play-progress record of a title.
    Forget { source: String, id: String },
    List {
        #[arg(long)]
        json: bool,
    },
    Tui,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    pub source: String,
    pub id: String,
    #[arg(long)]
    pub title: String,
    #[arg(long, default_value_t = 1)]
    pub episodes: u32,
    #[arg(long, default_value = "")]
    pub poster: String,
    /// Display name of the source; defaults to the source key.
    #[arg(long)]
    pub source_name: Option<String>,
    #[arg(long)]
    pub year: Option<String>,
    #[arg(long)]
    pub search_title: Option<String>,
}
