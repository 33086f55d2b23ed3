use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod check;
pub mod schema;

use check::CheckArgs;
use schema::SchemaArgs;

use cellflow::config::RuntimeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "cellflow",
    about = "Inspect statically wired cell graphs",
    version
)]
pub struct Cli {
    /// .env file with CELLFLOW_* settings
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Overrides CELLFLOW_LOG_LEVEL
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and resolve a model, listing every wiring issue
    Check(CheckArgs),

    /// Emit the JSON schema of the model format
    Schema(SchemaArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub config: RuntimeConfig,
}

impl CliContext {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Check(args) => check::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
    }
}
