use clap::Parser;

use cellflow::{config::RuntimeConfig, logger::init_tracing};

mod cli;

use cli::{Cli, CliContext, execute};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env(Some(cli.env_file.as_path()));
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config)?;

    let context = CliContext::new(config);
    execute(&context, cli.command).await
}
