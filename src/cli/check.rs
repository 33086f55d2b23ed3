use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use tracing::info;

use super::CliContext;
use cellflow::model::GraphModel;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Compiled model (JSON)
    pub file: PathBuf,
}

pub async fn execute(args: CheckArgs, context: &CliContext) -> anyhow::Result<()> {
    let model = GraphModel::load(&args.file)?;
    info!(
        "checking with default reply timeout {:?}",
        context.config.default_timeout()
    );

    let issues = model.check();
    for issue in &issues {
        println!("{issue}");
    }
    if !issues.is_empty() {
        bail!("{} wiring issues in {}", issues.len(), args.file.display());
    }
    println!(
        "✅ {} nodes and {} filters, all wiring resolved.",
        model.nodes.len(),
        model.filters.len()
    );
    Ok(())
}
